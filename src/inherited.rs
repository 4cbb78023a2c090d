//! Built-in inherited widgets backing the context conveniences.
//!
//! `Theme` and `MediaQuery` are ordinary [`Widget`] impls of kind
//! `Inherited`: they wrap an immutable data value around a single child and
//! notify dependents only when the value actually changed.

use std::any::Any;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::render::Size;
use crate::widget::{Widget, WidgetKind};

/// Visual theme propagated down the tree.
#[derive(Clone, Debug, PartialEq)]
pub struct ThemeData {
    pub brightness: Brightness,
    /// Named colors, e.g. `"primary"`, `"surface"`.
    pub colors: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Brightness {
    Light,
    Dark,
}

impl Default for ThemeData {
    fn default() -> Self {
        Self {
            brightness: Brightness::Light,
            colors: BTreeMap::new(),
        }
    }
}

impl ThemeData {
    pub fn color(&self, name: &str) -> Option<&str> {
        self.colors.get(name).map(String::as_str)
    }

    pub fn with_color(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.colors.insert(name.into(), value.into());
        self
    }
}

/// Inherited widget carrying a [`ThemeData`] to descendants.
pub struct Theme {
    data: ThemeData,
    child: [Rc<dyn Widget>; 1],
}

impl Theme {
    pub fn new(data: ThemeData, child: Rc<dyn Widget>) -> Self {
        Self {
            data,
            child: [child],
        }
    }

    pub fn data(&self) -> &ThemeData {
        &self.data
    }
}

impl Widget for Theme {
    fn kind(&self) -> WidgetKind {
        WidgetKind::Inherited
    }

    fn type_name(&self) -> &'static str {
        "Theme"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn children(&self) -> &[Rc<dyn Widget>] {
        &self.child
    }

    fn update_should_notify(&self, old_widget: &dyn Widget) -> bool {
        old_widget
            .as_any()
            .downcast_ref::<Theme>()
            .map(|old| old.data != self.data)
            .unwrap_or(true)
    }
}

/// Display metrics propagated down the tree.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaQueryData {
    pub size: Size,
    pub scale_factor: f64,
}

impl MediaQueryData {
    pub fn new(size: Size, scale_factor: f64) -> Self {
        Self { size, scale_factor }
    }
}

/// Inherited widget carrying a [`MediaQueryData`] to descendants.
pub struct MediaQuery {
    data: MediaQueryData,
    child: [Rc<dyn Widget>; 1],
}

impl MediaQuery {
    pub fn new(data: MediaQueryData, child: Rc<dyn Widget>) -> Self {
        Self {
            data,
            child: [child],
        }
    }

    pub fn data(&self) -> &MediaQueryData {
        &self.data
    }
}

impl Widget for MediaQuery {
    fn kind(&self) -> WidgetKind {
        WidgetKind::Inherited
    }

    fn type_name(&self) -> &'static str {
        "MediaQuery"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn children(&self) -> &[Rc<dyn Widget>] {
        &self.child
    }

    fn update_should_notify(&self, old_widget: &dyn Widget) -> bool {
        old_widget
            .as_any()
            .downcast_ref::<MediaQuery>()
            .map(|old| old.data != self.data)
            .unwrap_or(true)
    }
}
