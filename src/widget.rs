//! Widget descriptors: the immutable configuration values the runtime
//! inflates into live elements.
//!
//! A widget's classification is an explicit [`WidgetKind`] discriminant
//! fixed per type, decided once at inflation — never probed at runtime.
//! The runtime validates the classification's contract when the element is
//! constructed: a `Stateful` widget must supply a state factory, an
//! `Inherited` widget must supply exactly one child.
//!
//! Descriptors are shared immutably (`Rc<dyn Widget>`); the runtime treats
//! pointer identity as "unchanged" when a widget is swapped in place.

use std::any::{Any, TypeId};
use std::rc::Rc;

use crate::context::BuildContext;
use crate::render::RenderNode;
use crate::state::State;

/// Classification of a widget descriptor.
///
/// Total by construction: every widget names its kind, so the runtime never
/// encounters an unclassifiable shape.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum WidgetKind {
    /// Pure function of its own configuration: `build` produces the node.
    Stateless,
    /// Owns a [`State`] object constructed by `create_state`.
    Stateful,
    /// Propagates an immutable value to descendants and tracks its readers.
    Inherited,
    /// Renders through `render` with a per-instance [`ComponentScope`].
    Component,
}

/// An immutable widget descriptor supplied by the application.
pub trait Widget: 'static {
    /// The fixed classification of this widget type.
    fn kind(&self) -> WidgetKind;

    /// Human-readable type name for logs and error messages.
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    /// Optional reconciliation key (consumed by the renderer, not here).
    fn key(&self) -> Option<&str> {
        None
    }

    /// Child descriptors inflated as child elements at mount.
    fn children(&self) -> &[Rc<dyn Widget>] {
        &[]
    }

    /// Build entry point for `Stateless` (and optionally `Inherited`)
    /// widgets. `None` means "no node produced" — a build failure for a
    /// stateless widget, a request for a pass-through fragment for an
    /// inherited one.
    fn build(&self, _ctx: &mut BuildContext<'_>) -> Option<RenderNode> {
        None
    }

    /// State factory for `Stateful` widgets. Must return `Some`; a stateful
    /// widget without a factory is a fatal configuration error at inflation.
    fn create_state(&self) -> Option<Box<dyn State>> {
        None
    }

    /// Notify decision for `Inherited` widgets: should dependents rebuild
    /// after this descriptor replaced `old_widget`?
    fn update_should_notify(&self, _old_widget: &dyn Widget) -> bool {
        false
    }

    /// Render entry point for `Component` widgets, with per-instance local
    /// state in `scope`.
    fn render(&self, _ctx: &mut BuildContext<'_>, _scope: &mut ComponentScope) -> Option<RenderNode> {
        None
    }
}

/// Per-instance local storage for component elements.
///
/// Values are keyed by their concrete type, one value per type. Linear scan
/// over a small vec: a component keeps a handful of locals in practice, so
/// this fits in a cache line or two and avoids map overhead.
#[derive(Default)]
pub struct ComponentScope {
    slots: Vec<(TypeId, Box<dyn Any>)>,
}

impl ComponentScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a local of type `T`, if one was stored.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        let type_id = TypeId::of::<T>();
        self.slots
            .iter()
            .find(|entry| entry.0 == type_id)
            .and_then(|entry| entry.1.downcast_ref::<T>())
    }

    /// Store a local of type `T`, replacing any existing value.
    pub fn set<T: 'static>(&mut self, value: T) {
        let type_id = TypeId::of::<T>();
        for entry in self.slots.iter_mut() {
            if entry.0 == type_id {
                entry.1 = Box::new(value);
                return;
            }
        }
        self.slots.push((type_id, Box::new(value)));
    }

    /// Read a local of type `T`, initializing it first if absent.
    pub fn get_or_insert_with<T: 'static>(&mut self, init: impl FnOnce() -> T) -> &mut T {
        let type_id = TypeId::of::<T>();
        let position = self.slots.iter().position(|entry| entry.0 == type_id);
        let index = match position {
            Some(index) => index,
            None => {
                self.slots.push((type_id, Box::new(init())));
                self.slots.len() - 1
            }
        };
        self.slots[index]
            .1
            .downcast_mut::<T>()
            .expect("component scope slot type mismatch (should be impossible)")
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
