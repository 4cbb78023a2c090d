//! Output model handed to the external renderer.
//!
//! A build produces a [`RenderNode`]: a lightweight tree of tags, property
//! bags, and text leaves. The runtime stores one node per element and never
//! interprets it — diffing and patching are the renderer's concern. The
//! renderer hands back an opaque [`NativeHandle`] per realized node, which
//! the runtime only stores and clears.

use std::collections::BTreeMap;

/// A property value carried on a render node.
#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Text(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Text(value)
    }
}

/// A child of a render node: either a nested node or a text leaf.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderChild {
    Node(RenderNode),
    Text(String),
}

/// The tree produced by a build, consumed by the external renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderNode {
    pub tag: String,
    pub props: BTreeMap<String, PropValue>,
    pub style: BTreeMap<String, String>,
    pub children: Vec<RenderChild>,
}

impl RenderNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            props: BTreeMap::new(),
            style: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Neutral pass-through node used by wrapper elements that carry no
    /// visual output of their own.
    pub fn fragment() -> Self {
        Self::new("fragment")
    }

    pub fn prop(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    pub fn style(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.style.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, node: RenderNode) -> Self {
        self.children.push(RenderChild::Node(node));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(RenderChild::Text(text.into()));
        self
    }
}

/// Logical size in renderer units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Placement of a realized node, as reported by the renderer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Opaque reference to a renderer-realized node.
///
/// The runtime stores one per element when the renderer supplies it and
/// clears it on unmount; `raw` zero marks an invalid handle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NativeHandle {
    raw: u64,
    bounds: Option<Bounds>,
}

impl NativeHandle {
    pub fn new(raw: u64) -> Self {
        Self { raw, bounds: None }
    }

    pub fn with_bounds(raw: u64, bounds: Bounds) -> Self {
        Self {
            raw,
            bounds: Some(bounds),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.raw != 0
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }
}
