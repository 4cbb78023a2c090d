//! Live element nodes: the mutable tree entries wrapping widget descriptors.
//!
//! Elements live in the [`ElementTree`](crate::tree::ElementTree) arena and
//! are addressed by [`ElementId`], a generational index: stale ids from
//! retired slots fail lookup instead of aliasing a reused slot.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use bitflags::bitflags;

use crate::render::{NativeHandle, RenderNode};
use crate::state::{State, StateId};
use crate::widget::{ComponentScope, Widget, WidgetKind};

/// Unique identifier for an element in the tree.
///
/// `index` is the reusable slot position; `generation` increments when the
/// slot is retired and reallocated, so stale ids never resolve.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ElementId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ElementId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Pack into a u64 for external use (e.g. renderer node ids).
    pub fn as_u64(self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

bitflags! {
    /// Lifecycle flags of an element.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ElementFlags: u8 {
        /// Currently in the tree.
        const MOUNTED     = 0b0000_0001;
        /// Has been mounted at least once; a second mount is an error.
        const WAS_MOUNTED = 0b0000_0010;
        /// Needs a rebuild before the next render.
        const DIRTY       = 0b0000_0100;
        /// A build is running right now (reentrancy guard).
        const BUILDING    = 0b0000_1000;
        /// Slot retired; only observable through a stale snapshot.
        const DISPOSED    = 0b0001_0000;
    }
}

/// Kind-specific element payload, fixed at inflation.
pub enum ElementBody {
    Stateless,
    Stateful {
        /// Taken out during build/mutation (extract-call-restore), so it is
        /// `None` only transiently — or permanently after dispose.
        state: Option<Box<dyn State>>,
        state_id: StateId,
        initialized: bool,
        state_disposed: bool,
    },
    Inherited {
        /// Descendant elements that read this element's value.
        dependents: HashSet<ElementId>,
    },
    Component {
        scope: ComponentScope,
    },
}

impl ElementBody {
    pub fn kind(&self) -> WidgetKind {
        match self {
            ElementBody::Stateless => WidgetKind::Stateless,
            ElementBody::Stateful { .. } => WidgetKind::Stateful,
            ElementBody::Inherited { .. } => WidgetKind::Inherited,
            ElementBody::Component { .. } => WidgetKind::Component,
        }
    }
}

/// A live node in the element tree.
pub struct Element {
    id: ElementId,
    widget: Option<Rc<dyn Widget>>,
    body: ElementBody,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    depth: u32,
    flags: ElementFlags,
    build_count: u64,
    last_build: Option<Duration>,
    /// Ancestor walks performed by inherited lookups (cache-miss counter).
    inherited_walks: u64,
    render_node: Option<RenderNode>,
    native_handle: Option<NativeHandle>,
    /// Per-build cache of inherited lookups, negative results included.
    inherited_cache: HashMap<TypeId, Option<ElementId>>,
}

impl Element {
    pub(crate) fn new(
        id: ElementId,
        widget: Rc<dyn Widget>,
        body: ElementBody,
        parent: Option<ElementId>,
        depth: u32,
    ) -> Self {
        Self {
            id,
            widget: Some(widget),
            body,
            parent,
            children: Vec::new(),
            depth,
            flags: ElementFlags::empty(),
            build_count: 0,
            last_build: None,
            inherited_walks: 0,
            render_node: None,
            native_handle: None,
            inherited_cache: HashMap::new(),
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn widget(&self) -> Option<&Rc<dyn Widget>> {
        self.widget.as_ref()
    }

    pub(crate) fn set_widget(&mut self, widget: Rc<dyn Widget>) {
        self.widget = Some(widget);
    }

    pub(crate) fn clear_widget(&mut self) {
        self.widget = None;
    }

    pub fn kind(&self) -> WidgetKind {
        self.body.kind()
    }

    pub(crate) fn body(&self) -> &ElementBody {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut ElementBody {
        &mut self.body
    }

    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<ElementId>) {
        self.parent = parent;
    }

    pub fn children(&self) -> &[ElementId] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<ElementId> {
        &mut self.children
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn flags(&self) -> ElementFlags {
        self.flags
    }

    pub(crate) fn flags_mut(&mut self) -> &mut ElementFlags {
        &mut self.flags
    }

    pub fn is_mounted(&self) -> bool {
        self.flags.contains(ElementFlags::MOUNTED)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(ElementFlags::DIRTY)
    }

    pub fn is_building(&self) -> bool {
        self.flags.contains(ElementFlags::BUILDING)
    }

    pub fn build_count(&self) -> u64 {
        self.build_count
    }

    pub(crate) fn record_build(&mut self, elapsed: Duration) {
        self.build_count += 1;
        self.last_build = Some(elapsed);
    }

    pub fn last_build(&self) -> Option<Duration> {
        self.last_build
    }

    pub fn inherited_walks(&self) -> u64 {
        self.inherited_walks
    }

    pub(crate) fn record_inherited_walk(&mut self) {
        self.inherited_walks += 1;
    }

    pub fn render_node(&self) -> Option<&RenderNode> {
        self.render_node.as_ref()
    }

    pub(crate) fn set_render_node(&mut self, node: Option<RenderNode>) {
        self.render_node = node;
    }

    pub fn native_handle(&self) -> Option<NativeHandle> {
        self.native_handle
    }

    pub(crate) fn set_native_handle(&mut self, handle: Option<NativeHandle>) {
        self.native_handle = handle;
    }

    /// State identity, for stateful elements only.
    pub fn state_id(&self) -> Option<StateId> {
        match &self.body {
            ElementBody::Stateful { state_id, .. } => Some(*state_id),
            _ => None,
        }
    }

    pub(crate) fn inherited_cache_get(&self, type_id: TypeId) -> Option<Option<ElementId>> {
        self.inherited_cache.get(&type_id).copied()
    }

    pub(crate) fn inherited_cache_insert(&mut self, type_id: TypeId, found: Option<ElementId>) {
        self.inherited_cache.insert(type_id, found);
    }

    pub(crate) fn clear_inherited_cache(&mut self) {
        self.inherited_cache.clear();
    }
}
