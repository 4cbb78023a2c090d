//! Per-build capability handle for ancestor lookup, dependency
//! registration, and service access.
//!
//! A `BuildContext` is constructed by the runtime around one element's
//! build and borrows the tree, the tracker, and the service registry for
//! exactly that long — the borrow checker enforces what a dynamic runtime
//! would police with "context used after dispose" checks.
//!
//! Ancestor lookups are explicit loops over the non-owning parent pointer;
//! the chain is never mutated mid-walk. Inherited lookups cache their
//! result (hit or miss) per widget type on the element, so repeated calls
//! within one build never walk the chain twice.

use std::any::TypeId;
use std::rc::Rc;

use crate::element::{Element, ElementBody, ElementId};
use crate::engine::ServiceRegistry;
use crate::error::EngineError;
use crate::inherited::{MediaQuery, MediaQueryData, Theme, ThemeData};
use crate::render::{Bounds, NativeHandle, Size};
use crate::state::{State, StateId};
use crate::tracker::StateTracker;
use crate::tree::ElementTree;
use crate::widget::{Widget, WidgetKind};

/// Capability object handed to build/render entry points.
pub struct BuildContext<'a> {
    tree: &'a mut ElementTree,
    tracker: &'a mut StateTracker,
    services: &'a ServiceRegistry,
    element: ElementId,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(
        tree: &'a mut ElementTree,
        tracker: &'a mut StateTracker,
        services: &'a ServiceRegistry,
        element: ElementId,
    ) -> Self {
        Self {
            tree,
            tracker,
            services,
            element,
        }
    }

    /// The element this context is bound to.
    pub fn element(&self) -> ElementId {
        self.element
    }

    /// Depth of the bound element.
    pub fn depth(&self) -> u32 {
        self.tree.get(self.element).map(|el| el.depth()).unwrap_or(0)
    }

    /// State identity of the bound element, for stateful elements.
    pub fn state_id(&self) -> Option<StateId> {
        self.tree.get(self.element).and_then(|el| el.state_id())
    }

    /// Record that the current build reads `property` of `state`.
    pub fn depend_on(&mut self, state: StateId, property: &str) {
        self.tracker.record_dependency(state, property);
    }

    /// First ancestor whose widget type is exactly `W` (no subtype match),
    /// read through `f`. `None` when absent.
    pub fn find_ancestor_widget_of_type<W: Widget, R>(&self, f: impl FnOnce(&W) -> R) -> Option<R> {
        for ancestor in self.tree.ancestors(self.element) {
            let element = self.tree.get(ancestor)?;
            if let Some(widget) = element.widget() {
                if let Some(concrete) = widget.as_any().downcast_ref::<W>() {
                    return Some(f(concrete));
                }
            }
        }
        None
    }

    /// First ancestor state assignable to `S`, skipping stateless
    /// ancestors, read through `f`.
    pub fn find_ancestor_state_of_type<S: State, R>(&self, f: impl FnOnce(&S) -> R) -> Option<R> {
        for ancestor in self.tree.ancestors(self.element) {
            let element = self.tree.get(ancestor)?;
            if let ElementBody::Stateful { state: Some(state), .. } = element.body() {
                if let Some(concrete) = state.as_any().downcast_ref::<S>() {
                    return Some(f(concrete));
                }
            }
        }
        None
    }

    /// State identity of the first ancestor whose state is an `S`.
    pub fn find_ancestor_state_id<S: State>(&self) -> Option<StateId> {
        for ancestor in self.tree.ancestors(self.element) {
            let element = self.tree.get(ancestor)?;
            if let ElementBody::Stateful {
                state: Some(state),
                state_id,
                ..
            } = element.body()
            {
                if state.as_any().downcast_ref::<S>().is_some() {
                    return Some(*state_id);
                }
            }
        }
        None
    }

    /// Nearest native render handle, starting at the element itself.
    pub fn find_render_object(&self) -> Option<NativeHandle> {
        if let Some(handle) = self.tree.get(self.element).and_then(|el| el.native_handle()) {
            return Some(handle);
        }
        for ancestor in self.tree.ancestors(self.element) {
            if let Some(handle) = self.tree.get(ancestor).and_then(|el| el.native_handle()) {
                return Some(handle);
            }
        }
        None
    }

    /// Nearest inherited element with widget type exactly `W`, registering
    /// the bound element as a dependent and reading the widget through `f`.
    ///
    /// The result — found or not — is cached per type on the element for
    /// the duration of the build.
    pub fn depend_on_inherited_widget_of_type<W: Widget, R>(
        &mut self,
        f: impl FnOnce(&W) -> R,
    ) -> Option<R> {
        let type_id = TypeId::of::<W>();
        let cached = self
            .tree
            .get(self.element)
            .and_then(|el| el.inherited_cache_get(type_id));

        let target = match cached {
            Some(hit) => hit,
            None => {
                let found = self.walk_for_inherited(type_id);
                if let Some(el) = self.tree.get_mut(self.element) {
                    el.record_inherited_walk();
                    el.inherited_cache_insert(type_id, found);
                }
                found
            }
        };

        let target = target?;
        if let Some(el) = self.tree.get_mut(target) {
            if let ElementBody::Inherited { dependents } = el.body_mut() {
                dependents.insert(self.element);
            }
        }

        let element = self.tree.get(target)?;
        element
            .widget()
            .and_then(|widget| widget.as_any().downcast_ref::<W>())
            .map(f)
    }

    fn walk_for_inherited(&self, type_id: TypeId) -> Option<ElementId> {
        for ancestor in self.tree.ancestors(self.element) {
            let element = self.tree.get(ancestor)?;
            if element.kind() != WidgetKind::Inherited {
                continue;
            }
            if let Some(widget) = element.widget() {
                if widget.as_any().type_id() == type_id {
                    return Some(ancestor);
                }
            }
        }
        None
    }

    /// Registered service `name`, downcast to `T`. Empty names are a
    /// configuration error; an unregistered name is `Ok(None)`.
    pub fn get_service<T: 'static>(&self, name: &str) -> Result<Option<Rc<T>>, EngineError> {
        self.services.get_as::<T>(name)
    }

    /// Walk the ancestor chain lazily, stopping when `visitor` returns
    /// false. The walk is finite and not restartable.
    pub fn visit_ancestor_elements(&self, mut visitor: impl FnMut(&Element) -> bool) {
        for ancestor in self.tree.ancestors(self.element) {
            let Some(element) = self.tree.get(ancestor) else {
                return;
            };
            if !visitor(element) {
                return;
            }
        }
    }

    /// Nearest [`Theme`] value, registering a dependency on it.
    pub fn theme(&mut self) -> Option<ThemeData> {
        self.depend_on_inherited_widget_of_type::<Theme, _>(|theme| theme.data().clone())
    }

    /// Nearest [`MediaQuery`] value, registering a dependency on it.
    pub fn media_query(&mut self) -> Option<MediaQueryData> {
        self.depend_on_inherited_widget_of_type::<MediaQuery, _>(|mq| mq.data().clone())
    }

    /// Size from the nearest native handle, when the renderer reported one.
    pub fn size(&self) -> Option<Size> {
        self.find_render_object()
            .and_then(|handle| handle.bounds())
            .map(|bounds| bounds.size())
    }

    /// Bounds from the nearest native handle, when the renderer reported
    /// one.
    pub fn bounds(&self) -> Option<Bounds> {
        self.find_render_object().and_then(|handle| handle.bounds())
    }
}
