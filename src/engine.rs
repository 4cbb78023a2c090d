//! The runtime engine: owns the mounted tree, the dirty set, and the
//! subsystems that feed it, and drives rebuild passes.
//!
//! One engine instance is one process-wide runtime: `mount` inflates a
//! widget descriptor tree into live elements, mutations and invalidations
//! accumulate through the [`UpdateBatcher`] and [`StateTracker`], and the
//! host drains deferred work by calling [`RuntimeEngine::pump`] at the end
//! of each turn. Passes rebuild the dirty snapshot top-down (ascending
//! depth) and never revisit an element within the same pass; anything
//! re-dirtied mid-pass waits for the next one.

use std::any::Any;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::batcher::{BatchStats, Mutation, UpdateBatcher};
use crate::context::BuildContext;
use crate::element::{ElementBody, ElementFlags, ElementId};
use crate::error::{EngineError, MutationError};
use crate::render::{NativeHandle, RenderNode};
use crate::scheduler::{PassQueue, Task, TaskQueue};
use crate::state::{State, StateId};
use crate::tracker::{StateTracker, TrackerStats};
use crate::tree::ElementTree;
use crate::widget::{ComponentScope, Widget, WidgetKind};

/// Name-keyed registry of host services.
///
/// Linear scan over a small vec: a runtime registers a handful of services
/// in practice, so this fits in a cache line or two and avoids map
/// overhead.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: Vec<(String, Rc<dyn Any>)>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under `name`, replacing any existing entry.
    pub fn register(&mut self, name: &str, service: Rc<dyn Any>) -> Result<(), EngineError> {
        if name.is_empty() {
            return Err(EngineError::config("service name must not be empty"));
        }
        for entry in self.entries.iter_mut() {
            if entry.0 == name {
                entry.1 = service;
                return Ok(());
            }
        }
        self.entries.push((name.to_string(), service));
        Ok(())
    }

    /// Untyped lookup. Empty names are a configuration error; an
    /// unregistered name is `Ok(None)`.
    pub fn get(&self, name: &str) -> Result<Option<Rc<dyn Any>>, EngineError> {
        if name.is_empty() {
            return Err(EngineError::config("service name must not be empty"));
        }
        Ok(self
            .entries
            .iter()
            .find(|entry| entry.0 == name)
            .map(|entry| entry.1.clone()))
    }

    /// Typed lookup. A registered service of a different type reads as
    /// absent.
    pub fn get_as<T: 'static>(&self, name: &str) -> Result<Option<Rc<T>>, EngineError> {
        Ok(self.get(name)?.and_then(|service| service.downcast::<T>().ok()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Engine tunables.
pub struct EngineConfig {
    /// Coalesce mutations into deferred flushes (false applies them
    /// synchronously).
    pub batching_enabled: bool,
    /// Allow `hot_reload` to swap the root widget.
    pub hot_reload_enabled: bool,
    /// Dependent-set size past which the tracker logs a warning (0
    /// disables).
    pub dependency_warn_threshold: usize,
    /// Pass duration past which a warning is logged. Slow passes are never
    /// aborted.
    pub slow_pass_warning: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batching_enabled: true,
            hot_reload_enabled: true,
            dependency_warn_threshold: 256,
            slow_pass_warning: Duration::from_millis(8),
        }
    }
}

/// Snapshot of engine counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Rebuild passes that actually ran (the frame counter).
    pub frames: u64,
    /// Element builds across all passes and mounts.
    pub elements_built: u64,
}

/// The element-tree runtime.
pub struct RuntimeEngine {
    tree: ElementTree,
    tracker: StateTracker,
    batcher: UpdateBatcher,
    tasks: TaskQueue,
    passes: PassQueue,
    services: ServiceRegistry,
    root: Option<ElementId>,
    container: Option<NativeHandle>,
    config: EngineConfig,
    stats: EngineStats,
    last_pass: Option<Duration>,
    last_mount: Option<Duration>,
    disposed: bool,
}

impl RuntimeEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let tracker = StateTracker::with_warn_threshold(config.dependency_warn_threshold);
        let mut batcher = UpdateBatcher::new();
        let mut tree = ElementTree::new();
        let mut passes = PassQueue::new();
        let mut tasks = TaskQueue::new();
        if !config.batching_enabled {
            batcher.set_enabled(&mut tree, &mut passes, &mut tasks, false);
        }
        Self {
            tree,
            tracker,
            batcher,
            tasks,
            passes,
            services: ServiceRegistry::new(),
            root: None,
            container: None,
            config,
            stats: EngineStats::default(),
            last_pass: None,
            last_mount: None,
            disposed: false,
        }
    }

    // ---- mounting ------------------------------------------------------

    /// Inflate `widget` into a live element tree rooted in `container`.
    pub fn mount(
        &mut self,
        widget: Rc<dyn Widget>,
        container: NativeHandle,
    ) -> Result<ElementId, EngineError> {
        if self.disposed {
            return Err(EngineError::state("engine is disposed"));
        }
        if self.root.is_some() {
            return Err(EngineError::state("runtime is already mounted"));
        }
        if !container.is_valid() {
            return Err(EngineError::config("container handle is invalid"));
        }

        let start = Instant::now();
        let type_name = widget.type_name();
        let root = self.inflate(widget, None)?;
        if let Err(err) = self.mount_element(root) {
            self.dispose_element(root);
            return Err(err);
        }

        if let Some(el) = self.tree.get_mut(root) {
            el.set_native_handle(Some(container));
        }
        self.root = Some(root);
        self.container = Some(container);
        self.last_mount = Some(start.elapsed());
        log::info!(
            "mounted `{type_name}` as {root}: {} elements in {:?}",
            self.tree.len(),
            self.last_mount.unwrap_or_default()
        );
        Ok(root)
    }

    /// Classify `widget` and allocate its element. Validation happens here,
    /// once: a stateful widget must supply a state factory, an inherited
    /// widget exactly one child.
    fn inflate(
        &mut self,
        widget: Rc<dyn Widget>,
        parent: Option<ElementId>,
    ) -> Result<ElementId, EngineError> {
        let body = match widget.kind() {
            WidgetKind::Stateless => ElementBody::Stateless,
            WidgetKind::Stateful => {
                let state = widget.create_state().ok_or_else(|| {
                    EngineError::config(format!(
                        "stateful widget `{}` supplies no state factory",
                        widget.type_name()
                    ))
                })?;
                ElementBody::Stateful {
                    state: Some(state),
                    state_id: StateId::next(),
                    initialized: false,
                    state_disposed: false,
                }
            }
            WidgetKind::Inherited => {
                if widget.children().len() != 1 {
                    return Err(EngineError::config(format!(
                        "inherited widget `{}` must have exactly one child, found {}",
                        widget.type_name(),
                        widget.children().len()
                    )));
                }
                ElementBody::Inherited {
                    dependents: Default::default(),
                }
            }
            WidgetKind::Component => ElementBody::Component {
                scope: ComponentScope::new(),
            },
        };
        Ok(self.tree.insert(widget, body, parent))
    }

    fn mount_element(&mut self, element: ElementId) -> Result<(), EngineError> {
        {
            let el = self
                .tree
                .get_mut(element)
                .ok_or_else(|| EngineError::state(format!("mount of retired element {element}")))?;
            if el.flags().contains(ElementFlags::WAS_MOUNTED) {
                return Err(EngineError::state(format!(
                    "element {element} was already mounted once"
                )));
            }
            el.flags_mut()
                .insert(ElementFlags::MOUNTED | ElementFlags::WAS_MOUNTED);
        }

        self.run_init_once(element);
        self.build_element(element)?;

        let widget = self
            .tree
            .get(element)
            .and_then(|el| el.widget().cloned())
            .ok_or_else(|| EngineError::state(format!("element {element} lost its widget")))?;
        for child in widget.children() {
            let child_element = self.inflate(child.clone(), Some(element))?;
            self.mount_element(child_element)?;
        }

        self.run_state_hook(element, "did_mount", |state| state.did_mount());
        Ok(())
    }

    // ---- building ------------------------------------------------------

    /// Run one element's build under a tracking session and the reentrancy
    /// guard. On success the element comes out clean with a fresh render
    /// node; on failure the previous node stays in place.
    fn build_element(&mut self, element: ElementId) -> Result<(), EngineError> {
        let start = Instant::now();
        let widget = {
            let el = self.tree.get_mut(element).ok_or_else(|| {
                EngineError::state(format!("build of retired element {element}"))
            })?;
            if el.is_building() {
                // Reentrant request: coalesce into the current build.
                el.flags_mut().insert(ElementFlags::DIRTY);
                self.passes.defer(element);
                return Ok(());
            }
            let widget = el
                .widget()
                .cloned()
                .ok_or_else(|| EngineError::state(format!("element {element} has no widget")))?;
            el.clear_inherited_cache();
            el.flags_mut().insert(ElementFlags::BUILDING);
            el.flags_mut().remove(ElementFlags::DIRTY);
            widget
        };

        self.tracker.start_tracking(element);
        let produced = match widget.kind() {
            WidgetKind::Stateless => {
                let mut ctx =
                    BuildContext::new(&mut self.tree, &mut self.tracker, &self.services, element);
                widget.build(&mut ctx)
            }
            WidgetKind::Stateful => {
                let mut state_box = match self.tree.get_mut(element).map(|el| el.body_mut()) {
                    Some(ElementBody::Stateful { state, .. }) => state.take(),
                    _ => None,
                };
                let produced = match state_box.as_mut() {
                    Some(state) => {
                        let mut ctx = BuildContext::new(
                            &mut self.tree,
                            &mut self.tracker,
                            &self.services,
                            element,
                        );
                        state.build(&mut ctx)
                    }
                    None => None,
                };
                if let Some(boxed) = state_box {
                    if let Some(el) = self.tree.get_mut(element) {
                        if let ElementBody::Stateful { state, .. } = el.body_mut() {
                            *state = Some(boxed);
                        }
                    }
                }
                produced
            }
            WidgetKind::Inherited => {
                let mut ctx =
                    BuildContext::new(&mut self.tree, &mut self.tracker, &self.services, element);
                widget.build(&mut ctx).or_else(|| Some(RenderNode::fragment()))
            }
            WidgetKind::Component => {
                let mut scope = match self.tree.get_mut(element).map(|el| el.body_mut()) {
                    Some(ElementBody::Component { scope }) => std::mem::take(scope),
                    _ => ComponentScope::new(),
                };
                let produced = {
                    let mut ctx = BuildContext::new(
                        &mut self.tree,
                        &mut self.tracker,
                        &self.services,
                        element,
                    );
                    widget.render(&mut ctx, &mut scope)
                };
                if let Some(el) = self.tree.get_mut(element) {
                    if let ElementBody::Component { scope: slot } = el.body_mut() {
                        *slot = scope;
                    }
                }
                produced
            }
        };
        self.tracker.stop_tracking();

        let Some(el) = self.tree.get_mut(element) else {
            return Err(EngineError::state(format!(
                "element {element} disappeared during its own build"
            )));
        };
        el.flags_mut().remove(ElementFlags::BUILDING);
        match produced {
            Some(node) => {
                el.set_render_node(Some(node));
                el.record_build(start.elapsed());
                self.stats.elements_built += 1;
                Ok(())
            }
            None => Err(EngineError::state(format!(
                "build of `{}` on element {element} produced no render node",
                widget.type_name()
            ))),
        }
    }

    /// Rebuild one element immediately. A request against an unmounted or
    /// unknown element warns and returns `Ok(false)`; a request while the
    /// element is already building coalesces and returns `Ok(false)`.
    pub fn rebuild(&mut self, element: ElementId) -> Result<bool, EngineError> {
        let Some(el) = self.tree.get_mut(element) else {
            log::warn!("rebuild of unknown element {element}");
            return Ok(false);
        };
        if !el.is_mounted() {
            log::warn!("rebuild of unmounted element {element}");
            return Ok(false);
        }
        if el.is_building() {
            el.flags_mut().insert(ElementFlags::DIRTY);
            self.passes.defer(element);
            return Ok(false);
        }
        match self.build_element(element) {
            Ok(()) => {
                self.passes.remove(element);
                Ok(true)
            }
            Err(err) => {
                if let Some(el) = self.tree.get_mut(element) {
                    el.flags_mut().insert(ElementFlags::DIRTY);
                    self.passes.defer(element);
                }
                Err(err)
            }
        }
    }

    // ---- invalidation --------------------------------------------------

    /// Flag `element` for rebuild in the next pass. Warns (never errors)
    /// when the element is unknown or unmounted.
    pub fn mark_needs_build(&mut self, element: ElementId) {
        let Some(el) = self.tree.get_mut(element) else {
            log::warn!("mark_needs_build on unknown element {element}");
            return;
        };
        if !el.is_mounted() {
            log::warn!("mark_needs_build on unmounted element {element}");
            return;
        }
        if el.is_dirty() {
            log::debug!("mark_needs_build on already-dirty element {element}");
            return;
        }
        el.flags_mut().insert(ElementFlags::DIRTY);
        if el.is_building() {
            // Mid-build invalidation waits for the next pass.
            self.passes.defer(element);
        } else {
            self.passes.enqueue(element, &mut self.tasks);
        }
    }

    /// Swap `element`'s widget descriptor in place.
    ///
    /// Identity-equal descriptors are a no-op (`Ok(false)`). The new
    /// descriptor must keep the element's construction-time type; inherited
    /// elements consult `update_should_notify` and dirty their dependents.
    pub fn update_element(
        &mut self,
        element: ElementId,
        new_widget: Rc<dyn Widget>,
    ) -> Result<bool, EngineError> {
        let el = self
            .tree
            .get_mut(element)
            .ok_or_else(|| EngineError::state(format!("update of retired element {element}")))?;
        let current = el
            .widget()
            .cloned()
            .ok_or_else(|| EngineError::state(format!("element {element} has no widget")))?;

        if Rc::ptr_eq(&current, &new_widget) {
            return Ok(false);
        }
        if current.as_any().type_id() != new_widget.as_any().type_id() {
            return Err(EngineError::state(format!(
                "cannot update `{}` in place with `{}`",
                current.type_name(),
                new_widget.type_name()
            )));
        }
        if new_widget.kind() == WidgetKind::Inherited && new_widget.children().len() != 1 {
            return Err(EngineError::config(format!(
                "inherited widget `{}` must have exactly one child",
                new_widget.type_name()
            )));
        }

        el.set_widget(new_widget.clone());

        let old = current.clone();
        self.run_state_hook(element, "did_update_widget", move |state| {
            state.did_update_widget(old.as_ref())
        });

        if new_widget.kind() == WidgetKind::Inherited
            && new_widget.update_should_notify(current.as_ref())
        {
            let dependents: Vec<ElementId> = match self.tree.get(element).map(|el| el.body()) {
                Some(ElementBody::Inherited { dependents }) => dependents.iter().copied().collect(),
                _ => Vec::new(),
            };
            for dependent in dependents {
                if self
                    .tree
                    .get(dependent)
                    .map(|el| el.is_mounted())
                    .unwrap_or(false)
                {
                    self.mark_needs_build(dependent);
                }
            }
        }

        self.mark_needs_build(element);
        Ok(true)
    }

    // ---- passes --------------------------------------------------------

    /// Drain deferred work: pending flushes, then rebuild passes. The host
    /// calls this at the end of each turn.
    pub fn pump(&mut self) {
        // Pick up retry work deferred by a previous turn.
        self.passes.reschedule(&mut self.tasks);
        while let Some(task) = self.tasks.pop() {
            match task {
                Task::FlushUpdates => {
                    self.batcher
                        .flush(&mut self.tree, &mut self.passes, &mut self.tasks);
                }
                Task::RebuildPass => self.run_pass(),
            }
        }
    }

    /// Rebuild the current dirty snapshot, ancestors first. Elements
    /// invalidated mid-pass wait for the next pass; failed builds keep
    /// their previous render node and stay dirty.
    fn run_pass(&mut self) {
        let mut batch = self.passes.take();
        if batch.is_empty() {
            return;
        }
        let start = Instant::now();
        batch.sort_by_key(|id| self.tree.get(*id).map(|el| el.depth()).unwrap_or(u32::MAX));

        let mut rebuilt = 0usize;
        for element in batch {
            let Some(el) = self.tree.get(element) else {
                continue;
            };
            if !el.is_mounted() || !el.is_dirty() {
                continue;
            }
            match self.build_element(element) {
                Ok(()) => rebuilt += 1,
                Err(err) => {
                    log::error!("rebuild of element {element} failed: {err}; keeping it dirty");
                    if let Some(el) = self.tree.get_mut(element) {
                        el.flags_mut().insert(ElementFlags::DIRTY);
                    }
                    self.passes.defer(element);
                }
            }
        }

        self.stats.frames += 1;
        let elapsed = start.elapsed();
        self.last_pass = Some(elapsed);
        if elapsed > self.config.slow_pass_warning {
            log::warn!(
                "slow rebuild pass: {rebuilt} elements in {elapsed:?} (threshold {:?})",
                self.config.slow_pass_warning
            );
        } else {
            log::debug!("pass #{}: rebuilt {rebuilt} elements in {elapsed:?}", self.stats.frames);
        }
    }

    // ---- state mutation ------------------------------------------------

    /// Queue a raw mutation against `element`'s state.
    pub fn queue_update(&mut self, element: ElementId, mutation: Mutation) {
        self.batcher.queue_update(
            &mut self.tree,
            &mut self.passes,
            &mut self.tasks,
            element,
            mutation,
        );
    }

    /// Queue a typed mutation; a state of a different type fails at apply
    /// time as a logged mutation failure.
    pub fn update_state<S: State>(
        &mut self,
        element: ElementId,
        f: impl FnOnce(&mut S) + 'static,
    ) {
        self.queue_update(
            element,
            Box::new(move |state: &mut dyn State| {
                state
                    .as_any_mut()
                    .downcast_mut::<S>()
                    .map(f)
                    .ok_or_else(|| {
                        MutationError::new(format!(
                            "state is not a `{}`",
                            std::any::type_name::<S>()
                        ))
                    })
            }),
        );
    }

    /// Apply everything queued right now, bypassing the deferral.
    pub fn force_flush(&mut self) -> usize {
        self.batcher
            .force_flush(&mut self.tree, &mut self.passes, &mut self.tasks)
    }

    /// Toggle mutation batching; disabling force-flushes anything queued.
    pub fn set_batching_enabled(&mut self, enabled: bool) {
        self.batcher
            .set_enabled(&mut self.tree, &mut self.passes, &mut self.tasks, enabled);
    }

    // ---- dependency tracking ------------------------------------------

    /// Dirty every mounted dependent of `(state, property)`. Returns the
    /// count newly marked.
    pub fn notify_property_change(&mut self, state: StateId, property: &str) -> usize {
        self.tracker.notify_property_change(
            &mut self.tree,
            &mut self.passes,
            &mut self.tasks,
            state,
            property,
        )
    }

    /// Dirty the union of dependents across `properties`, each element
    /// once.
    pub fn notify_multiple_changes(&mut self, state: StateId, properties: &[&str]) -> usize {
        self.tracker.notify_multiple_changes(
            &mut self.tree,
            &mut self.passes,
            &mut self.tasks,
            state,
            properties,
        )
    }

    pub fn get_dependents(&self, state: StateId, property: &str) -> Vec<ElementId> {
        self.tracker.get_dependents(&self.tree, state, property)
    }

    pub fn clear_dependencies(&mut self, element: ElementId) {
        self.tracker.clear_dependencies(element);
    }

    pub fn clear_property_dependencies(&mut self, state: StateId, property: &str) {
        self.tracker.clear_property_dependencies(state, property);
    }

    pub fn clear_state_dependencies(&mut self, state: StateId) {
        self.tracker.clear_state_dependencies(state);
    }

    // ---- unmounting ----------------------------------------------------

    /// Unmount one element and its subtree: hooks fire, children unmount
    /// leaf-to-root, render output and handles are cleared. Slots stay
    /// allocated until [`dispose_element`](Self::dispose_element).
    pub fn unmount_element(&mut self, element: ElementId) {
        let Some(el) = self.tree.get(element) else {
            log::warn!("unmount of unknown element {element}");
            return;
        };
        if !el.is_mounted() {
            log::warn!("unmount of element {element} that is not mounted");
            return;
        }

        self.run_state_hook(element, "will_unmount", |state| state.will_unmount());

        let children: Vec<ElementId> = self
            .tree
            .get(element)
            .map(|el| el.children().to_vec())
            .unwrap_or_default();
        for child in children {
            self.unmount_element(child);
        }

        if let Some(el) = self.tree.get_mut(element) {
            el.children_mut().clear();
            el.set_render_node(None);
            el.set_native_handle(None);
            el.flags_mut()
                .remove(ElementFlags::MOUNTED | ElementFlags::DIRTY);
        }
        self.passes.remove(element);

        self.run_dispose_once(element);
        self.run_state_hook(element, "did_unmount", |state| state.did_unmount());
    }

    /// Retire an element and its whole subtree: unmounts if needed, clears
    /// tracked dependencies, and frees the arena slots. Ids go stale.
    pub fn dispose_element(&mut self, element: ElementId) {
        if !self.tree.contains(element) {
            return;
        }
        let subtree = self.tree.collect_subtree(element);
        if self
            .tree
            .get(element)
            .map(|el| el.is_mounted())
            .unwrap_or(false)
        {
            self.unmount_element(element);
        }
        for &id in subtree.iter().rev() {
            self.tracker.clear_dependencies(id);
            self.passes.remove(id);
            if let Some(el) = self.tree.get_mut(id) {
                el.flags_mut().insert(ElementFlags::DISPOSED);
                el.clear_widget();
                el.set_parent(None);
            }
            self.tree.retire(id);
        }
    }

    /// Tear the mounted tree down. Warns when nothing is mounted.
    pub fn unmount(&mut self) {
        let Some(root) = self.root.take() else {
            log::warn!("unmount requested but nothing is mounted");
            return;
        };
        self.dispose_element(root);
        self.container = None;
        self.batcher.clear_pending();
        self.passes.clear();
        self.tasks.clear();
        self.tracker.reset();
        log::info!("unmounted element tree");
    }

    /// Terminal teardown: unmounts if needed and clears the service
    /// registry. A disposed engine refuses to mount again.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if self.root.is_some() {
            self.unmount();
        }
        self.services.clear();
        self.tree.clear();
        self.disposed = true;
    }

    // ---- hot reload ----------------------------------------------------

    /// Swap the root widget and force one immediate rebuild pass. No-op
    /// when disabled or nothing is mounted.
    pub fn hot_reload(&mut self, new_root: Rc<dyn Widget>) -> Result<bool, EngineError> {
        if !self.config.hot_reload_enabled {
            log::info!("hot reload is disabled; ignoring");
            return Ok(false);
        }
        let Some(root) = self.root else {
            log::info!("hot reload with no mounted tree; ignoring");
            return Ok(false);
        };
        self.update_element(root, new_root)?;
        if let Some(el) = self.tree.get_mut(root) {
            el.flags_mut().insert(ElementFlags::DIRTY);
        }
        self.passes.defer(root);
        self.run_pass();
        Ok(true)
    }

    // ---- services ------------------------------------------------------

    pub fn register_service(&mut self, name: &str, service: Rc<dyn Any>) -> Result<(), EngineError> {
        self.services.register(name, service)
    }

    pub fn get_service<T: 'static>(&self, name: &str) -> Result<Option<Rc<T>>, EngineError> {
        self.services.get_as::<T>(name)
    }

    // ---- renderer feedback ---------------------------------------------

    /// Store the renderer-supplied handle for `element`.
    pub fn attach_native_handle(
        &mut self,
        element: ElementId,
        handle: NativeHandle,
    ) -> Result<(), EngineError> {
        if !handle.is_valid() {
            return Err(EngineError::config("native handle is invalid"));
        }
        let el = self
            .tree
            .get_mut(element)
            .ok_or_else(|| EngineError::state(format!("attach to retired element {element}")))?;
        el.set_native_handle(Some(handle));
        Ok(())
    }

    // ---- introspection -------------------------------------------------

    pub fn is_mounted(&self) -> bool {
        self.root.is_some()
    }

    pub fn root(&self) -> Option<ElementId> {
        self.root
    }

    pub fn tree(&self) -> &ElementTree {
        &self.tree
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn last_pass(&self) -> Option<Duration> {
        self.last_pass
    }

    pub fn last_mount(&self) -> Option<Duration> {
        self.last_mount
    }

    pub fn batch_stats(&self) -> BatchStats {
        self.batcher.stats()
    }

    pub fn tracker_stats(&self) -> TrackerStats {
        self.tracker.stats()
    }

    /// Deferred work waiting for the next [`pump`](Self::pump).
    pub fn has_pending_work(&self) -> bool {
        !self.tasks.is_empty() || !self.passes.is_empty() || self.batcher.has_pending()
    }

    // ---- hooks ---------------------------------------------------------

    /// Extract-call-restore around the element's state box, so the state
    /// can borrow the tree-free engine internals during the call.
    fn with_state<R>(
        &mut self,
        element: ElementId,
        f: impl FnOnce(&mut dyn State) -> R,
    ) -> Option<R> {
        let el = self.tree.get_mut(element)?;
        let ElementBody::Stateful { state, .. } = el.body_mut() else {
            return None;
        };
        let mut boxed = state.take()?;
        let result = f(boxed.as_mut());
        if let Some(el) = self.tree.get_mut(element) {
            if let ElementBody::Stateful { state, .. } = el.body_mut() {
                *state = Some(boxed);
            }
        }
        Some(result)
    }

    fn run_state_hook(
        &mut self,
        element: ElementId,
        name: &str,
        f: impl FnOnce(&mut dyn State) -> crate::error::HookResult,
    ) {
        if let Some(Err(err)) = self.with_state(element, f) {
            log::error!("{name} hook failed on element {element}: {err}");
        }
    }

    fn run_init_once(&mut self, element: ElementId) {
        let pending = matches!(
            self.tree.get(element).map(|el| el.body()),
            Some(ElementBody::Stateful {
                initialized: false,
                ..
            })
        );
        if !pending {
            return;
        }
        self.run_state_hook(element, "init", |state| state.init());
        if let Some(el) = self.tree.get_mut(element) {
            if let ElementBody::Stateful { initialized, .. } = el.body_mut() {
                *initialized = true;
            }
        }
    }

    fn run_dispose_once(&mut self, element: ElementId) {
        let pending = matches!(
            self.tree.get(element).map(|el| el.body()),
            Some(ElementBody::Stateful {
                state_disposed: false,
                ..
            })
        );
        if !pending {
            return;
        }
        self.run_state_hook(element, "dispose", |state| state.dispose());
        if let Some(el) = self.tree.get_mut(element) {
            if let ElementBody::Stateful { state_disposed, .. } = el.body_mut() {
                *state_disposed = true;
            }
        }
    }
}

impl Default for RuntimeEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HookResult;
    use std::cell::Cell;

    fn handle() -> NativeHandle {
        NativeHandle::new(1)
    }

    // -- fixture widgets -------------------------------------------------

    struct Label {
        text: &'static str,
    }

    impl Label {
        fn rc(text: &'static str) -> Rc<dyn Widget> {
            Rc::new(Label { text })
        }
    }

    impl Widget for Label {
        fn kind(&self) -> WidgetKind {
            WidgetKind::Stateless
        }

        fn type_name(&self) -> &'static str {
            "Label"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn build(&self, _ctx: &mut BuildContext<'_>) -> Option<RenderNode> {
            Some(RenderNode::new("label").text(self.text))
        }
    }

    struct Panel {
        children: Vec<Rc<dyn Widget>>,
    }

    impl Panel {
        fn rc(children: Vec<Rc<dyn Widget>>) -> Rc<dyn Widget> {
            Rc::new(Panel { children })
        }
    }

    impl Widget for Panel {
        fn kind(&self) -> WidgetKind {
            WidgetKind::Stateless
        }

        fn type_name(&self) -> &'static str {
            "Panel"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn children(&self) -> &[Rc<dyn Widget>] {
            &self.children
        }

        fn build(&self, _ctx: &mut BuildContext<'_>) -> Option<RenderNode> {
            Some(RenderNode::new("panel"))
        }
    }

    struct Counter;

    impl Widget for Counter {
        fn kind(&self) -> WidgetKind {
            WidgetKind::Stateful
        }

        fn type_name(&self) -> &'static str {
            "Counter"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn create_state(&self) -> Option<Box<dyn State>> {
            Some(Box::new(CounterState { count: 0 }))
        }
    }

    struct CounterState {
        count: i64,
    }

    impl State for CounterState {
        fn build(&mut self, _ctx: &mut BuildContext<'_>) -> Option<RenderNode> {
            Some(RenderNode::new("counter").prop("count", self.count))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    /// Stateful widget that misdeclares itself: no state factory.
    struct BrokenStateful;

    impl Widget for BrokenStateful {
        fn kind(&self) -> WidgetKind {
            WidgetKind::Stateful
        }

        fn type_name(&self) -> &'static str {
            "BrokenStateful"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Palette {
        color: &'static str,
        child: [Rc<dyn Widget>; 1],
    }

    impl Palette {
        fn rc(color: &'static str, child: Rc<dyn Widget>) -> Rc<dyn Widget> {
            Rc::new(Palette {
                color,
                child: [child],
            })
        }
    }

    impl Widget for Palette {
        fn kind(&self) -> WidgetKind {
            WidgetKind::Inherited
        }

        fn type_name(&self) -> &'static str {
            "Palette"
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
                .downcast_ref::<Palette>()
                .map(|old| old.color != self.color)
                .unwrap_or(true)
        }
    }

    /// Inherited widget with no child: a configuration error at inflation.
    struct ChildlessPalette;

    impl Widget for ChildlessPalette {
        fn kind(&self) -> WidgetKind {
            WidgetKind::Inherited
        }

        fn type_name(&self) -> &'static str {
            "ChildlessPalette"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Stateless widget that reads the nearest Palette during build.
    struct ColorText;

    impl Widget for ColorText {
        fn kind(&self) -> WidgetKind {
            WidgetKind::Stateless
        }

        fn type_name(&self) -> &'static str {
            "ColorText"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn build(&self, ctx: &mut BuildContext<'_>) -> Option<RenderNode> {
            let color = ctx
                .depend_on_inherited_widget_of_type::<Palette, _>(|p| p.color)
                .unwrap_or("none");
            Some(RenderNode::new("text").prop("color", color))
        }
    }

    /// Stateless widget that records a fine-grained dependency on one
    /// property of the nearest CounterState ancestor.
    struct FieldText {
        property: &'static str,
    }

    impl FieldText {
        fn rc(property: &'static str) -> Rc<dyn Widget> {
            Rc::new(FieldText { property })
        }
    }

    impl Widget for FieldText {
        fn kind(&self) -> WidgetKind {
            WidgetKind::Stateless
        }

        fn type_name(&self) -> &'static str {
            "FieldText"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn build(&self, ctx: &mut BuildContext<'_>) -> Option<RenderNode> {
            if let Some(state) = ctx.find_ancestor_state_id::<CounterState>() {
                ctx.depend_on(state, self.property);
            }
            Some(RenderNode::new("field").prop("property", self.property))
        }
    }

    /// Stateless widget whose build fails on demand.
    struct Flaky {
        ok: Rc<Cell<bool>>,
    }

    impl Widget for Flaky {
        fn kind(&self) -> WidgetKind {
            WidgetKind::Stateless
        }

        fn type_name(&self) -> &'static str {
            "Flaky"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn build(&self, _ctx: &mut BuildContext<'_>) -> Option<RenderNode> {
            if self.ok.get() {
                Some(RenderNode::new("flaky"))
            } else {
                None
            }
        }
    }

    /// Component widget counting its renders in per-instance local state.
    struct Ticker;

    impl Widget for Ticker {
        fn kind(&self) -> WidgetKind {
            WidgetKind::Component
        }

        fn type_name(&self) -> &'static str {
            "Ticker"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn render(&self, _ctx: &mut BuildContext<'_>, scope: &mut ComponentScope) -> Option<RenderNode> {
            let renders = scope.get_or_insert_with(|| 0u64);
            *renders += 1;
            Some(RenderNode::new("ticker").prop("renders", *renders as i64))
        }
    }

    /// Stateful shell whose state is shared by its field children.
    struct Shell {
        children: Vec<Rc<dyn Widget>>,
    }

    impl Widget for Shell {
        fn kind(&self) -> WidgetKind {
            WidgetKind::Stateful
        }

        fn type_name(&self) -> &'static str {
            "Shell"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn children(&self) -> &[Rc<dyn Widget>] {
            &self.children
        }

        fn create_state(&self) -> Option<Box<dyn State>> {
            Some(Box::new(CounterState { count: 0 }))
        }
    }

    /// Stateful widget whose hooks record their firing order.
    struct Journal {
        log: Rc<std::cell::RefCell<Vec<&'static str>>>,
    }

    impl Widget for Journal {
        fn kind(&self) -> WidgetKind {
            WidgetKind::Stateful
        }

        fn type_name(&self) -> &'static str {
            "Journal"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn create_state(&self) -> Option<Box<dyn State>> {
            Some(Box::new(JournalState {
                log: self.log.clone(),
                fail_will_unmount: false,
            }))
        }
    }

    struct JournalState {
        log: Rc<std::cell::RefCell<Vec<&'static str>>>,
        fail_will_unmount: bool,
    }

    impl State for JournalState {
        fn init(&mut self) -> HookResult {
            self.log.borrow_mut().push("init");
            Ok(())
        }

        fn did_mount(&mut self) -> HookResult {
            self.log.borrow_mut().push("did_mount");
            Ok(())
        }

        fn did_update_widget(&mut self, _old_widget: &dyn Widget) -> HookResult {
            self.log.borrow_mut().push("did_update_widget");
            Ok(())
        }

        fn will_unmount(&mut self) -> HookResult {
            self.log.borrow_mut().push("will_unmount");
            if self.fail_will_unmount {
                return Err(crate::error::HookError::new("will_unmount exploded"));
            }
            Ok(())
        }

        fn did_unmount(&mut self) -> HookResult {
            self.log.borrow_mut().push("did_unmount");
            Ok(())
        }

        fn dispose(&mut self) -> HookResult {
            self.log.borrow_mut().push("dispose");
            Ok(())
        }

        fn build(&mut self, _ctx: &mut BuildContext<'_>) -> Option<RenderNode> {
            self.log.borrow_mut().push("build");
            Some(RenderNode::new("journal"))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn counter_count(engine: &RuntimeEngine, element: ElementId) -> i64 {
        match engine.tree().get(element).unwrap().body() {
            ElementBody::Stateful { state, .. } => state
                .as_ref()
                .unwrap()
                .as_any()
                .downcast_ref::<CounterState>()
                .unwrap()
                .count,
            _ => panic!("not a stateful element"),
        }
    }

    // -- mounting --------------------------------------------------------

    #[test]
    fn test_mount_builds_whole_tree() {
        let mut engine = RuntimeEngine::new();
        let root = engine
            .mount(
                Panel::rc(vec![Label::rc("a"), Label::rc("b")]),
                handle(),
            )
            .unwrap();

        assert!(engine.is_mounted());
        assert_eq!(engine.tree().len(), 3);
        let root_el = engine.tree().get(root).unwrap();
        assert_eq!(root_el.children().len(), 2);
        assert!(root_el.render_node().is_some());
        for &child in root_el.children() {
            let child_el = engine.tree().get(child).unwrap();
            assert!(child_el.is_mounted());
            assert!(child_el.render_node().is_some());
            assert_eq!(child_el.depth(), 1);
        }
    }

    #[test]
    fn test_depth_invariant_on_deep_chain() {
        fn nest(levels: usize) -> Rc<dyn Widget> {
            if levels == 0 {
                Label::rc("leaf")
            } else {
                Panel::rc(vec![nest(levels - 1)])
            }
        }

        let mut engine = RuntimeEngine::new();
        let root = engine.mount(nest(11), handle()).unwrap();

        let mut current = root;
        let mut expected_depth = 0;
        loop {
            let el = engine.tree().get(current).unwrap();
            assert_eq!(el.depth(), expected_depth);
            match el.children().first() {
                Some(&child) => {
                    assert_eq!(
                        engine.tree().get(child).unwrap().depth(),
                        el.depth() + 1
                    );
                    current = child;
                    expected_depth += 1;
                }
                None => break,
            }
        }
        assert_eq!(expected_depth, 11);
    }

    #[test]
    fn test_double_mount_fails_and_leaves_state_unchanged() {
        let mut engine = RuntimeEngine::new();
        let root = engine.mount(Label::rc("x"), handle()).unwrap();

        let err = engine.mount(Label::rc("y"), handle()).unwrap_err();
        assert!(matches!(err, EngineError::State(_)));
        assert_eq!(engine.root(), Some(root));
        assert!(engine.tree().get(root).unwrap().is_mounted());
    }

    #[test]
    fn test_mount_rejects_invalid_handle() {
        let mut engine = RuntimeEngine::new();
        let err = engine.mount(Label::rc("x"), NativeHandle::new(0)).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(!engine.is_mounted());
    }

    #[test]
    fn test_missing_state_factory_is_fatal() {
        let mut engine = RuntimeEngine::new();
        let err = engine.mount(Rc::new(BrokenStateful), handle()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(!engine.is_mounted());
        assert!(engine.tree().is_empty());
    }

    #[test]
    fn test_inherited_without_child_is_fatal() {
        let mut engine = RuntimeEngine::new();
        let err = engine.mount(Rc::new(ChildlessPalette), handle()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    // -- unmounting ------------------------------------------------------

    #[test]
    fn test_unmount_element_clears_children_leaf_to_root() {
        let mut engine = RuntimeEngine::new();
        let root = engine
            .mount(Panel::rc(vec![Label::rc("c1"), Label::rc("c2")]), handle())
            .unwrap();
        let children = engine.tree().get(root).unwrap().children().to_vec();

        engine.unmount_element(root);

        for child in children {
            assert!(!engine.tree().get(child).unwrap().is_mounted());
        }
        let root_el = engine.tree().get(root).unwrap();
        assert!(!root_el.is_mounted());
        assert!(root_el.children().is_empty());
        assert!(root_el.render_node().is_none());
        assert!(root_el.native_handle().is_none());
    }

    #[test]
    fn test_double_unmount_is_safe() {
        let mut engine = RuntimeEngine::new();
        engine.mount(Label::rc("x"), handle()).unwrap();

        engine.unmount();
        assert!(!engine.is_mounted());
        // Second unmount warns and does nothing.
        engine.unmount();
        assert!(!engine.is_mounted());
        assert!(engine.tree().is_empty());
    }

    #[test]
    fn test_remount_after_unmount_is_allowed_at_engine_level() {
        let mut engine = RuntimeEngine::new();
        engine.mount(Label::rc("first"), handle()).unwrap();
        engine.unmount();

        // A fresh descriptor mounts fine; the old element ids are stale.
        let root = engine.mount(Label::rc("second"), handle()).unwrap();
        assert!(engine.tree().get(root).unwrap().is_mounted());
    }

    #[test]
    fn test_hook_order_across_lifecycle() {
        let log = Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut engine = RuntimeEngine::new();
        let root = engine
            .mount(Rc::new(Journal { log: log.clone() }), handle())
            .unwrap();
        engine.update_element(root, Rc::new(Journal { log: log.clone() })).unwrap();
        engine.unmount();

        assert_eq!(
            *log.borrow(),
            vec![
                "init",
                "build",
                "did_mount",
                "did_update_widget",
                "will_unmount",
                "dispose",
                "did_unmount",
            ]
        );
    }

    #[test]
    fn test_failing_hook_does_not_stop_phase() {
        let log = Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut engine = RuntimeEngine::new();
        let root = engine
            .mount(Rc::new(Journal { log: log.clone() }), handle())
            .unwrap();
        // Make will_unmount fail.
        if let Some(el) = engine.tree.get_mut(root) {
            if let ElementBody::Stateful { state, .. } = el.body_mut() {
                state
                    .as_mut()
                    .unwrap()
                    .as_any_mut()
                    .downcast_mut::<JournalState>()
                    .unwrap()
                    .fail_will_unmount = true;
            }
        }

        engine.unmount();
        let entries = log.borrow();
        // dispose and did_unmount still ran after the failing hook.
        assert!(entries.contains(&"will_unmount"));
        assert!(entries.contains(&"dispose"));
        assert!(entries.contains(&"did_unmount"));
    }

    // -- batching --------------------------------------------------------

    #[test]
    fn test_three_set_states_one_build() {
        let mut engine = RuntimeEngine::new();
        let root = engine.mount(Rc::new(Counter), handle()).unwrap();
        assert_eq!(engine.tree().get(root).unwrap().build_count(), 1);

        for _ in 0..3 {
            engine.update_state::<CounterState>(root, |state| state.count += 1);
        }
        // Nothing applied inside the turn.
        assert_eq!(counter_count(&engine, root), 0);

        engine.pump();

        assert_eq!(counter_count(&engine, root), 3);
        // Exactly one flush and one extra build.
        assert_eq!(engine.batch_stats().batches, 1);
        assert_eq!(engine.batch_stats().last_batch, 3);
        assert_eq!(engine.tree().get(root).unwrap().build_count(), 2);
        let node = engine.tree().get(root).unwrap().render_node().unwrap().clone();
        assert_eq!(node.props.get("count"), Some(&crate::render::PropValue::Int(3)));
    }

    #[test]
    fn test_hundred_mutations_single_flush_and_dirty_mark() {
        let mut engine = RuntimeEngine::new();
        let root = engine.mount(Rc::new(Counter), handle()).unwrap();

        for _ in 0..100 {
            engine.update_state::<CounterState>(root, |state| state.count += 1);
        }
        assert_eq!(engine.tasks.len(), 1);

        engine.pump();
        assert_eq!(counter_count(&engine, root), 100);
        assert_eq!(engine.batch_stats().batches, 1);
        assert_eq!(engine.batch_stats().largest_batch, 100);
        assert_eq!(engine.stats().frames, 1);
    }

    #[test]
    fn test_batching_disabled_applies_synchronously() {
        let mut engine = RuntimeEngine::with_config(EngineConfig {
            batching_enabled: false,
            ..EngineConfig::default()
        });
        let root = engine.mount(Rc::new(Counter), handle()).unwrap();

        engine.update_state::<CounterState>(root, |state| state.count = 9);
        assert_eq!(counter_count(&engine, root), 9);
        assert!(engine.tree().get(root).unwrap().is_dirty());
    }

    // -- fine-grained invalidation --------------------------------------

    #[test]
    fn test_property_change_dirties_only_its_dependents() {
        let mut engine = RuntimeEngine::new();
        let root = engine
            .mount(
                Rc::new(Shell {
                    children: vec![FieldText::rc("name"), FieldText::rc("email")],
                }),
                handle(),
            )
            .unwrap();
        let state = engine.tree().get(root).unwrap().state_id().unwrap();
        let children = engine.tree().get(root).unwrap().children().to_vec();
        let (d1, d2) = (children[0], children[1]);

        assert_eq!(engine.get_dependents(state, "name"), vec![d1]);
        assert_eq!(engine.get_dependents(state, "email"), vec![d2]);

        assert_eq!(engine.notify_property_change(state, "name"), 1);
        assert!(engine.tree().get(d1).unwrap().is_dirty());
        assert!(!engine.tree().get(d2).unwrap().is_dirty());

        engine.pump();
        assert!(!engine.tree().get(d1).unwrap().is_dirty());

        assert_eq!(engine.notify_property_change(state, "email"), 1);
        assert!(engine.tree().get(d2).unwrap().is_dirty());
        assert!(!engine.tree().get(d1).unwrap().is_dirty());
    }

    #[test]
    fn test_disposed_element_never_returned_as_dependent() {
        let mut engine = RuntimeEngine::new();
        let root = engine
            .mount(
                Rc::new(Shell {
                    children: vec![FieldText::rc("name")],
                }),
                handle(),
            )
            .unwrap();
        let state = engine.tree().get(root).unwrap().state_id().unwrap();
        let dependent = engine.tree().get(root).unwrap().children()[0];
        assert_eq!(engine.get_dependents(state, "name"), vec![dependent]);

        engine.dispose_element(dependent);
        assert!(engine.get_dependents(state, "name").is_empty());
        assert_eq!(engine.notify_property_change(state, "name"), 0);
    }

    // -- inherited propagation ------------------------------------------

    #[test]
    fn test_inherited_update_notifies_by_hook_decision() {
        let mut engine = RuntimeEngine::new();
        let root = engine
            .mount(Palette::rc("blue", Rc::new(ColorText)), handle())
            .unwrap();
        let dependent = engine.tree().get(root).unwrap().children()[0];
        assert_eq!(engine.tree().get(dependent).unwrap().build_count(), 1);

        // Color change: hook returns true, dependent goes dirty.
        engine
            .update_element(root, Palette::rc("red", Rc::new(ColorText)))
            .unwrap();
        assert!(engine.tree().get(dependent).unwrap().is_dirty());
        engine.pump();
        assert_eq!(engine.tree().get(dependent).unwrap().build_count(), 2);

        // Same color: hook returns false, dependent stays clean.
        engine
            .update_element(root, Palette::rc("red", Rc::new(ColorText)))
            .unwrap();
        assert!(!engine.tree().get(dependent).unwrap().is_dirty());
        engine.pump();
        assert_eq!(engine.tree().get(dependent).unwrap().build_count(), 2);
    }

    #[test]
    fn test_dependents_rebuild_in_same_pass_top_down() {
        let mut engine = RuntimeEngine::new();
        let root = engine
            .mount(Palette::rc("blue", Rc::new(ColorText)), handle())
            .unwrap();
        let dependent = engine.tree().get(root).unwrap().children()[0];

        engine
            .update_element(root, Palette::rc("green", Rc::new(ColorText)))
            .unwrap();
        engine.pump();

        // One pass rebuilt both provider and dependent.
        assert_eq!(engine.stats().frames, 1);
        let node = engine
            .tree()
            .get(dependent)
            .unwrap()
            .render_node()
            .unwrap()
            .clone();
        assert_eq!(
            node.props.get("color"),
            Some(&crate::render::PropValue::Text("green".to_string()))
        );
    }

    // -- updates ---------------------------------------------------------

    #[test]
    fn test_update_with_identical_descriptor_is_noop() {
        let mut engine = RuntimeEngine::new();
        let widget = Label::rc("same");
        let root = engine.mount(widget.clone(), handle()).unwrap();

        assert!(!engine.update_element(root, widget).unwrap());
        assert!(!engine.tree().get(root).unwrap().is_dirty());
    }

    #[test]
    fn test_update_with_different_type_fails() {
        let mut engine = RuntimeEngine::new();
        let root = engine.mount(Label::rc("x"), handle()).unwrap();

        let err = engine.update_element(root, Rc::new(Counter)).unwrap_err();
        assert!(matches!(err, EngineError::State(_)));
    }

    // -- reentrancy ------------------------------------------------------

    #[test]
    fn test_nested_rebuild_coalesces_into_one_build() {
        let mut engine = RuntimeEngine::new();
        let root = engine.mount(Label::rc("x"), handle()).unwrap();
        assert_eq!(engine.tree().get(root).unwrap().build_count(), 1);

        // Simulate a rebuild request arriving while the element is mid-build.
        engine
            .tree
            .get_mut(root)
            .unwrap()
            .flags_mut()
            .insert(ElementFlags::BUILDING);
        assert!(!engine.rebuild(root).unwrap());
        // No synchronous second build; the request was deferred.
        assert_eq!(engine.tree().get(root).unwrap().build_count(), 1);
        assert!(engine.tree().get(root).unwrap().is_dirty());

        engine
            .tree
            .get_mut(root)
            .unwrap()
            .flags_mut()
            .remove(ElementFlags::BUILDING);
        engine.pump();
        assert_eq!(engine.tree().get(root).unwrap().build_count(), 2);
    }

    // -- failure isolation ----------------------------------------------

    #[test]
    fn test_failed_build_keeps_prior_node_and_stays_dirty() {
        let ok = Rc::new(Cell::new(true));
        let mut engine = RuntimeEngine::new();
        let root = engine
            .mount(Rc::new(Flaky { ok: ok.clone() }), handle())
            .unwrap();
        let first_node = engine.tree().get(root).unwrap().render_node().unwrap().clone();

        ok.set(false);
        engine.mark_needs_build(root);
        engine.pump();

        let el = engine.tree().get(root).unwrap();
        assert_eq!(el.render_node(), Some(&first_node));
        assert!(el.is_dirty());
        assert_eq!(el.build_count(), 1);

        // Once the widget recovers, the retry succeeds on a later turn.
        ok.set(true);
        engine.pump();
        let el = engine.tree().get(root).unwrap();
        assert!(!el.is_dirty());
        assert_eq!(el.build_count(), 2);
    }

    #[test]
    fn test_one_failing_element_does_not_stop_the_pass() {
        let ok = Rc::new(Cell::new(true));
        let mut engine = RuntimeEngine::new();
        let root = engine
            .mount(
                Panel::rc(vec![
                    Rc::new(Flaky { ok: ok.clone() }),
                    Label::rc("healthy"),
                ]),
                handle(),
            )
            .unwrap();
        let children = engine.tree().get(root).unwrap().children().to_vec();
        let (flaky, healthy) = (children[0], children[1]);

        ok.set(false);
        engine.mark_needs_build(flaky);
        engine.mark_needs_build(healthy);
        engine.pump();

        assert!(engine.tree().get(flaky).unwrap().is_dirty());
        assert_eq!(engine.tree().get(healthy).unwrap().build_count(), 2);
        assert!(!engine.tree().get(healthy).unwrap().is_dirty());
    }

    // -- passes ----------------------------------------------------------

    #[test]
    fn test_many_marks_one_pass() {
        let mut engine = RuntimeEngine::new();
        let root = engine
            .mount(Panel::rc(vec![Label::rc("a"), Label::rc("b")]), handle())
            .unwrap();
        let children = engine.tree().get(root).unwrap().children().to_vec();

        engine.mark_needs_build(root);
        engine.mark_needs_build(children[0]);
        engine.mark_needs_build(children[1]);
        engine.mark_needs_build(root);

        engine.pump();
        assert_eq!(engine.stats().frames, 1);
        assert_eq!(engine.tree().get(root).unwrap().build_count(), 2);

        // An idle pump runs no pass.
        engine.pump();
        assert_eq!(engine.stats().frames, 1);
    }

    #[test]
    fn test_mark_needs_build_warns_instead_of_failing() {
        let mut engine = RuntimeEngine::new();
        let root = engine.mount(Label::rc("x"), handle()).unwrap();
        engine.unmount();

        // Stale id: no panic, no error.
        engine.mark_needs_build(root);
        assert!(!engine.has_pending_work());
    }

    // -- component elements ---------------------------------------------

    #[test]
    fn test_component_local_state_persists_across_rebuilds() {
        let mut engine = RuntimeEngine::new();
        let root = engine.mount(Rc::new(Ticker), handle()).unwrap();

        engine.mark_needs_build(root);
        engine.pump();
        engine.mark_needs_build(root);
        engine.pump();

        let node = engine.tree().get(root).unwrap().render_node().unwrap().clone();
        assert_eq!(node.props.get("renders"), Some(&crate::render::PropValue::Int(3)));
    }

    // -- hot reload ------------------------------------------------------

    #[test]
    fn test_hot_reload_swaps_root_and_forces_pass() {
        let mut engine = RuntimeEngine::new();
        let root = engine.mount(Label::rc("before"), handle()).unwrap();
        let frames_before = engine.stats().frames;

        assert!(engine.hot_reload(Label::rc("after")).unwrap());
        let node = engine.tree().get(root).unwrap().render_node().unwrap().clone();
        assert_eq!(
            node.children,
            vec![crate::render::RenderChild::Text("after".to_string())]
        );
        assert_eq!(engine.stats().frames, frames_before + 1);
    }

    #[test]
    fn test_hot_reload_noop_when_disabled() {
        let mut engine = RuntimeEngine::with_config(EngineConfig {
            hot_reload_enabled: false,
            ..EngineConfig::default()
        });
        let root = engine.mount(Label::rc("before"), handle()).unwrap();

        assert!(!engine.hot_reload(Label::rc("after")).unwrap());
        let node = engine.tree().get(root).unwrap().render_node().unwrap().clone();
        assert_eq!(
            node.children,
            vec![crate::render::RenderChild::Text("before".to_string())]
        );
    }

    #[test]
    fn test_hot_reload_noop_when_unmounted() {
        let mut engine = RuntimeEngine::new();
        assert!(!engine.hot_reload(Label::rc("x")).unwrap());
    }

    // -- services --------------------------------------------------------

    #[test]
    fn test_service_registration_and_typed_lookup() {
        let mut engine = RuntimeEngine::new();
        engine
            .register_service("config", Rc::new(42u32))
            .unwrap();

        assert_eq!(
            engine.get_service::<u32>("config").unwrap().as_deref(),
            Some(&42)
        );
        assert!(engine.get_service::<u32>("missing").unwrap().is_none());
        // Wrong type reads as absent.
        assert!(engine.get_service::<String>("config").unwrap().is_none());
        assert!(engine.register_service("", Rc::new(1u8)).is_err());
        assert!(engine.get_service::<u32>("").is_err());
    }

    #[test]
    fn test_services_survive_unmount_until_dispose() {
        let mut engine = RuntimeEngine::new();
        engine.register_service("clock", Rc::new(7i64)).unwrap();
        engine.mount(Label::rc("x"), handle()).unwrap();
        engine.unmount();
        assert_eq!(
            engine.get_service::<i64>("clock").unwrap().as_deref(),
            Some(&7)
        );

        engine.dispose();
        assert!(engine.get_service::<i64>("clock").unwrap().is_none());
        assert!(matches!(
            engine.mount(Label::rc("x"), handle()),
            Err(EngineError::State(_))
        ));
    }

    // -- renderer feedback -----------------------------------------------

    #[test]
    fn test_attach_native_handle() {
        let mut engine = RuntimeEngine::new();
        let root = engine
            .mount(Panel::rc(vec![Label::rc("a")]), handle())
            .unwrap();
        let child = engine.tree().get(root).unwrap().children()[0];

        engine.attach_native_handle(child, NativeHandle::new(99)).unwrap();
        assert_eq!(
            engine.tree().get(child).unwrap().native_handle().map(|h| h.raw()),
            Some(99)
        );
        assert!(engine
            .attach_native_handle(child, NativeHandle::new(0))
            .is_err());

        engine.unmount_element(child);
        assert!(engine.tree().get(child).unwrap().native_handle().is_none());
    }
}
