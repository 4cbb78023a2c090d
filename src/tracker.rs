//! Fine-grained dependency tracking between state properties and elements.
//!
//! The tracker maintains a bipartite graph: `(state, property)` keys map to
//! the elements that read them, and a reverse index maps each element back
//! to its keys. Both directions are kept current so notification walks only
//! a key's own dependents and cleanup walks only an element's own edges —
//! never the whole graph.
//!
//! Recording is session-scoped: the engine opens a session around each
//! build, and reads recorded while it is open attribute to the innermost
//! session's element. Sessions nest (a build can trigger lookups inside
//! helper builds), matching the tracking-stack discipline of a reactive
//! runtime.

use std::collections::{HashMap, HashSet};

use crate::element::{ElementFlags, ElementId};
use crate::scheduler::{PassQueue, TaskQueue};
use crate::state::StateId;
use crate::tree::ElementTree;

/// Snapshot of tracker diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStats {
    /// Dependency edges recorded since creation.
    pub records: u64,
    /// Largest dependent set ever observed for a single key.
    pub peak_dependents: usize,
    /// Notify calls that newly marked at least one element, regardless of
    /// fan-out.
    pub rebuilds_triggered: u64,
}

/// Directed dependency graph from `(state, property)` to dependent elements.
pub struct StateTracker {
    /// Innermost-last stack of elements currently recording reads.
    sessions: Vec<ElementId>,
    /// `state → property → dependents`.
    dependents: HashMap<StateId, HashMap<String, HashSet<ElementId>>>,
    /// `element → (state, property)` reverse index for targeted cleanup.
    edges: HashMap<ElementId, HashSet<(StateId, String)>>,
    /// Dependent-set size past which a warning is logged (0 disables).
    warn_threshold: usize,
    stats: TrackerStats,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::with_warn_threshold(0)
    }

    pub fn with_warn_threshold(warn_threshold: usize) -> Self {
        Self {
            sessions: Vec::new(),
            dependents: HashMap::new(),
            edges: HashMap::new(),
            warn_threshold,
            stats: TrackerStats::default(),
        }
    }

    /// Open a tracking session for `element`. Reads recorded until the
    /// matching [`stop_tracking`](Self::stop_tracking) attribute to it.
    pub fn start_tracking(&mut self, element: ElementId) {
        self.sessions.push(element);
    }

    /// Close the innermost session. A stop with no open session is a safe
    /// no-op.
    pub fn stop_tracking(&mut self) -> Option<ElementId> {
        self.sessions.pop()
    }

    /// The element currently recording reads, if any.
    pub fn current(&self) -> Option<ElementId> {
        self.sessions.last().copied()
    }

    /// Record that the current session's element reads `(state, property)`.
    ///
    /// No-op when no session is open or the property name is empty.
    pub fn record_dependency(&mut self, state: StateId, property: &str) {
        let Some(element) = self.current() else {
            return;
        };
        if property.is_empty() {
            return;
        }

        let set = self
            .dependents
            .entry(state)
            .or_default()
            .entry(property.to_string())
            .or_default();
        set.insert(element);

        let fan_out = set.len();
        if fan_out > self.stats.peak_dependents {
            self.stats.peak_dependents = fan_out;
        }
        if self.warn_threshold != 0 && fan_out == self.warn_threshold + 1 {
            log::warn!(
                "dependent set for state {}/{property} crossed {} elements",
                state.as_u64(),
                self.warn_threshold
            );
        }

        self.edges
            .entry(element)
            .or_default()
            .insert((state, property.to_string()));
        self.stats.records += 1;
    }

    /// Dependents of `(state, property)`, filtered to mounted elements.
    pub fn get_dependents(
        &self,
        tree: &ElementTree,
        state: StateId,
        property: &str,
    ) -> Vec<ElementId> {
        self.dependents
            .get(&state)
            .and_then(|props| props.get(property))
            .map(|set| {
                set.iter()
                    .copied()
                    .filter(|id| tree.get(*id).is_some_and(|el| el.is_mounted()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mark every mounted, not-yet-dirty dependent of `(state, property)`
    /// dirty. Returns the number newly marked.
    pub fn notify_property_change(
        &mut self,
        tree: &mut ElementTree,
        passes: &mut PassQueue,
        tasks: &mut TaskQueue,
        state: StateId,
        property: &str,
    ) -> usize {
        let targets: Vec<ElementId> = self
            .dependents
            .get(&state)
            .and_then(|props| props.get(property))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        self.mark_targets(tree, passes, tasks, targets)
    }

    /// Union the dependents across `properties` and mark each distinct
    /// element once. Returns the number newly marked.
    pub fn notify_multiple_changes(
        &mut self,
        tree: &mut ElementTree,
        passes: &mut PassQueue,
        tasks: &mut TaskQueue,
        state: StateId,
        properties: &[&str],
    ) -> usize {
        let mut targets: Vec<ElementId> = Vec::new();
        let mut seen: HashSet<ElementId> = HashSet::new();
        if let Some(props) = self.dependents.get(&state) {
            for property in properties {
                if let Some(set) = props.get(*property) {
                    for &id in set {
                        if seen.insert(id) {
                            targets.push(id);
                        }
                    }
                }
            }
        }
        self.mark_targets(tree, passes, tasks, targets)
    }

    fn mark_targets(
        &mut self,
        tree: &mut ElementTree,
        passes: &mut PassQueue,
        tasks: &mut TaskQueue,
        targets: Vec<ElementId>,
    ) -> usize {
        let mut marked = 0;
        for id in targets {
            let Some(element) = tree.get_mut(id) else {
                continue;
            };
            if !element.is_mounted() || element.is_dirty() {
                continue;
            }
            element.flags_mut().insert(ElementFlags::DIRTY);
            passes.enqueue(id, tasks);
            marked += 1;
        }
        if marked > 0 {
            self.stats.rebuilds_triggered += 1;
        }
        marked
    }

    /// Drop every edge recorded for `element`. O(that element's edges).
    pub fn clear_dependencies(&mut self, element: ElementId) {
        let Some(edges) = self.edges.remove(&element) else {
            return;
        };
        for (state, property) in edges {
            if let Some(props) = self.dependents.get_mut(&state) {
                if let Some(set) = props.get_mut(&property) {
                    set.remove(&element);
                    if set.is_empty() {
                        props.remove(&property);
                    }
                }
                if props.is_empty() {
                    self.dependents.remove(&state);
                }
            }
        }
    }

    /// Drop every edge of one `(state, property)` key. O(that key's edges).
    pub fn clear_property_dependencies(&mut self, state: StateId, property: &str) {
        let Some(props) = self.dependents.get_mut(&state) else {
            return;
        };
        let Some(set) = props.remove(property) else {
            return;
        };
        if props.is_empty() {
            self.dependents.remove(&state);
        }
        for element in set {
            if let Some(edges) = self.edges.get_mut(&element) {
                edges.remove(&(state, property.to_string()));
                if edges.is_empty() {
                    self.edges.remove(&element);
                }
            }
        }
    }

    /// Drop every edge of one state across all its properties. O(that
    /// state's edges).
    pub fn clear_state_dependencies(&mut self, state: StateId) {
        let Some(props) = self.dependents.remove(&state) else {
            return;
        };
        for (property, set) in props {
            for element in set {
                if let Some(edges) = self.edges.get_mut(&element) {
                    edges.remove(&(state, property.clone()));
                    if edges.is_empty() {
                        self.edges.remove(&element);
                    }
                }
            }
        }
    }

    /// Drop the whole graph and any open sessions. Stats survive.
    pub fn reset(&mut self) {
        self.sessions.clear();
        self.dependents.clear();
        self.edges.clear();
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
