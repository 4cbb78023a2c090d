//! Coalescing of state mutations into one deferred flush per turn.
//!
//! Mutations queued against an element accumulate in enqueue order; the
//! first queue of a turn schedules exactly one [`Task::FlushUpdates`], and
//! every later queue in the same turn rides along. The flush takes the
//! whole pending map up front, so mutations enqueued *during* a flush land
//! in a fresh map and defer to the next flush — the re-entrancy guarantee
//! comes from ownership, not from a flag.
//!
//! A failing mutation is logged and skipped; the rest of its batch still
//! applies, and pending bookkeeping is cleared even on partial failure.

use std::collections::HashMap;

use crate::element::{ElementBody, ElementFlags, ElementId};
use crate::error::MutationError;
use crate::scheduler::{PassQueue, Task, TaskQueue};
use crate::state::State;
use crate::tree::ElementTree;

/// A queued state mutation. Applied once, in enqueue order, against the
/// owning element's state.
pub type Mutation = Box<dyn FnOnce(&mut dyn State) -> Result<(), MutationError>>;

/// Snapshot of batching statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    /// Flushes that executed (including forced and empty ones).
    pub batches: u64,
    /// Mutations applied across all batches.
    pub mutations: u64,
    /// Mutations applied by the most recent batch.
    pub last_batch: usize,
    /// Largest batch observed.
    pub largest_batch: usize,
}

impl BatchStats {
    /// Running average of mutations per batch.
    pub fn average(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.mutations as f64 / self.batches as f64
        }
    }
}

/// Coalesces queued state mutations into one deferred flush per turn.
pub struct UpdateBatcher {
    pending: HashMap<ElementId, Vec<Mutation>>,
    /// Elements in first-queued order, so flush iteration is deterministic.
    order: Vec<ElementId>,
    flush_scheduled: bool,
    enabled: bool,
    stats: BatchStats,
}

impl UpdateBatcher {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            order: Vec::new(),
            flush_scheduled: false,
            enabled: true,
            stats: BatchStats::default(),
        }
    }

    /// Queue `mutation` against `element`'s state.
    ///
    /// With batching disabled the mutation applies immediately and the
    /// element is marked dirty synchronously. Otherwise the mutation is
    /// appended to the element's pending list and at most one flush is
    /// scheduled for the turn.
    pub fn queue_update(
        &mut self,
        tree: &mut ElementTree,
        passes: &mut PassQueue,
        tasks: &mut TaskQueue,
        element: ElementId,
        mutation: Mutation,
    ) {
        if !self.enabled {
            let applied = apply_to_element(tree, passes, tasks, element, vec![mutation]);
            self.stats.batches += 1;
            self.stats.mutations += applied as u64;
            self.stats.last_batch = applied;
            self.stats.largest_batch = self.stats.largest_batch.max(applied);
            return;
        }

        if !self.pending.contains_key(&element) {
            self.order.push(element);
        }
        self.pending.entry(element).or_default().push(mutation);

        if !self.flush_scheduled {
            self.flush_scheduled = true;
            tasks.schedule(Task::FlushUpdates);
        }
    }

    /// Apply every pending mutation, in per-element enqueue order.
    ///
    /// Unmounted or stale elements are skipped and their mutations
    /// discarded. Returns the number of mutations applied.
    pub fn flush(
        &mut self,
        tree: &mut ElementTree,
        passes: &mut PassQueue,
        tasks: &mut TaskQueue,
    ) -> usize {
        self.flush_scheduled = false;
        let mut pending = std::mem::take(&mut self.pending);
        let order = std::mem::take(&mut self.order);

        let mut applied = 0;
        for element in order {
            let Some(mutations) = pending.remove(&element) else {
                continue;
            };
            applied += apply_to_element(tree, passes, tasks, element, mutations);
        }

        self.stats.batches += 1;
        self.stats.mutations += applied as u64;
        self.stats.last_batch = applied;
        self.stats.largest_batch = self.stats.largest_batch.max(applied);
        applied
    }

    /// Immediate synchronous flush, bypassing the deferral.
    pub fn force_flush(
        &mut self,
        tree: &mut ElementTree,
        passes: &mut PassQueue,
        tasks: &mut TaskQueue,
    ) -> usize {
        self.flush(tree, passes, tasks)
    }

    /// Toggle batching. Disabling mid-flight force-flushes anything queued.
    pub fn set_enabled(
        &mut self,
        tree: &mut ElementTree,
        passes: &mut PassQueue,
        tasks: &mut TaskQueue,
        enabled: bool,
    ) {
        self.enabled = enabled;
        if !enabled && self.has_pending() {
            self.force_flush(tree, passes, tasks);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Total mutations currently queued across all elements.
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.flush_scheduled
    }

    /// Drop all pending work without applying it.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
        self.order.clear();
        self.flush_scheduled = false;
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }
}

impl Default for UpdateBatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply one element's mutations against its state, marking it dirty once.
/// Returns the number of mutations that ran without error.
fn apply_to_element(
    tree: &mut ElementTree,
    passes: &mut PassQueue,
    tasks: &mut TaskQueue,
    element: ElementId,
    mutations: Vec<Mutation>,
) -> usize {
    let Some(el) = tree.get_mut(element) else {
        log::debug!("discarding {} mutations for retired element", mutations.len());
        return 0;
    };
    if !el.is_mounted() {
        log::debug!(
            "discarding {} mutations for unmounted element {element}",
            mutations.len()
        );
        return 0;
    }
    let ElementBody::Stateful { state, .. } = el.body_mut() else {
        log::warn!("discarding mutations: element {element} has no state");
        return 0;
    };
    let Some(mut boxed) = state.take() else {
        log::warn!("discarding mutations: state of element {element} is unavailable");
        return 0;
    };

    let mut applied = 0;
    for mutation in mutations {
        match mutation(boxed.as_mut()) {
            Ok(()) => applied += 1,
            Err(err) => log::error!("mutation on element {element} failed: {err}"),
        }
    }

    // Restore the state box, then mark dirty exactly once.
    if let Some(el) = tree.get_mut(element) {
        if let ElementBody::Stateful { state, .. } = el.body_mut() {
            *state = Some(boxed);
        }
        if !el.is_dirty() {
            el.flags_mut().insert(ElementFlags::DIRTY);
            passes.enqueue(element, tasks);
        }
    }
    applied
}
