//! Mutable state attached to stateful elements.
//!
//! A [`State`] object is constructed exactly once per stateful element (at
//! inflation, not at mount) by the widget's state factory, and persists
//! across rebuilds until the element is unmounted. Lifecycle hooks return a
//! [`HookResult`] so a failing hook can be logged without stopping the
//! remaining hooks of the same phase.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::BuildContext;
use crate::error::HookResult;
use crate::render::RenderNode;
use crate::widget::Widget;

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a state object in the dependency tracker.
///
/// Monotonic; never reused within a process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StateId(u64);

impl StateId {
    /// Allocate a fresh state id.
    pub fn next() -> Self {
        StateId(NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Per-element mutable state for stateful widgets.
///
/// `build` runs on every rebuild; the hooks run at most once per lifecycle
/// phase. Init runs before the first build, dispose after the last unmount.
pub trait State: 'static {
    /// One-time initialization, before the first build.
    fn init(&mut self) -> HookResult {
        Ok(())
    }

    /// The element and its subtree finished mounting.
    fn did_mount(&mut self) -> HookResult {
        Ok(())
    }

    /// The element's widget was swapped for a new descriptor.
    fn did_update_widget(&mut self, _old_widget: &dyn Widget) -> HookResult {
        Ok(())
    }

    /// The element is about to leave the tree.
    fn will_unmount(&mut self) -> HookResult {
        Ok(())
    }

    /// The element has left the tree.
    fn did_unmount(&mut self) -> HookResult {
        Ok(())
    }

    /// One-time teardown, after unmount.
    fn dispose(&mut self) -> HookResult {
        Ok(())
    }

    /// Produce the element's render node. Returning `None` is a build
    /// failure: the runtime keeps the previous node and retries later.
    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Option<RenderNode>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
