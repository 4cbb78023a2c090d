//! Arbor — a reactive element-tree runtime.
//!
//! Arbor mounts a tree of immutable widget descriptors into live elements,
//! tracks which elements must rebuild when data changes, and coalesces many
//! state mutations into a single scheduled rebuild pass. It is the
//! invalidation core of a UI framework: the renderer (diff/patch, layout,
//! paint) sits on the far side of the [`RenderNode`] boundary and is not
//! part of this crate.
//!
//! ## How work flows
//!
//! 1. The application mutates state through
//!    [`RuntimeEngine::update_state`]; the mutation is queued, not applied.
//! 2. At the end of the turn the host calls [`RuntimeEngine::pump`]: the
//!    batcher applies every queued mutation in order and marks the owning
//!    elements dirty.
//! 3. A rebuild pass takes the dirty snapshot and rebuilds it top-down;
//!    each build runs under a [`BuildContext`] that resolves ancestors,
//!    inherited values, and services, and records fine-grained property
//!    dependencies.
//! 4. Produced [`RenderNode`]s are stored per element for the external
//!    renderer to consume.
//!
//! Everything is single-threaded and cooperative: N triggers in one turn
//! collapse into one flush and one pass.
//!
//! ## Example
//!
//! ```ignore
//! let mut engine = RuntimeEngine::new();
//! let root = engine.mount(Rc::new(app_widget()), NativeHandle::new(1))?;
//!
//! engine.update_state::<AppState>(root, |state| state.count += 1);
//! engine.update_state::<AppState>(root, |state| state.count += 1);
//! engine.pump(); // one flush, one rebuild
//! ```

pub mod batcher;
pub mod context;
pub mod element;
pub mod engine;
pub mod error;
pub mod inherited;
pub mod render;
pub mod scheduler;
pub mod state;
pub mod tracker;
pub mod tree;
pub mod widget;

pub use batcher::{BatchStats, Mutation, UpdateBatcher};
pub use context::BuildContext;
pub use element::{Element, ElementFlags, ElementId};
pub use engine::{EngineConfig, EngineStats, RuntimeEngine, ServiceRegistry};
pub use error::{EngineError, HookError, HookResult, MutationError};
pub use inherited::{Brightness, MediaQuery, MediaQueryData, Theme, ThemeData};
pub use render::{Bounds, NativeHandle, PropValue, RenderChild, RenderNode, Size};
pub use state::{State, StateId};
pub use tracker::{StateTracker, TrackerStats};
pub use tree::ElementTree;
pub use widget::{ComponentScope, Widget, WidgetKind};

pub mod prelude {
    pub use crate::context::BuildContext;
    pub use crate::element::ElementId;
    pub use crate::engine::{EngineConfig, RuntimeEngine};
    pub use crate::error::{EngineError, HookResult};
    pub use crate::inherited::{MediaQuery, MediaQueryData, Theme, ThemeData};
    pub use crate::render::{NativeHandle, PropValue, RenderChild, RenderNode, Size};
    pub use crate::state::{State, StateId};
    pub use crate::widget::{ComponentScope, Widget, WidgetKind};
}
