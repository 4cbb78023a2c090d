//! Error types for the element-tree runtime.
//!
//! Two failure classes propagate to the caller as `Err`: configuration
//! errors (a required argument is missing or malformed) and state errors
//! (an operation was attempted in a lifecycle state that forbids it).
//! Everything else is absorbed at the smallest possible granularity:
//! harmless skips are logged as warnings, and per-mutation / per-hook
//! failures are logged without aborting the surrounding batch or phase.

use thiserror::Error;

/// A fatal error reported synchronously at the call site.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required argument was missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation was attempted in a lifecycle state that forbids it.
    #[error("state error: {0}")]
    State(String),
}

impl EngineError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    pub(crate) fn state(message: impl Into<String>) -> Self {
        EngineError::State(message.into())
    }
}

/// Failure of a single queued state mutation.
///
/// Caught per-mutation during a flush; the rest of the batch still runs.
#[derive(Debug, Error)]
#[error("mutation failed: {message}")]
pub struct MutationError {
    message: String,
}

impl MutationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure of a single lifecycle hook.
///
/// Caught per-hook; the remaining hooks of the same phase still run.
#[derive(Debug, Error)]
#[error("lifecycle hook failed: {message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type returned by lifecycle hooks.
pub type HookResult = Result<(), HookError>;
