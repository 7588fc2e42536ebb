//! Error types for the sync module.

use fabric_state_core::FabricError;
use thiserror::Error;

/// Errors raised by a [`TimerService`](crate::TimerService).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    /// A tokio-backed timer was created outside a runtime.
    #[error("no async runtime available")]
    NoRuntime,

    /// The event loop stopped receiving timer events.
    #[error("timer event loop closed")]
    Closed,
}

impl From<TimerError> for FabricError {
    fn from(err: TimerError) -> Self {
        FabricError::Timer(err.to_string())
    }
}

/// Result type for timer operations.
pub type Result<T> = std::result::Result<T, TimerError>;
