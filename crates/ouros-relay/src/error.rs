//! Error taxonomy for the session and execution layer.
//!
//! Failures of the submitted code itself (syntax errors, raised exceptions,
//! resource limits hit by the snippet) are *not* represented here. They are
//! data, carried in [`ExecutionResult::error`](crate::ExecutionResult::error),
//! and leave the session usable. Only validation, lookup, contention,
//! connectivity and capacity failures surface as a [`RelayError`].

use thiserror::Error;

/// Errors raised by the session store, the engine adapter, and the handlers
/// built on top of them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The code payload was empty or malformed and never reached the engine.
    #[error("invalid request: {0}")]
    Validation(String),
    /// The session id was never issued, or the session has been reaped or
    /// destroyed.
    #[error("session not found: {0}")]
    SessionNotFound(String),
    /// The session is executing another submission or is already held by a
    /// live channel.
    #[error("session busy: {0}")]
    SessionBusy(String),
    /// The execution engine could not be reached, or its worker died.
    #[error("execution engine unavailable: {0}")]
    EngineUnavailable(String),
    /// No further sessions can be allocated.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),
}

impl RelayError {
    /// Short snake_case name of the error kind, used in wire responses.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionBusy(_) => "session_busy",
            Self::EngineUnavailable(_) => "engine_unavailable",
            Self::CapacityExceeded(_) => "capacity_exceeded",
        }
    }
}
