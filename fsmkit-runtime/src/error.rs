//! Runtime error types.

use fsmkit_core::CoreError;
use thiserror::Error;

/// Errors from the concurrent drivers.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("command queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("machine driver shut down")]
    ShutDown,

    #[error("command cancelled before it started")]
    Cancelled,

    #[error("timed out waiting for the command to complete")]
    Timeout,

    #[error("command panicked: {0}")]
    Panicked(String),

    #[error("unknown machine: {0}")]
    UnknownMachine(String),

    #[error("machine already registered: {0}")]
    DuplicateMachine(String),

    #[error("executor error: {0}")]
    Executor(String),
}

impl RuntimeError {
    /// Returns true if the command never reached the machine because the
    /// queue rejected it.
    pub fn is_submission_failure(&self) -> bool {
        matches!(self, RuntimeError::QueueFull { .. } | RuntimeError::ShutDown)
    }

    /// Returns true for per-transition failures, panics included.
    pub fn is_invalid_event(&self) -> bool {
        match self {
            RuntimeError::Core(e) => e.is_invalid_event(),
            RuntimeError::Panicked(_) => true,
            _ => false,
        }
    }

    /// Returns true for construction and reconfiguration errors.
    pub fn is_specification(&self) -> bool {
        matches!(self, RuntimeError::Core(e) if e.is_specification())
    }

    /// Returns a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            RuntimeError::Core(e) => e.error_code(),
            RuntimeError::QueueFull { .. } => "QUEUE_FULL",
            RuntimeError::ShutDown => "SHUT_DOWN",
            RuntimeError::Cancelled => "CANCELLED",
            RuntimeError::Timeout => "TIMEOUT",
            RuntimeError::Panicked(_) => "INVALID_EVENT",
            RuntimeError::UnknownMachine(_) => "MACHINE_NOT_FOUND",
            RuntimeError::DuplicateMachine(_) => "MACHINE_EXISTS",
            RuntimeError::Executor(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RuntimeError::QueueFull { .. } | RuntimeError::Timeout
        )
    }
}
