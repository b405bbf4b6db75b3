//! Core error types.

use thiserror::Error;

/// Boxed error returned by state callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from the transition engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid machine specification: {reason}")]
    Specification { reason: String },

    #[error("unknown state: {name}")]
    UnknownState { name: String },

    #[error("invalid event: no transition for '{event}' in state '{state}'")]
    InvalidEvent { state: String, event: String },

    #[error("state '{state}' decided on unknown target '{target}'")]
    UnknownTarget { state: String, target: String },

    #[error("callback failed in state '{state}': {source}")]
    Callback {
        state: String,
        #[source]
        source: BoxError,
    },

    #[error("internal events are not enabled for this machine")]
    InternalEventsDisabled,

    #[error("internal event already pending, only one may be queued at a time")]
    InternalEventOverflow,

    #[error("internal events can only be posted while a transition is in progress")]
    NotDispatching,

    #[error("machine is not initialized")]
    NotInitialized,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        CoreError::Specification {
            reason: reason.into(),
        }
    }

    /// Returns true for construction and reconfiguration errors.
    ///
    /// These are never retryable: the graph itself is wrong.
    pub fn is_specification(&self) -> bool {
        matches!(
            self,
            CoreError::Specification { .. } | CoreError::UnknownState { .. } | CoreError::Json(_)
        )
    }

    /// Returns true for per-transition runtime errors.
    ///
    /// Callback failures are reported in this class so that application
    /// errors never escape the machine as anything else.
    pub fn is_invalid_event(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidEvent { .. }
                | CoreError::UnknownTarget { .. }
                | CoreError::Callback { .. }
                | CoreError::InternalEventsDisabled
                | CoreError::InternalEventOverflow
                | CoreError::NotDispatching
        )
    }

    /// Returns a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Specification { .. } => "SPECIFICATION",
            CoreError::UnknownState { .. } => "SPECIFICATION",
            CoreError::InvalidEvent { .. } => "INVALID_EVENT",
            CoreError::UnknownTarget { .. } => "INVALID_EVENT",
            CoreError::Callback { .. } => "INVALID_EVENT",
            CoreError::InternalEventsDisabled => "INVALID_EVENT",
            CoreError::InternalEventOverflow => "INVALID_EVENT",
            CoreError::NotDispatching => "INVALID_EVENT",
            CoreError::NotInitialized => "NOT_INITIALIZED",
            CoreError::Json(_) => "SPECIFICATION",
        }
    }
}
