//! Core error types.

use thiserror::Error;

/// Errors from machine definitions and the interpreter.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid machine definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("trigger '{trigger}' is not defined from state '{state}'")]
    NoSuchTrigger { state: String, trigger: String },

    #[error("no guard for trigger '{trigger}' passed in state '{state}'")]
    GuardRejected { state: String, trigger: String },

    #[error("instance is in state '{state}', which the machine does not define")]
    UnknownState { state: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns an error code suitable for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            CoreError::InvalidGuard { .. } => "INVALID_GUARD",
            CoreError::NoSuchTrigger { .. } => "NO_SUCH_TRIGGER",
            CoreError::GuardRejected { .. } => "GUARD_REJECTED",
            CoreError::UnknownState { .. } => "UNKNOWN_STATE",
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }

    /// Whether the caller, not the engine, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CoreError::NoSuchTrigger { .. } | CoreError::GuardRejected { .. } | CoreError::Json(_)
        )
    }
}
