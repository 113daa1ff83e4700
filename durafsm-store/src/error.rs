//! Store error types.

use thiserror::Error;

/// Errors from an instance store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record log error: {0}")]
    Log(#[from] durafsm_log::LogError),

    #[error(
        "conflicting write to instance {id}: expected latest {}, found {}",
        .expected.as_deref().unwrap_or("none"),
        .actual.as_deref().unwrap_or("none")
    )]
    Conflict {
        id: String,
        expected: Option<String>,
        actual: Option<String>,
    },
}

impl StoreError {
    /// Returns an error code suitable for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) | StoreError::Log(_) => "STORE_UNAVAILABLE",
            StoreError::Conflict { .. } => "CONFLICT",
        }
    }

    /// Backend failure, as opposed to a rejected conditional write.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Log(e) => e.is_retryable(),
            StoreError::Unavailable(_) => true,
            StoreError::Conflict { .. } => false,
        }
    }
}
