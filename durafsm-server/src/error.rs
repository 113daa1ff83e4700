//! Server error types.

use durafsm_core::CoreError;
use durafsm_store::StoreError;
use hyper::StatusCode;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("instance already exists: {0}")]
    InstanceExists(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ServerError {
    /// Returns the code sent in error bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "INVALID_REQUEST",
            ServerError::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            ServerError::InstanceExists(_) => "INSTANCE_EXISTS",
            ServerError::Core(e) => e.error_code(),
            ServerError::Store(e) => e.error_code(),
            ServerError::Unauthorized => "UNAUTHORIZED",
            ServerError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ServerError::Io(_) => "INTERNAL_ERROR",
            ServerError::Json(_) => "BAD_REQUEST",
            ServerError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Json(_) => StatusCode::BAD_REQUEST,
            ServerError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InstanceExists(_) => StatusCode::CONFLICT,
            ServerError::Core(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ServerError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,
            ServerError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Io(_) | ServerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns whether the same request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServerError::Store(e) => e.is_retryable(),
            ServerError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServerError::InvalidRequest("bad id".into()), 400, "INVALID_REQUEST"),
            (ServerError::InstanceNotFound("a".into()), 404, "INSTANCE_NOT_FOUND"),
            (ServerError::InstanceExists("a".into()), 409, "INSTANCE_EXISTS"),
            (
                ServerError::Core(CoreError::NoSuchTrigger {
                    state: "initial".into(),
                    trigger: "approve".into(),
                }),
                400,
                "NO_SUCH_TRIGGER",
            ),
            (
                ServerError::Core(CoreError::GuardRejected {
                    state: "uploaded".into(),
                    trigger: "approve".into(),
                }),
                400,
                "GUARD_REJECTED",
            ),
            (
                ServerError::Core(CoreError::UnknownState {
                    state: "gone".into(),
                }),
                500,
                "UNKNOWN_STATE",
            ),
            (
                ServerError::Store(StoreError::Unavailable("disk".into())),
                503,
                "STORE_UNAVAILABLE",
            ),
            (
                ServerError::Store(StoreError::Conflict {
                    id: "a".into(),
                    expected: None,
                    actual: Some("uploaded".into()),
                }),
                409,
                "CONFLICT",
            ),
            (ServerError::Unauthorized, 401, "UNAUTHORIZED"),
            (ServerError::PayloadTooLarge { limit: 10 }, 413, "PAYLOAD_TOO_LARGE"),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{err}");
            assert_eq!(err.error_code(), code, "{err}");
        }
    }

    #[test]
    fn test_retryable() {
        assert!(ServerError::Store(StoreError::Unavailable("down".into())).is_retryable());
        assert!(!ServerError::InstanceNotFound("a".into()).is_retryable());
        assert!(!ServerError::Unauthorized.is_retryable());
    }
}
