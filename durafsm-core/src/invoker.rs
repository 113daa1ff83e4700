//! Task invocation contract.
//!
//! The interpreter hands entry and exit tasks to a [`TaskInvoker`] and never
//! looks at the outcome. Transports live in `durafsm-tasks`.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// How a task is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeMode {
    /// Return as soon as the transport accepts the request.
    FireAndForget,
    /// Wait for the task to finish and return its result.
    WaitForResult,
}

/// A task could not be handed off or did not complete.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("no handler for task '{task}'")]
    UnknownTask { task: String },

    #[error("task '{task}' rejected: {reason}")]
    Rejected { task: String, reason: String },

    #[error("task transport unavailable: {0}")]
    Unavailable(String),

    #[error("task '{task}' failed: {reason}")]
    Failed { task: String, reason: String },

    #[error("task '{task}' timed out after {after_ms}ms")]
    Timeout { task: String, after_ms: u64 },
}

impl InvokeError {
    pub fn error_code(&self) -> &'static str {
        match self {
            InvokeError::UnknownTask { .. } => "UNKNOWN_TASK",
            InvokeError::Rejected { .. } => "TASK_REJECTED",
            InvokeError::Unavailable(_) => "TASK_UNAVAILABLE",
            InvokeError::Failed { .. } => "TASK_FAILED",
            InvokeError::Timeout { .. } => "TASK_TIMEOUT",
        }
    }
}

/// Invokes named external tasks with a JSON payload.
#[async_trait]
pub trait TaskInvoker: Send + Sync {
    /// Hands the task to the transport and returns once it is accepted.
    /// Says nothing about whether the task will run or succeed.
    fn dispatch(&self, task: &str, payload: Value) -> Result<(), InvokeError>;

    /// Runs the task and waits for its result.
    async fn call(&self, task: &str, payload: Value) -> Result<Value, InvokeError>;

    /// Invokes `task` in the given mode. Fire-and-forget yields `None`.
    async fn invoke(
        &self,
        task: &str,
        payload: Value,
        mode: InvokeMode,
    ) -> Result<Option<Value>, InvokeError> {
        match mode {
            InvokeMode::FireAndForget => self.dispatch(task, payload).map(|()| None),
            InvokeMode::WaitForResult => self.call(task, payload).await.map(Some),
        }
    }
}
