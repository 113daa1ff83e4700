//! An invoker that only records.

use async_trait::async_trait;
use durafsm_core::{InvokeError, TaskInvoker};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;

/// Records every `(task, payload)` it is handed and runs nothing.
///
/// Used for dry runs and in tests. Tasks named in `refuse` are rejected
/// instead of recorded.
#[derive(Debug, Default)]
pub struct RecordingInvoker {
    calls: Mutex<Vec<(String, Value)>>,
    refuse: HashSet<String>,
}

impl RecordingInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects `task` on every invocation.
    pub fn refusing(mut self, task: impl Into<String>) -> Self {
        self.refuse.insert(task.into());
        self
    }

    /// Everything recorded so far, in invocation order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn task_names(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(task, _)| task.clone()).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, task: &str, payload: Value) -> Result<(), InvokeError> {
        if self.refuse.contains(task) {
            return Err(InvokeError::Rejected {
                task: task.to_string(),
                reason: "refused by recorder".to_string(),
            });
        }
        self.calls.lock().push((task.to_string(), payload));
        Ok(())
    }
}

#[async_trait]
impl TaskInvoker for RecordingInvoker {
    fn dispatch(&self, task: &str, payload: Value) -> Result<(), InvokeError> {
        self.record(task, payload)
    }

    async fn call(&self, task: &str, payload: Value) -> Result<Value, InvokeError> {
        self.record(task, payload).map(|()| Value::Null)
    }
}
