//! In-process task handlers.

use async_trait::async_trait;
use durafsm_core::{InvokeError, TaskInvoker};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// Default bound on concurrently running dispatched tasks.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 256;

/// Runs one named task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &str, payload: Value) -> Result<Value, InvokeError>;
}

/// Logs the task and its payload and succeeds with `null`.
///
/// Stands in for task services that are not wired up yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl TaskHandler for LoggingHandler {
    async fn handle(&self, task: &str, payload: Value) -> Result<Value, InvokeError> {
        tracing::info!("Task '{}' invoked with payload {}", task, payload);
        Ok(Value::Null)
    }
}

/// Dispatches tasks to handlers registered by name.
pub struct LocalInvoker {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    call_timeout: Option<Duration>,
}

impl LocalInvoker {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            call_timeout: None,
        }
    }

    /// A [`LoggingHandler`] for every name in `tasks`.
    pub fn logging_for<I, S>(tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let handler: Arc<dyn TaskHandler> = Arc::new(LoggingHandler);
        let mut invoker = Self::new(DEFAULT_MAX_IN_FLIGHT);
        for task in tasks {
            invoker.handlers.insert(task.into(), handler.clone());
        }
        invoker
    }

    /// Bounds how long [`call`](TaskInvoker::call) waits for a handler.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn register(&mut self, task: impl Into<String>, handler: impl TaskHandler + 'static) {
        self.handlers.insert(task.into(), Arc::new(handler));
    }

    pub fn has_handler(&self, task: &str) -> bool {
        self.handlers.contains_key(task)
    }

    /// Dispatched tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    fn handler(&self, task: &str) -> Result<Arc<dyn TaskHandler>, InvokeError> {
        self.handlers
            .get(task)
            .cloned()
            .ok_or_else(|| InvokeError::UnknownTask {
                task: task.to_string(),
            })
    }
}

impl Default for LocalInvoker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

#[async_trait]
impl TaskInvoker for LocalInvoker {
    fn dispatch(&self, task: &str, payload: Value) -> Result<(), InvokeError> {
        let handler = self.handler(task)?;
        let runtime =
            Handle::try_current().map_err(|e| InvokeError::Unavailable(e.to_string()))?;
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| InvokeError::Rejected {
                task: task.to_string(),
                reason: format!("{} tasks already in flight", self.max_in_flight),
            })?;

        let task = task.to_string();
        runtime.spawn(async move {
            let _permit = permit;
            if let Err(e) = handler.handle(&task, payload).await {
                tracing::warn!("Dispatched task '{}' failed: {}", task, e);
            }
        });
        Ok(())
    }

    async fn call(&self, task: &str, payload: Value) -> Result<Value, InvokeError> {
        let handler = self.handler(task)?;
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, handler.handle(task, payload))
                .await
                .map_err(|_| InvokeError::Timeout {
                    task: task.to_string(),
                    after_ms: limit.as_millis() as u64,
                })?,
            None => handler.handle(task, payload).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use durafsm_core::InvokeMode;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::{mpsc, Notify};

    struct Forward(mpsc::UnboundedSender<(String, Value)>);

    #[async_trait]
    impl TaskHandler for Forward {
        async fn handle(&self, task: &str, payload: Value) -> Result<Value, InvokeError> {
            let _ = self.0.send((task.to_string(), payload));
            Ok(json!({"handled": task}))
        }
    }

    struct Blocked(Arc<Notify>);

    #[async_trait]
    impl TaskHandler for Blocked {
        async fn handle(&self, _task: &str, _payload: Value) -> Result<Value, InvokeError> {
            self.0.notified().await;
            Ok(Value::Null)
        }
    }

    struct Failing(Mutex<u32>);

    #[async_trait]
    impl TaskHandler for Failing {
        async fn handle(&self, task: &str, _payload: Value) -> Result<Value, InvokeError> {
            *self.0.lock() += 1;
            Err(InvokeError::Failed {
                task: task.to_string(),
                reason: "boom".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_dispatch_runs_handler() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut invoker = LocalInvoker::default();
        invoker.register("notifyReviewer", Forward(tx));

        invoker
            .dispatch("notifyReviewer", json!({"doc": 7}))
            .unwrap();

        let (task, payload) = rx.recv().await.unwrap();
        assert_eq!(task, "notifyReviewer");
        assert_eq!(payload, json!({"doc": 7}));
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let invoker = LocalInvoker::logging_for(["archive"]);
        assert!(invoker.has_handler("archive"));

        let err = invoker.dispatch("summarize", json!({})).unwrap_err();
        assert!(matches!(err, InvokeError::UnknownTask { ref task } if task == "summarize"));

        let err = invoker.call("summarize", json!({})).await.unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_TASK");
    }

    #[tokio::test]
    async fn test_dispatch_rejected_when_full() {
        let gate = Arc::new(Notify::new());
        let mut invoker = LocalInvoker::new(1);
        invoker.register("summarize", Blocked(gate.clone()));

        invoker.dispatch("summarize", json!({})).unwrap();
        assert_eq!(invoker.in_flight(), 1);

        let err = invoker.dispatch("summarize", json!({})).unwrap_err();
        assert!(matches!(err, InvokeError::Rejected { .. }));

        gate.notify_one();
        for _ in 0..100 {
            if invoker.in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(invoker.in_flight(), 0);
        invoker.dispatch("summarize", json!({})).unwrap();
        gate.notify_one();
    }

    #[test]
    fn test_dispatch_without_runtime() {
        let invoker = LocalInvoker::logging_for(["delete"]);
        let err = invoker.dispatch("delete", json!({})).unwrap_err();
        assert!(matches!(err, InvokeError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_call_returns_handler_result() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut invoker = LocalInvoker::default();
        invoker.register("summarize", Forward(tx));
        invoker.register("delete", Failing(Mutex::new(0)));

        let out = invoker
            .invoke("summarize", json!({}), InvokeMode::WaitForResult)
            .await
            .unwrap();
        assert_eq!(out, Some(json!({"handled": "summarize"})));

        let err = invoker.call("delete", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "task 'delete' failed: boom");
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_swallowed() {
        let mut invoker = LocalInvoker::default();
        invoker.register("delete", Failing(Mutex::new(0)));
        assert!(invoker.dispatch("delete", json!({})).is_ok());
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let gate = Arc::new(Notify::new());
        let mut invoker = LocalInvoker::default().with_call_timeout(Duration::from_millis(20));
        invoker.register("archive", Blocked(gate));

        let err = invoker.call("archive", json!({})).await.unwrap_err();
        assert!(matches!(err, InvokeError::Timeout { after_ms: 20, .. }));
    }
}
