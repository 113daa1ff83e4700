//! Remote task service over HTTP.
//!
//! Every task is `POST {base_url}/{task}` with the JSON payload as body. A
//! 2xx status means the task was accepted (dispatch) or completed (call).

use async_trait::async_trait;
use durafsm_core::{InvokeError, TaskInvoker};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts tasks to a remote task service.
#[derive(Clone)]
pub struct HttpInvoker {
    client: Client,
    base_url: String,
    timeout: Duration,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl HttpInvoker {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        max_in_flight: usize,
    ) -> Result<Self, InvokeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InvokeError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, task: &str) -> String {
        format!("{}/{}", self.base_url, task)
    }

    async fn post(&self, task: &str, payload: &Value) -> Result<Value, InvokeError> {
        let url = self.url(task);
        tracing::debug!("Posting task '{}' to {}", task, url);

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InvokeError::Timeout {
                        task: task.to_string(),
                        after_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    InvokeError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvokeError::Failed {
                task: task.to_string(),
                reason: format!("status {}: {}", status.as_u16(), body),
            });
        }

        let body = response.bytes().await.map_err(|e| InvokeError::Failed {
            task: task.to_string(),
            reason: format!("failed to read response: {}", e),
        })?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|e| InvokeError::Failed {
            task: task.to_string(),
            reason: format!("invalid JSON response: {}", e),
        })
    }
}

#[async_trait]
impl TaskInvoker for HttpInvoker {
    fn dispatch(&self, task: &str, payload: Value) -> Result<(), InvokeError> {
        let runtime =
            Handle::try_current().map_err(|e| InvokeError::Unavailable(e.to_string()))?;
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| InvokeError::Rejected {
                task: task.to_string(),
                reason: format!("{} requests already in flight", self.max_in_flight),
            })?;

        let invoker = self.clone();
        let task = task.to_string();
        runtime.spawn(async move {
            let _permit = permit;
            if let Err(e) = invoker.post(&task, &payload).await {
                tracing::warn!("Dispatched task '{}' failed: {}", task, e);
            }
        });
        Ok(())
    }

    async fn call(&self, task: &str, payload: Value) -> Result<Value, InvokeError> {
        self.post(task, &payload).await
    }
}
