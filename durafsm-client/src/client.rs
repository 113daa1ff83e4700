//! High-level client API.

use crate::error::ClientError;
use durafsm_core::InstanceRecord;
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. `http://127.0.0.1:7480`.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A freshly created instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    pub id: String,
    pub state: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
}

/// Async client for the durafsm HTTP API.
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let request = match self.config.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout
            } else {
                ClientError::Transport(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => (err.code, err.error),
            Err(_) => ("HTTP_ERROR".to_string(), body),
        };
        tracing::debug!("Request failed with {}: {} {}", status, code, message);
        Err(ClientError::Server {
            status: status.as_u16(),
            code,
            message,
        })
    }

    /// Checks that the server is up.
    pub async fn health(&self) -> Result<(), ClientError> {
        self.send(self.http.get(self.url("/health"))).await?;
        Ok(())
    }

    /// Creates an instance, with a generated id unless `id` is given.
    pub async fn create(&self, id: Option<&str>) -> Result<Created, ClientError> {
        let mut request = self.http.post(self.url("/create"));
        if let Some(id) = id {
            request = request.json(&json!({ "id": id }));
        }
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Fires `trigger` on the instance with `payload`.
    pub async fn transition(
        &self,
        id: &str,
        trigger: &str,
        payload: &Value,
    ) -> Result<(), ClientError> {
        let request = self
            .http
            .post(self.url(&format!("/transition/{}/{}", id, trigger)))
            .json(payload);
        self.send(request).await?;
        Ok(())
    }

    /// The instance's latest record.
    pub async fn describe(&self, id: &str) -> Result<InstanceRecord, ClientError> {
        let response = self
            .send(self.http.get(self.url(&format!("/describe/{}", id))))
            .await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
