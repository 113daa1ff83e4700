//! HTTP binding of the control plane.
//!
//! | Route                              | Success                      |
//! |------------------------------------|------------------------------|
//! | `POST /create`                     | `201 {id, state}`            |
//! | `POST /transition/{id}/{trigger}`  | `204`                        |
//! | `GET /describe/{id}`               | `200 {id, state, createdAt}` |
//! | `GET /health`                      | `200 {"status":"ok"}`        |
//!
//! Failures carry `{"error": <message>, "code": <ERROR_CODE>}`.

use crate::auth::TokenValidator;
use crate::control::ControlPlane;
use crate::error::ServerError;
use crate::metrics::Metrics;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateRequest {
    id: Option<String>,
}

enum Route<'a> {
    Create,
    Transition { id: &'a str, trigger: &'a str },
    Describe { id: &'a str },
    Health,
}

impl Route<'_> {
    fn operation(&self) -> &'static str {
        match self {
            Route::Create => "create",
            Route::Transition { .. } => "transition",
            Route::Describe { .. } => "describe",
            Route::Health => "health",
        }
    }
}

/// Outcome of matching a path.
enum Matched<'a> {
    Route(Route<'a>),
    WrongMethod,
    NotFound,
}

fn route<'a>(method: &Method, path: &'a str) -> Matched<'a> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let (route, allowed) = match segments.as_slice() {
        ["create"] => (Route::Create, Method::POST),
        ["transition", id, trigger] => (
            Route::Transition {
                id: *id,
                trigger: *trigger,
            },
            Method::POST,
        ),
        ["describe", id] => (Route::Describe { id: *id }, Method::GET),
        ["health"] => (Route::Health, Method::GET),
        _ => return Matched::NotFound,
    };
    if *method == allowed {
        Matched::Route(route)
    } else {
        Matched::WrongMethod
    }
}

/// Request handler shared by every connection.
pub struct HttpApi {
    control: Arc<ControlPlane>,
    auth: Option<TokenValidator>,
    max_body_bytes: usize,
    metrics: Option<Arc<Metrics>>,
}

impl HttpApi {
    pub fn new(control: Arc<ControlPlane>, max_body_bytes: usize) -> Self {
        Self {
            control,
            auth: None,
            max_body_bytes,
            metrics: None,
        }
    }

    /// Requires a bearer token on every route but `/health`.
    pub fn with_auth(mut self, validator: TokenValidator) -> Self {
        self.auth = Some(validator);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let route = match route(&parts.method, parts.uri.path()) {
            Matched::Route(route) => route,
            Matched::WrongMethod => {
                return error_body(
                    StatusCode::METHOD_NOT_ALLOWED,
                    "METHOD_NOT_ALLOWED",
                    "method not allowed",
                )
            }
            Matched::NotFound => {
                return error_body(StatusCode::NOT_FOUND, "NOT_FOUND", "no such route")
            }
        };

        let operation = route.operation();
        let started = Instant::now();
        if let Some(ref metrics) = self.metrics {
            metrics.requests_total.with_label_values(&[operation]).inc();
        }

        let authorization = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let response = match self.dispatch(route, authorization, body).await {
            Ok(response) => response,
            Err(e) => {
                if e.status_code().is_server_error() {
                    tracing::error!("{} failed: {}", operation, e);
                } else {
                    tracing::debug!("{} rejected: {}", operation, e);
                }
                if let Some(ref metrics) = self.metrics {
                    metrics.errors_total.with_label_values(&[e.error_code()]).inc();
                }
                error_response(&e)
            }
        };

        if let Some(ref metrics) = self.metrics {
            metrics
                .request_duration
                .with_label_values(&[operation])
                .observe(started.elapsed().as_secs_f64());
        }
        response
    }

    async fn dispatch<B>(
        &self,
        route: Route<'_>,
        authorization: Option<&str>,
        body: B,
    ) -> Result<Response<Full<Bytes>>, ServerError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        if let (Some(validator), false) = (&self.auth, matches!(route, Route::Health)) {
            validator.authorize(authorization)?;
        }

        match route {
            Route::Create => {
                let body = self.read_body(body).await?;
                let request: CreateRequest = if body.is_empty() {
                    CreateRequest::default()
                } else {
                    serde_json::from_slice(&body)?
                };
                let created = self.control.create(request.id)?;
                Ok(json_response(StatusCode::CREATED, &json!(created)))
            }
            Route::Transition { id, trigger } => {
                let body = self.read_body(body).await?;
                let payload: Value = if body.is_empty() {
                    json!({})
                } else {
                    serde_json::from_slice(&body)?
                };
                self.control.transition(id, trigger, &payload)?;
                Ok(empty_response(StatusCode::NO_CONTENT))
            }
            Route::Describe { id } => {
                let record = self.control.describe(id)?;
                Ok(json_response(StatusCode::OK, &json!(record)))
            }
            Route::Health => Ok(json_response(StatusCode::OK, &json!({"status": "ok"}))),
        }
    }

    async fn read_body<B>(&self, body: B) -> Result<Bytes, ServerError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        match Limited::new(body, self.max_body_bytes).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(ServerError::PayloadTooLarge {
                    limit: self.max_body_bytes,
                })
            }
            Err(e) => Err(ServerError::InvalidRequest(format!(
                "failed to read request body: {}",
                e
            ))),
        }
    }
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn error_body(status: StatusCode, code: &str, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({"error": message, "code": code}))
}

fn error_response(err: &ServerError) -> Response<Full<Bytes>> {
    error_body(err.status_code(), err.error_code(), &err.to_string())
}
