//! Prometheus metrics.
//!
//! The registry is shared by the HTTP API and the control plane and is
//! served on its own listener at `/metrics`.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Request duration histogram buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Requests by operation.
    pub requests_total: CounterVec,
    /// Errors by error code.
    pub errors_total: CounterVec,
    pub request_duration: HistogramVec,
    /// Applied transitions by source and destination state.
    pub transitions_total: CounterVec,
    /// Entry/exit task hand-offs by outcome (`accepted`, `failed`).
    pub task_dispatch_total: CounterVec,
    pub records_appended_total: IntCounter,
    /// Distinct instance ids in the store.
    pub instances: Gauge,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("durafsm_requests_total", "Total requests by operation"),
            &["operation"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let errors_total = CounterVec::new(
            Opts::new("durafsm_errors_total", "Total errors by error code"),
            &["code"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "durafsm_request_duration_seconds",
                "Request duration in seconds by operation",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["operation"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let transitions_total = CounterVec::new(
            Opts::new("durafsm_transitions_total", "Applied transitions by state pair"),
            &["from", "to"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let task_dispatch_total = CounterVec::new(
            Opts::new(
                "durafsm_task_dispatch_total",
                "Entry and exit task dispatches by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(task_dispatch_total.clone()))?;

        let records_appended_total = IntCounter::with_opts(Opts::new(
            "durafsm_records_appended_total",
            "Instance records appended to the store",
        ))?;
        registry.register(Box::new(records_appended_total.clone()))?;

        let instances = Gauge::with_opts(Opts::new(
            "durafsm_instances",
            "Number of distinct instances in the store",
        ))?;
        registry.register(Box::new(instances.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            errors_total,
            request_duration,
            transitions_total,
            task_dispatch_total,
            records_appended_total,
            instances,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Serves `/metrics` on `addr` until `shutdown` fires.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);
    serve_metrics(listener, metrics, shutdown).await;
    Ok(())
}

async fn serve_metrics(
    listener: TcpListener,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { Ok::<_, Infallible>(handle_request(req, &metrics)) }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }
}

fn handle_request<B>(req: Request<B>, metrics: &Metrics) -> Response<Full<Bytes>> {
    let (status, content_type, body) = match req.uri().path() {
        "/metrics" => match metrics.encode() {
            Ok(body) => (
                StatusCode::OK,
                "text/plain; version=0.0.4; charset=utf-8",
                body,
            ),
            Err(e) => {
                tracing::error!("Failed to encode metrics: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    b"metrics unavailable".to_vec(),
                )
            }
        },
        "/health" | "/healthz" => (StatusCode::OK, "text/plain", b"OK".to_vec()),
        _ => (StatusCode::NOT_FOUND, "text/plain", b"Not Found".to_vec()),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_metrics_encoding() {
        let metrics = Metrics::new().unwrap();

        metrics.requests_total.with_label_values(&["transition"]).inc();
        metrics.errors_total.with_label_values(&["GUARD_REJECTED"]).inc();
        metrics
            .request_duration
            .with_label_values(&["transition"])
            .observe(0.002);
        metrics
            .transitions_total
            .with_label_values(&["initial", "uploaded"])
            .inc();
        metrics.task_dispatch_total.with_label_values(&["accepted"]).inc();
        metrics.records_appended_total.inc_by(3);
        metrics.instances.set(2.0);

        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("durafsm_requests_total{operation=\"transition\"} 1"));
        assert!(encoded.contains("durafsm_errors_total{code=\"GUARD_REJECTED\"} 1"));
        assert!(encoded.contains("durafsm_request_duration_seconds"));
        assert!(encoded.contains("durafsm_transitions_total{from=\"initial\",to=\"uploaded\"} 1"));
        assert!(encoded.contains("durafsm_task_dispatch_total{outcome=\"accepted\"} 1"));
        assert!(encoded.contains("durafsm_records_appended_total 3"));
        assert!(encoded.contains("durafsm_instances 2"));
    }

    #[tokio::test]
    async fn test_metrics_routes() {
        let metrics = Metrics::new().unwrap();
        metrics.records_appended_total.inc();

        let req = Request::get("/metrics").body(()).unwrap();
        let resp = handle_request(req, &metrics);
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).contains("durafsm_records_appended_total 1"));

        let resp = handle_request(Request::get("/nope").body(()).unwrap(), &metrics);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_server_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(serve_metrics(
            listener,
            Arc::new(Metrics::new().unwrap()),
            rx,
        ));
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
