//! HTTP server for the control plane.

use crate::auth::TokenValidator;
use crate::config::AuthConfig;
use crate::control::ControlPlane;
use crate::error::ServerError;
use crate::http::HttpApi;
use crate::metrics::Metrics;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_body_bytes: 1024 * 1024,
            metrics: None,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
}

pub struct Server {
    config: ServerConfig,
    api: Arc<HttpApi>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    pub fn new(config: ServerConfig, control: Arc<ControlPlane>) -> Self {
        Self::build(config, control, None)
    }

    /// Creates a server that enforces `auth_config` when it is required.
    pub fn with_auth(
        config: ServerConfig,
        control: Arc<ControlPlane>,
        auth_config: &AuthConfig,
    ) -> Self {
        Self::build(config, control, TokenValidator::from_config(auth_config))
    }

    fn build(
        config: ServerConfig,
        control: Arc<ControlPlane>,
        validator: Option<TokenValidator>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut api = HttpApi::new(control, config.max_body_bytes);
        if let Some(validator) = validator {
            api = api.with_auth(validator);
        }
        if let Some(ref metrics) = config.metrics {
            api = api.with_metrics(metrics.clone());
        }
        Self {
            config,
            api: Arc::new(api),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and serves until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let api = self.api.clone();
                            let stats = self.stats.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                tracing::debug!("Client connected: {}", peer);
                                let service = service_fn(move |req| {
                                    let api = api.clone();
                                    async move { Ok::<_, Infallible>(api.handle(req).await) }
                                });
                                let conn = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service);
                                tokio::pin!(conn);

                                let result = tokio::select! {
                                    result = conn.as_mut() => result,
                                    _ = conn_shutdown.recv() => {
                                        conn.as_mut().graceful_shutdown();
                                        conn.await
                                    }
                                };
                                if let Err(e) = result {
                                    tracing::debug!("Connection {} error: {}", peer, e);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::debug!("Client disconnected: {}", peer);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// A receiver that fires on [`shutdown`](Self::shutdown), for side servers.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}
