//! durafsm - Durable finite state machine engine
//!
//! Serves create, transition and describe over HTTP, persisting every
//! state change to an append-only record log.

use durafsm_core::Interpreter;
use durafsm_server::bootstrap::{build_invoker, load_definition, open_store};
use durafsm_server::config::{StorageBackend, CONFIG_ENV};
use durafsm_server::metrics::run_metrics_server;
use durafsm_server::{Config, ControlPlane, ControlPlaneConfig, Metrics, Server, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if DURAFSM_CONFIG is set, then env overrides)
    let config_path = std::env::var(CONFIG_ENV).ok();
    let mut config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::from_env()
        }
    };

    // Load auth secrets from external file if configured
    if let Err(e) = config.load_secrets() {
        tracing::error!("Failed to load auth secrets: {}", e);
        return Err(e.into());
    }
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting durafsm server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    match config.storage.backend {
        StorageBackend::Log => {
            tracing::info!("  Record log: {}", config.storage.log_dir().display())
        }
        StorageBackend::Memory => tracing::warn!("  Storage: in-memory, records are not durable"),
    }
    if config.auth.required {
        tracing::info!(
            "  Authentication: enabled ({} token(s))",
            config.auth.token_hashes.len()
        );
    } else {
        tracing::info!("  Authentication: disabled");
    }

    let definition = load_definition(&config.machine)?;
    tracing::info!(
        "  Machine: {} ({} states, {} transitions, initial '{}')",
        definition.name(),
        definition.states().len(),
        definition.transitions().len(),
        definition.initial().name
    );
    tracing::info!("  Task invoker: {:?}", config.tasks.invoker);

    let invoker = build_invoker(&config.tasks, &definition)?;
    let store = open_store(&config.storage)?;
    let interpreter = Arc::new(Interpreter::new(Arc::new(definition), invoker));

    let metrics = if config.metrics.enabled {
        Some(Arc::new(Metrics::new()?))
    } else {
        None
    };

    let mut control = ControlPlane::new(
        interpreter,
        store.clone(),
        ControlPlaneConfig {
            optimistic_concurrency: config.machine.optimistic_concurrency,
        },
    );
    let mut server_config = ServerConfig::new(config.network.bind_addr)
        .with_max_body_bytes(config.network.max_body_bytes);
    if let Some(ref metrics) = metrics {
        control = control.with_metrics(metrics.clone());
        server_config = server_config.with_metrics(metrics.clone());
    }

    let server = Arc::new(Server::with_auth(
        server_config,
        Arc::new(control),
        &config.auth,
    ));

    // Spawn metrics server alongside the API
    if let Some(metrics) = metrics {
        let addr = config.metrics.bind_addr;
        let shutdown = server.subscribe_shutdown();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, shutdown).await {
                tracing::error!("Metrics server failed: {}", e);
            }
        });
    }

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    // Sync the record log before exit
    if let Err(e) = store.sync() {
        tracing::error!("Failed to sync store on shutdown: {}", e);
    }

    tracing::info!("Server stopped");
    Ok(())
}
