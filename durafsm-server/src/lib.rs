//! # durafsm-server
//!
//! Control plane and HTTP server for durafsm.
//!
//! This crate provides:
//! - The control plane (`create`, `transition`, `describe`)
//! - The HTTP binding of the control plane, served with hyper
//! - Configuration loading (YAML file plus `DURAFSM_*` overrides)
//! - Bearer token authentication
//! - Prometheus metrics on a separate listener
//! - Wiring of the machine, store and task invoker from configuration

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod control;
pub mod error;
pub mod http;
pub mod metrics;
pub mod server;

pub use auth::TokenValidator;
pub use config::{AuthConfig, Config, MachineConfig, NetworkConfig, StorageConfig, TasksConfig};
pub use control::{ControlPlane, ControlPlaneConfig, CreateResult, TransitionResult};
pub use error::ServerError;
pub use http::HttpApi;
pub use metrics::Metrics;
pub use server::{Server, ServerConfig};
