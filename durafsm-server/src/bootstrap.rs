//! Builds the machine, store and task invoker from configuration.

use crate::config::{
    FsyncPolicy, InvokerKind, MachineConfig, StorageBackend, StorageConfig, TasksConfig,
};
use crate::error::ServerError;
use durafsm_core::{document_review, MachineDefinition, TaskInvoker};
use durafsm_log::{LogConfig, SyncPolicy};
use durafsm_store::{InstanceStore, LogStore, MemoryStore};
use durafsm_tasks::{HttpInvoker, LocalInvoker, LoggingHandler, RecordingInvoker};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Parses a machine definition document. YAML when `yaml` is set, JSON otherwise.
pub fn parse_definition(text: &str, yaml: bool) -> Result<MachineDefinition, ServerError> {
    let document: Value = if yaml {
        serde_yaml::from_str(text)
            .map_err(|e| ServerError::Config(format!("invalid YAML definition: {}", e)))?
    } else {
        serde_json::from_str(text)?
    };
    Ok(MachineDefinition::from_json(&document)?)
}

/// Reads a definition file; `.yaml`/`.yml` files are parsed as YAML.
pub fn read_definition(path: &Path) -> Result<MachineDefinition, ServerError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ServerError::Config(format!(
            "failed to read machine definition '{}': {}",
            path.display(),
            e
        ))
    })?;
    let yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    );
    parse_definition(&text, yaml)
}

/// The configured machine, or the built-in document review machine.
pub fn load_definition(config: &MachineConfig) -> Result<MachineDefinition, ServerError> {
    match config.definition_path {
        Some(ref path) => read_definition(path),
        None => Ok(document_review::definition()?),
    }
}

pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn InstanceStore>, ServerError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Log => {
            let dir = config.log_dir();
            std::fs::create_dir_all(&dir)?;
            let sync_policy = match config.fsync_policy {
                FsyncPolicy::EveryWrite => SyncPolicy::Always,
                FsyncPolicy::EveryN(n) => SyncPolicy::EveryN(n),
                FsyncPolicy::Never => SyncPolicy::Manual,
            };
            let log_config = LogConfig::new(dir)
                .with_segment_size(config.segment_size())
                .with_sync_policy(sync_policy);
            Ok(Arc::new(LogStore::open(log_config)?))
        }
    }
}

/// Builds the task invoker. The local invoker gets a logging handler for
/// every task the definition names.
pub fn build_invoker(
    config: &TasksConfig,
    definition: &MachineDefinition,
) -> Result<Arc<dyn TaskInvoker>, ServerError> {
    match config.invoker {
        InvokerKind::Local => {
            let mut invoker =
                LocalInvoker::new(config.max_in_flight).with_call_timeout(config.timeout());
            for task in definition.task_names() {
                invoker.register(task, LoggingHandler);
            }
            Ok(Arc::new(invoker))
        }
        InvokerKind::Http => {
            let base_url = config.base_url.as_deref().ok_or_else(|| {
                ServerError::Config("tasks.base_url is required for the http invoker".to_string())
            })?;
            let invoker = HttpInvoker::new(base_url, config.timeout(), config.max_in_flight)
                .map_err(|e| ServerError::Config(e.to_string()))?;
            Ok(Arc::new(invoker))
        }
        InvokerKind::DryRun => {
            tracing::warn!("Task dry run: entry and exit tasks are recorded, not executed");
            Ok(Arc::new(RecordingInvoker::new()))
        }
    }
}
