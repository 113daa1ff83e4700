//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via DURAFSM_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the YAML config file.
pub const CONFIG_ENV: &str = "DURAFSM_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub machine: MachineConfig,
    pub tasks: TasksConfig,
    pub auth: AuthConfig,
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `DURAFSM_*` overrides read through `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        self.network.apply_overrides(&var);
        self.storage.apply_overrides(&var);
        self.machine.apply_overrides(&var);
        self.tasks.apply_overrides(&var);
        self.auth.apply_overrides(&var);
        self.metrics.apply_overrides(&var);
    }

    /// Loads secrets from external file if configured.
    pub fn load_secrets(&mut self) -> Result<(), ConfigError> {
        self.auth.load_secrets()
    }

    /// Checks settings that cannot work together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_body_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "network.max_body_bytes must be positive".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::Log && self.storage.segment_size_mb == 0 {
            return Err(ConfigError::ValidationError(
                "storage.segment_size_mb must be positive".to_string(),
            ));
        }
        if self.tasks.invoker == InvokerKind::Http && self.tasks.base_url.is_none() {
            return Err(ConfigError::ValidationError(
                "tasks.invoker is http but tasks.base_url is not set".to_string(),
            ));
        }
        if self.tasks.max_in_flight == 0 {
            return Err(ConfigError::ValidationError(
                "tasks.max_in_flight must be positive".to_string(),
            ));
        }
        if self.auth.required && self.auth.token_hashes.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.required is set but no token hashes are configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the HTTP API binds to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7480)),
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl NetworkConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(parsed) = var("DURAFSM_BIND").and_then(|addr| addr.parse().ok()) {
            self.bind_addr = parsed;
        }
        if let Some(n) = var("DURAFSM_MAX_BODY_BYTES").and_then(|v| v.parse().ok()) {
            self.max_body_bytes = n;
        }
    }
}

/// Where instance records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Durable record log under `data_dir`.
    #[default]
    Log,
    /// Process memory only; lost on restart.
    Memory,
}

/// Flush policy for the record log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    /// Fsync after every append.
    EveryWrite,
    /// Fsync after N appends.
    EveryN(u32),
    /// Never fsync explicitly, rely on the OS and shutdown.
    Never,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
    /// Record log segment size in megabytes.
    pub segment_size_mb: u64,
    pub fsync_policy: FsyncPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Log,
            data_dir: PathBuf::from("./data"),
            segment_size_mb: 32,
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }
}

impl StorageConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(backend) = var("DURAFSM_STORAGE") {
            match backend.to_lowercase().as_str() {
                "memory" => self.backend = StorageBackend::Memory,
                "log" => self.backend = StorageBackend::Log,
                other => tracing::warn!("Ignoring unknown DURAFSM_STORAGE value '{}'", other),
            }
        }

        if let Some(dir) = var("DURAFSM_DATA") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(mb) = var("DURAFSM_SEGMENT_SIZE_MB").and_then(|v| v.parse().ok()) {
            self.segment_size_mb = mb;
        }

        if let Some(policy) = var("DURAFSM_FSYNC_POLICY") {
            self.fsync_policy = match policy.to_lowercase().as_str() {
                "never" => FsyncPolicy::Never,
                s if s.starts_with("every_n:") => {
                    FsyncPolicy::EveryN(s["every_n:".len()..].parse().unwrap_or(100))
                }
                _ => FsyncPolicy::EveryWrite,
            };
        }
    }

    /// Returns the segment size in bytes.
    pub fn segment_size(&self) -> u64 {
        self.segment_size_mb * 1024 * 1024
    }

    /// Returns the record log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("records")
    }
}

/// Which machine the server runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// JSON or YAML machine definition. The built-in document review
    /// machine is used when unset.
    pub definition_path: Option<PathBuf>,
    /// Reject a transition when another writer appended first.
    pub optimistic_concurrency: bool,
}

impl MachineConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("DURAFSM_MACHINE") {
            self.definition_path = Some(PathBuf::from(path));
        }
        if let Some(flag) = var("DURAFSM_OPTIMISTIC") {
            self.optimistic_concurrency = parse_flag(&flag);
        }
    }
}

/// Task transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokerKind {
    /// In-process handlers that log each task.
    #[default]
    Local,
    /// POST to a remote task service.
    Http,
    /// Record tasks without running them.
    DryRun,
}

/// Task invoker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub invoker: InvokerKind,
    /// Task service root for the HTTP invoker.
    pub base_url: Option<String>,
    pub timeout_ms: u64,
    /// Dispatched tasks allowed to run at once.
    pub max_in_flight: usize,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            invoker: InvokerKind::Local,
            base_url: None,
            timeout_ms: 10_000,
            max_in_flight: 256,
        }
    }
}

impl TasksConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(kind) = var("DURAFSM_TASKS_INVOKER") {
            match kind.to_lowercase().as_str() {
                "local" => self.invoker = InvokerKind::Local,
                "http" => self.invoker = InvokerKind::Http,
                "dry_run" => self.invoker = InvokerKind::DryRun,
                other => tracing::warn!("Ignoring unknown DURAFSM_TASKS_INVOKER value '{}'", other),
            }
        }
        if let Some(url) = var("DURAFSM_TASKS_URL") {
            self.base_url = Some(url);
        }
        if let Some(ms) = var("DURAFSM_TASKS_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.timeout_ms = ms;
        }
        if let Some(n) = var("DURAFSM_TASKS_MAX_IN_FLIGHT").and_then(|v| v.parse().ok()) {
            self.max_in_flight = n;
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether every API route except `/health` needs a bearer token.
    pub required: bool,
    /// List of valid token hashes (SHA-256 hex strings).
    /// Generate hashes with: `durafsm-cli hash-token <your-token>`
    pub token_hashes: Vec<String>,
    /// Optional path to external secrets file containing token hashes (one per line).
    pub secrets_file: Option<PathBuf>,
}

impl AuthConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(flag) = var("DURAFSM_AUTH_REQUIRED") {
            self.required = parse_flag(&flag);
        }

        if let Some(hash) = var("DURAFSM_AUTH_TOKEN_HASH") {
            if !hash.is_empty() {
                self.token_hashes.push(hash);
            }
        }

        if let Some(path) = var("DURAFSM_AUTH_SECRETS_FILE") {
            self.secrets_file = Some(PathBuf::from(path));
        }
    }

    /// Loads token hashes from the secrets file if configured.
    pub fn load_secrets(&mut self) -> Result<(), ConfigError> {
        if let Some(ref path) = self.secrets_file {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(path.clone(), e))?;
            for line in content.lines() {
                let line = line.trim();
                // Skip empty lines and comments
                if !line.is_empty() && !line.starts_with('#') {
                    self.token_hashes.push(line.to_string());
                }
            }
        }
        Ok(())
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9480)),
        }
    }
}

impl MetricsConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(flag) = var("DURAFSM_METRICS_ENABLED") {
            self.enabled = parse_flag(&flag);
        }
        if let Some(parsed) = var("DURAFSM_METRICS_BIND").and_then(|addr| addr.parse().ok()) {
            self.bind_addr = parsed;
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// SocketAddr as a plain string in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), 7480);
        assert_eq!(config.storage.backend, StorageBackend::Log);
        assert_eq!(config.storage.segment_size(), 32 * 1024 * 1024);
        assert_eq!(config.storage.log_dir(), PathBuf::from("./data/records"));
        assert!(!config.machine.optimistic_concurrency);
        assert_eq!(config.tasks.invoker, InvokerKind::Local);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_sections() {
        let yaml = r#"
network:
  bind_addr: "0.0.0.0:8080"
storage:
  backend: memory
  fsync_policy: never
machine:
  definition_path: machines/review.yaml
  optimistic_concurrency: true
tasks:
  invoker: http
  base_url: "http://tasks.internal"
  timeout_ms: 2500
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.network.bind_addr.port(), 8080);
        assert_eq!(config.network.max_body_bytes, 1024 * 1024);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.fsync_policy, FsyncPolicy::Never);
        assert_eq!(
            config.machine.definition_path,
            Some(PathBuf::from("machines/review.yaml"))
        );
        assert!(config.machine.optimistic_concurrency);
        assert_eq!(config.tasks.invoker, InvokerKind::Http);
        assert_eq!(config.tasks.timeout(), Duration::from_millis(2500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(overrides(&[
            ("DURAFSM_BIND", "127.0.0.1:9000"),
            ("DURAFSM_STORAGE", "memory"),
            ("DURAFSM_FSYNC_POLICY", "every_n:50"),
            ("DURAFSM_OPTIMISTIC", "true"),
            ("DURAFSM_TASKS_INVOKER", "dry_run"),
            ("DURAFSM_AUTH_REQUIRED", "1"),
            ("DURAFSM_AUTH_TOKEN_HASH", "abc123"),
            ("DURAFSM_METRICS_ENABLED", "TRUE"),
            ("DURAFSM_MAX_BODY_BYTES", "not-a-number"),
        ]));

        assert_eq!(config.network.bind_addr.port(), 9000);
        assert_eq!(config.network.max_body_bytes, 1024 * 1024);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.fsync_policy, FsyncPolicy::EveryN(50));
        assert!(config.machine.optimistic_concurrency);
        assert_eq!(config.tasks.invoker, InvokerKind::DryRun);
        assert!(config.auth.required);
        assert_eq!(config.auth.token_hashes, vec!["abc123"]);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_validate_rejects_inconsistent_settings() {
        let mut config = Config::default();
        config.tasks.invoker = InvokerKind::Http;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.auth.required = true;
        assert!(config.validate().is_err());
        config.auth.token_hashes.push("deadbeef".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("durafsm.yaml");

        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config.tasks.base_url = Some("http://localhost:9999".to_string());
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.storage.backend, StorageBackend::Memory);
        assert_eq!(loaded.tasks.base_url.as_deref(), Some("http://localhost:9999"));
        assert_eq!(loaded.network.bind_addr, config.network.bind_addr);
    }

    #[test]
    fn test_load_secrets_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens");
        std::fs::write(&path, "# operators\nhash-one\n\n  hash-two  \n").unwrap();

        let mut config = Config::default();
        config.auth.secrets_file = Some(path);
        config.load_secrets().unwrap();
        assert_eq!(config.auth.token_hashes, vec!["hash-one", "hash-two"]);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/durafsm.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
