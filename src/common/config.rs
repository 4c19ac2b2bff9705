//! Configuration for roomalloc components

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{Error, Result};

/// Environment prefix, e.g. `ROOMALLOC__COORDINATOR__BIND_ADDR`
pub const ENV_PREFIX: &str = "ROOMALLOC";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Coordinator-specific config
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_node_id() -> String {
    "coord-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            coordinator: CoordinatorConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load config from an optional TOML file, then `ROOMALLOC__*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(Error::InvalidConfig("node_id cannot be empty".into()));
        }
        self.coordinator.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Rocksdb,
}

impl std::str::FromStr for StorageBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageBackend::Memory),
            "rocksdb" | "rocks" => Ok(StorageBackend::Rocksdb),
            other => Err(Error::InvalidConfig(format!(
                "unknown storage backend: {}",
                other
            ))),
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Storage backend
    #[serde(default = "default_storage")]
    pub storage: StorageBackend,

    /// RocksDB path (rocksdb backend only)
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// JSON-lines audit trail; disabled when unset
    #[serde(default)]
    pub audit_log: Option<PathBuf>,

    /// Change feed buffer per subscriber
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    #[serde(default)]
    pub allocation: AllocationPolicy,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}
fn default_storage() -> StorageBackend {
    StorageBackend::Memory
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./roomalloc-data")
}
fn default_event_buffer() -> usize {
    256
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            storage: default_storage(),
            db_path: default_db_path(),
            audit_log: None,
            event_buffer: default_event_buffer(),
            allocation: AllocationPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(Error::InvalidConfig("event_buffer must be > 0".into()));
        }
        self.allocation.validate()
    }
}

/// Retry and admission rules applied by the allocation coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPolicy {
    /// Attempts per call before a conflict is surfaced
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Bound on a single commit acknowledgement
    #[serde(default = "default_commit_timeout")]
    pub commit_timeout_ms: u64,

    /// Require status=approved (otherwise pending is accepted too)
    #[serde(default = "default_true")]
    pub strict_approval: bool,

    /// At most one active allocation per student and semester
    #[serde(default = "default_true")]
    pub one_active_per_semester: bool,
}

fn default_max_attempts() -> usize {
    8
}
fn default_initial_backoff() -> u64 {
    5
}
fn default_max_backoff() -> u64 {
    200
}
fn default_commit_timeout() -> u64 {
    2_000
}
fn default_true() -> bool {
    true
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            commit_timeout_ms: default_commit_timeout(),
            strict_approval: true,
            one_active_per_semester: true,
        }
    }
}

impl AllocationPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be >= 1".into()));
        }
        if self.commit_timeout_ms == 0 {
            return Err(Error::InvalidConfig("commit_timeout_ms must be > 0".into()));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(Error::InvalidConfig(
                "initial_backoff_ms exceeds max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.coordinator.storage, StorageBackend::Memory);
        assert!(config.coordinator.allocation.strict_approval);
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
node_id = "warden-desk"
log_level = "debug"

[coordinator]
bind_addr = "127.0.0.1:7000"
storage = "rocksdb"
db_path = "/tmp/rooms"

[coordinator.allocation]
max_attempts = 3
commit_timeout_ms = 500
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.node_id, "warden-desk");
        assert_eq!(config.coordinator.storage, StorageBackend::Rocksdb);
        assert_eq!(config.coordinator.bind_addr.port(), 7000);
        assert_eq!(config.coordinator.allocation.max_attempts, 3);
        assert_eq!(
            config.coordinator.allocation.commit_timeout(),
            Duration::from_millis(500)
        );
        // untouched fields keep their defaults
        assert_eq!(config.coordinator.allocation.max_backoff_ms, 200);
    }

    #[test]
    fn test_invalid_policy() {
        let policy = AllocationPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(policy.validate(), Err(Error::InvalidConfig(_))));

        let policy = AllocationPolicy {
            initial_backoff_ms: 500,
            max_backoff_ms: 10,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }
}
