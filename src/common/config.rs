//! Configuration for the tablekeeper coordinator

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix, e.g. `TABLEKEEPER_LOCK__LEASE_MS=30000`
pub const ENV_PREFIX: &str = "TABLEKEEPER";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier of this coordinator)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// RocksDB path for catalog, table states, servers and locks
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JSON-lines audit log of enable operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub placement: PlacementConfig,

    #[serde(default)]
    pub runner: RunnerConfig,
}

fn default_node_id() -> String {
    "coord-1".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./tablekeeper-data")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            audit_log: None,
            lock: LockConfig::default(),
            placement: PlacementConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// Locks live in this process only
    Local,
    /// Lease records in the metadata store, shared by every coordinator
    /// opening the same store
    Durable,
}

/// Table lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_backend")]
    pub backend: LockBackend,

    /// Lease of a durable lock record. Leases are not renewed, so this must
    /// exceed the longest enable.
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    /// Delay between attempts while waiting on a held durable lock
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_lock_backend() -> LockBackend {
    LockBackend::Durable
}
fn default_lease_ms() -> u64 {
    600_000
}
fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: default_lock_backend(),
            lease_ms: default_lease_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LockConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Bulk placement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// How long a bulk placement may run before it is reported incomplete
    #[serde(default = "default_bulk_timeout_ms")]
    pub bulk_timeout_ms: u64,

    /// Servers silent for longer than this become suspect, and dead after
    /// twice as long; their regions are then placed elsewhere. 0 disables
    /// heartbeat expiry.
    #[serde(default)]
    pub server_timeout_secs: u64,

    /// How often the coordinator looks for dead servers in the background
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
}

fn default_bulk_timeout_ms() -> u64 {
    300_000
}
fn default_reap_interval_ms() -> u64 {
    5_000
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            bulk_timeout_ms: default_bulk_timeout_ms(),
            server_timeout_secs: 0,
            reap_interval_ms: default_reap_interval_ms(),
        }
    }
}

impl PlacementConfig {
    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_millis(self.bulk_timeout_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn server_timeout_secs(&self) -> Option<u64> {
        (self.server_timeout_secs > 0).then_some(self.server_timeout_secs)
    }
}

/// Task runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Worker tasks processing enable requests
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Prepared requests waiting for a worker
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_workers() -> usize {
    4
}
fn default_queue_depth() -> usize {
    64
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply
    /// `TABLEKEEPER_*` environment overrides (`__` separates sections).
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(crate::Error::InvalidConfig("node_id cannot be empty".into()));
        }
        if self.runner.workers == 0 {
            return Err(crate::Error::InvalidConfig(
                "runner.workers must be at least 1".into(),
            ));
        }
        if self.runner.queue_depth == 0 {
            return Err(crate::Error::InvalidConfig(
                "runner.queue_depth must be at least 1".into(),
            ));
        }
        if self.lock.lease_ms == 0 || self.lock.poll_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "lock.lease_ms and lock.poll_interval_ms must be positive".into(),
            ));
        }
        if self.placement.bulk_timeout_ms == 0 || self.placement.reap_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "placement.bulk_timeout_ms and placement.reap_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
