//! Replica configuration.
//!
//! `Mode` and `Granularity` use the same textual names as the benchmark's
//! engine configuration files (`mode: local`, `replication: operation`), so an
//! outer configuration layer can deserialize them directly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::storage::LocalStoreConfig;

/// How a store instance reaches its documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Local durable cache, asynchronously synchronized with the remote store
    Local,
    /// Every operation is a direct remote call
    RemoteOnly,
}

/// What a propagated change / remote notification carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Incremental diff since the document's previous head
    Operation,
    /// Full document snapshot
    State,
}

/// Configuration parse errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown {kind} '{value}'")]
    Unknown { kind: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Mode::Local),
            "remote-only" | "remote" => Ok(Mode::RemoteOnly),
            other => Err(ConfigError::Unknown {
                kind: "mode",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Local => write!(f, "local"),
            Mode::RemoteOnly => write!(f, "remote-only"),
        }
    }
}

impl FromStr for Granularity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operation" => Ok(Granularity::Operation),
            "state" => Ok(Granularity::State),
            other => Err(ConfigError::Unknown {
                kind: "replication granularity",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Operation => write!(f, "operation"),
            Granularity::State => write!(f, "state"),
        }
    }
}

/// Store construction parameters.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Local-first or remote-only
    pub mode: Mode,
    /// Change granularity for propagation and notifications
    pub granularity: Granularity,
    /// Remote store RPC endpoint (`ws://host:port`)
    pub remote_url: String,
    /// Notification feed endpoint (may equal `remote_url`)
    pub listen_url: String,
    /// Parent directory for per-instance local stores
    pub data_dir: PathBuf,
    /// Bounded propagation queue capacity (default: 20,000)
    pub queue_capacity: usize,
    /// Buffered notifications between feed reader and listener (default: 4,096)
    pub subscription_capacity: usize,
    /// RocksDB tuning for the local store
    pub local_store: LocalStoreConfig,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Local,
            granularity: Granularity::Operation,
            remote_url: "ws://127.0.0.1:9090".to_string(),
            listen_url: "ws://127.0.0.1:9090".to_string(),
            data_dir: PathBuf::from("replicas"),
            queue_capacity: 20_000,
            subscription_capacity: 4_096,
            local_store: LocalStoreConfig::default(),
        }
    }
}

impl ReplicaConfig {
    /// Config for testing (small queues, temp directory, no fsync).
    pub fn for_testing(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            queue_capacity: 1_024,
            subscription_capacity: 256,
            local_store: LocalStoreConfig::for_testing(),
            ..Self::default()
        }
    }

    /// Reject settings that cannot back a running replica.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("queue_capacity"));
        }
        if self.subscription_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("subscription_capacity"));
        }
        Ok(())
    }

    /// Point both the RPC and notification endpoints at one server.
    pub fn with_remote(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.listen_url = url.clone();
        self.remote_url = url;
        self
    }
}
