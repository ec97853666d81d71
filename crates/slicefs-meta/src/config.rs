//! Engine configuration, loaded from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slicefs_logging::LogConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    /// Reject every mutating operation.
    pub readonly: bool,

    /// Transaction attempts before giving up with `TemporarilyUnavailable`.
    pub max_retries: u32,
    pub retry_init_wait_ms: u64,
    pub retry_max_wait_ms: u64,

    /// How often a blocked lock waiter re-checks without a local wakeup.
    /// Holders in other processes release without notifying us.
    pub lock_recheck_interval_ms: u64,

    pub inode_batch: u64,
    pub chunk_batch: u64,

    pub max_name_len: usize,
    pub max_nlink: u32,
    pub readdir_limit: usize,

    /// History length at which a chunk is announced for compaction.
    pub compact_threshold: usize,
    pub max_reclaim_chunks_per_txn: usize,
    pub reclaim_interval_secs: u64,

    /// Zero means unlimited.
    pub capacity_bytes: u64,
    /// Zero means unlimited.
    pub max_inodes: u64,

    pub log: LogConfig,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            readonly: false,
            max_retries: 10,
            retry_init_wait_ms: 1,
            retry_max_wait_ms: 100,
            lock_recheck_interval_ms: 1000,
            inode_batch: 100,
            chunk_batch: 1000,
            max_name_len: 255,
            max_nlink: 65000,
            readdir_limit: 1024,
            compact_threshold: 350,
            max_reclaim_chunks_per_txn: 100,
            reclaim_interval_secs: 60,
            capacity_bytes: 0,
            max_inodes: 0,
            log: LogConfig::default(),
        }
    }
}

impl MetaConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: MetaConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        }
        if self.max_retries == 0 {
            return invalid("max_retries", "must be at least 1");
        }
        if self.retry_init_wait_ms > self.retry_max_wait_ms {
            return invalid("retry_init_wait_ms", "exceeds retry_max_wait_ms");
        }
        if self.inode_batch == 0 || self.chunk_batch == 0 {
            return invalid("inode_batch", "id batches must be non-empty");
        }
        if self.max_name_len == 0 || self.max_name_len > 255 {
            return invalid("max_name_len", "must be within 1..=255");
        }
        if self.max_nlink < 2 {
            return invalid("max_nlink", "must be at least 2");
        }
        if self.readdir_limit == 0 {
            return invalid("readdir_limit", "must be positive");
        }
        if self.compact_threshold == 0 {
            return invalid("compact_threshold", "must be positive");
        }
        if self.max_reclaim_chunks_per_txn == 0 {
            return invalid("max_reclaim_chunks_per_txn", "must be positive");
        }
        if self.lock_recheck_interval_ms == 0 {
            return invalid("lock_recheck_interval_ms", "must be positive");
        }
        Ok(())
    }

    pub fn retry_init_wait(&self) -> Duration {
        Duration::from_millis(self.retry_init_wait_ms)
    }

    pub fn retry_max_wait(&self) -> Duration {
        Duration::from_millis(self.retry_max_wait_ms)
    }

    pub fn lock_recheck_interval(&self) -> Duration {
        Duration::from_millis(self.lock_recheck_interval_ms)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }
}
