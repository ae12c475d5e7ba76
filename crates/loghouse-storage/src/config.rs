//! Aggregator Configuration
//!
//! Controls how shards are rotated, batched, indexed, and expired:
//!
//! - **rotation_size**: roll the shard when it reaches this size (default: 100 MiB)
//! - **max_backups**: retention cap on shard count (default: 10)
//! - **batch_size**: records per synchronous flush (default: 100)
//! - **flush_interval**: timer-driven flush period (default: 5 s)
//! - **compress_after**: age at which an idle shard is gzipped (default: 24 h)
//! - **retention**: age at which a shard is deleted (default: 7 days)
//! - **index_workers**: asynchronous indexer pool size (default: 2)
//! - **index_queue_cap**: max pending index records (default: 1000)
//! - **close_grace**: shutdown drain budget (default: 10 s)
//!
//! ## Usage
//!
//! ```ignore
//! use loghouse_storage::AggregatorConfig;
//!
//! // Production config
//! let config = AggregatorConfig::new("/var/log/agg", "checkout");
//!
//! // Test config: tiny shards, instant flush
//! let config = AggregatorConfig {
//!     rotation_size: 4 * 1024,
//!     batch_size: 1,
//!     ..AggregatorConfig::new(dir, "checkout")
//! };
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Directory holding the shard family and the index store.
    pub output_dir: PathBuf,

    /// Service name embedded in every shard filename.
    pub service: String,

    /// Maximum shard size in bytes before rotation (default: 100 MiB).
    #[serde(default = "default_rotation_size")]
    pub rotation_size: u64,

    /// Maximum number of non-current shards kept on disk (default: 10).
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Number of buffered records that triggers a synchronous flush (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Period of the timer-driven flush (default: 5 s).
    #[serde(with = "duration_serde", default = "default_flush_interval")]
    pub flush_interval: Duration,

    /// Age past which an idle shard is compressed (default: 24 h).
    #[serde(with = "duration_serde", default = "default_compress_after")]
    pub compress_after: Duration,

    /// Age past which a shard is deleted (default: 7 days).
    #[serde(with = "duration_serde", default = "default_retention")]
    pub retention: Duration,

    /// Size of the asynchronous index worker pool (default: 2).
    #[serde(default = "default_index_workers")]
    pub index_workers: usize,

    /// Capacity of the index queue; a full queue drops indexing (default: 1000).
    #[serde(default = "default_index_queue_cap")]
    pub index_queue_cap: usize,

    /// How long `close()` waits for background tasks to drain (default: 10 s).
    #[serde(with = "duration_serde", default = "default_close_grace")]
    pub close_grace: Duration,
}

impl AggregatorConfig {
    /// Config for the given output directory and service, with every other
    /// knob at its default.
    pub fn new(output_dir: impl Into<PathBuf>, service: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            service: service.into(),
            rotation_size: default_rotation_size(),
            max_backups: default_max_backups(),
            batch_size: default_batch_size(),
            flush_interval: default_flush_interval(),
            compress_after: default_compress_after(),
            retention: default_retention(),
            index_workers: default_index_workers(),
            index_queue_cap: default_index_queue_cap(),
            close_grace: default_close_grace(),
        }
    }

    /// Reject configurations the aggregator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::Config("output_dir must not be empty".to_string()));
        }
        if self.service.is_empty() {
            return Err(Error::Config("service must not be empty".to_string()));
        }
        if self.rotation_size == 0 {
            return Err(Error::Config("rotation_size must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::Config("flush_interval must be positive".to_string()));
        }
        if self.index_workers == 0 {
            return Err(Error::Config("index_workers must be positive".to_string()));
        }
        if self.index_queue_cap == 0 {
            return Err(Error::Config("index_queue_cap must be positive".to_string()));
        }
        Ok(())
    }
}

fn default_rotation_size() -> u64 {
    100 * 1024 * 1024
}

fn default_max_backups() -> usize {
    10
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_compress_after() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_retention() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

fn default_index_workers() -> usize {
    2
}

fn default_index_queue_cap() -> usize {
    1000
}

fn default_close_grace() -> Duration {
    Duration::from_secs(10)
}

/// Serde helpers for Duration fields, stored as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AggregatorConfig::new("/tmp/logs", "svc");
        assert_eq!(config.rotation_size, 100 * 1024 * 1024);
        assert_eq!(config.max_backups, 10);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert_eq!(config.compress_after, Duration::from_secs(86400));
        assert_eq!(config.retention, Duration::from_secs(7 * 86400));
        assert_eq!(config.index_workers, 2);
        assert_eq!(config.index_queue_cap, 1000);
        assert_eq!(config.close_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(AggregatorConfig::new("/tmp/logs", "svc").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_service() {
        let config = AggregatorConfig::new("/tmp/logs", "");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_dir() {
        let config = AggregatorConfig::new("", "svc");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = AggregatorConfig::new("/tmp/logs", "svc");
        config.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: AggregatorConfig =
            serde_json::from_str(r#"{"output_dir":"/tmp/logs","service":"svc"}"#).unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.retention, Duration::from_secs(7 * 86400));
    }

    #[test]
    fn test_duration_roundtrip_as_seconds() {
        let config = AggregatorConfig::new("/tmp/logs", "svc");
        let json = serde_json::to_string(&config).unwrap();
        let back: AggregatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.flush_interval, config.flush_interval);
        assert_eq!(back.close_grace, config.close_grace);
    }
}
