//! Runtime configuration shapes (§6) with their specified defaults. Loading
//! these from environment/file layers is the composition root's job
//! (`services/controlplane`); this module only owns the validated shape.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_line_bytes: usize,
    pub parse_workers: usize,
    pub queue_depth: usize,
    pub enable_deduplication: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            flush_interval: Duration::from_secs(5),
            max_line_bytes: 1_048_576,
            parse_workers: 4,
            queue_depth: 10_000,
            enable_deduplication: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    pub interval: Duration,
    pub batch_hours: i64,
    pub per_message_timeout: Duration,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            batch_hours: 24,
            per_message_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub log_entries_days: i64,
    pub audit_days: i64,
    pub snapshots_days: i64,
    pub attempts_days: i64,
    pub sessions_days: i64,
    pub auto: bool,
    pub batch_size: usize,
    pub cleanup_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            log_entries_days: 90,
            audit_days: 365,
            snapshots_days: 30,
            attempts_days: 180,
            sessions_days: 7,
            auto: true,
            batch_size: 1000,
            cleanup_interval: Duration::from_secs(6 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: String,
    pub max_open: u32,
    pub max_idle: u32,
    pub conn_max_lifetime: Duration,
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "mta-control-plane.sqlite3".to_owned(),
            max_open: 25,
            max_idle: 5,
            conn_max_lifetime: Duration::from_secs(5 * 60),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub ingest: IngestConfig,
    pub correlation: CorrelationConfig,
    pub retention: RetentionConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero, got {value}")]
    NotPositive { field: &'static str, value: i64 },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl RuntimeConfig {
    /// Validate cross-field and positivity constraints the defaults always
    /// satisfy but an overridden config might not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.batch_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "ingest.batch_size",
                value: 0,
            });
        }
        if self.ingest.parse_workers == 0 {
            return Err(ConfigError::NotPositive {
                field: "ingest.parse_workers",
                value: 0,
            });
        }
        if self.ingest.queue_depth == 0 {
            return Err(ConfigError::NotPositive {
                field: "ingest.queue_depth",
                value: 0,
            });
        }
        if self.ingest.max_line_bytes == 0 {
            return Err(ConfigError::NotPositive {
                field: "ingest.max_line_bytes",
                value: 0,
            });
        }
        if self.correlation.interval.is_zero() {
            return Err(ConfigError::NotPositive {
                field: "correlation.interval",
                value: 0,
            });
        }
        if self.retention.batch_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "retention.batch_size",
                value: 0,
            });
        }
        if self.store.path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "store.path",
                reason: "must not be empty".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_successfully() {
        RuntimeConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut cfg = RuntimeConfig::default();
        cfg.ingest.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_store_path_is_rejected() {
        let mut cfg = RuntimeConfig::default();
        cfg.store.path = "  ".to_owned();
        assert!(cfg.validate().is_err());
    }
}
