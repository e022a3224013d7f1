//! Configuration Loader (C10): compiled-in defaults, an optional TOML file,
//! then `MTA_CTL_*` environment variables (highest precedence) — the same
//! three-tier precedence the rest of this codebase's services use for their
//! own configuration.

use std::env;
use std::path::Path;
use std::time::Duration;

use ep_types::config::{ConfigError, RuntimeConfig};
use serde::Deserialize;

const PREFIX: &str = "MTA_CTL_";

pub struct LoadedConfig {
    pub runtime: RuntimeConfig,
    pub log_dir: Option<String>,
    pub log_level: String,
}

/// Loads from `MTA_CTL_CONFIG_FILE` (if set) and the `MTA_CTL_*` variables.
pub fn load_from_env() -> Result<LoadedConfig, ConfigError> {
    let config_file = env_var("CONFIG_FILE");
    load(config_file.as_deref().map(Path::new))
}

pub fn load(config_file: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let mut runtime = RuntimeConfig::default();

    if let Some(path) = config_file {
        apply_toml_file(&mut runtime, path)?;
    }

    if let Some(v) = env_var("STORE_PATH") {
        runtime.store.path = v;
    }
    if let Some(v) = env_u64("BATCH_SIZE")? {
        runtime.ingest.batch_size = v as usize;
    }
    if let Some(v) = env_u64("FLUSH_INTERVAL_MS")? {
        runtime.ingest.flush_interval = Duration::from_millis(v);
    }
    if let Some(v) = env_u64("PARSE_WORKERS")? {
        runtime.ingest.parse_workers = v as usize;
    }
    if let Some(v) = env_u64("QUEUE_DEPTH")? {
        runtime.ingest.queue_depth = v as usize;
    }
    if let Some(v) = env_u64("CORRELATION_INTERVAL_SECS")? {
        runtime.correlation.interval = Duration::from_secs(v);
    }
    if let Some(v) = env_u64("CORRELATION_BATCH_HOURS")? {
        runtime.correlation.batch_hours = v as i64;
    }
    if let Some(v) = env_bool("RETENTION_AUTO")? {
        runtime.retention.auto = v;
    }
    if let Some(v) = env_u64("CLEANUP_INTERVAL_SECS")? {
        runtime.retention.cleanup_interval = Duration::from_secs(v);
    }

    runtime.validate()?;

    Ok(LoadedConfig {
        runtime,
        log_dir: env_var("LOG_DIR"),
        log_level: env_var("LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
    })
}

// --- TOML layer -------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    ingest: RawIngest,
    #[serde(default)]
    correlation: RawCorrelation,
    #[serde(default)]
    retention: RawRetention,
    #[serde(default)]
    store: RawStore,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawIngest {
    batch_size: Option<usize>,
    flush_interval_ms: Option<u64>,
    max_line_bytes: Option<usize>,
    parse_workers: Option<usize>,
    queue_depth: Option<usize>,
    enable_deduplication: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawCorrelation {
    interval_secs: Option<u64>,
    batch_hours: Option<i64>,
    per_message_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawRetention {
    log_entries_days: Option<i64>,
    audit_days: Option<i64>,
    snapshots_days: Option<i64>,
    attempts_days: Option<i64>,
    sessions_days: Option<i64>,
    auto: Option<bool>,
    batch_size: Option<usize>,
    cleanup_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawStore {
    path: Option<String>,
    max_open: Option<u32>,
    max_idle: Option<u32>,
    conn_max_lifetime_secs: Option<u64>,
    busy_timeout_secs: Option<u64>,
}

fn apply_toml_file(runtime: &mut RuntimeConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
        field: "config_file",
        reason: format!("could not read {}: {e}", path.display()),
    })?;
    let raw: RawConfig = toml::from_str(&contents).map_err(|e| ConfigError::Invalid {
        field: "config_file",
        reason: format!("could not parse {}: {e}", path.display()),
    })?;
    apply_raw(runtime, raw);
    Ok(())
}

fn apply_raw(runtime: &mut RuntimeConfig, raw: RawConfig) {
    if let Some(v) = raw.ingest.batch_size {
        runtime.ingest.batch_size = v;
    }
    if let Some(v) = raw.ingest.flush_interval_ms {
        runtime.ingest.flush_interval = Duration::from_millis(v);
    }
    if let Some(v) = raw.ingest.max_line_bytes {
        runtime.ingest.max_line_bytes = v;
    }
    if let Some(v) = raw.ingest.parse_workers {
        runtime.ingest.parse_workers = v;
    }
    if let Some(v) = raw.ingest.queue_depth {
        runtime.ingest.queue_depth = v;
    }
    if let Some(v) = raw.ingest.enable_deduplication {
        runtime.ingest.enable_deduplication = v;
    }

    if let Some(v) = raw.correlation.interval_secs {
        runtime.correlation.interval = Duration::from_secs(v);
    }
    if let Some(v) = raw.correlation.batch_hours {
        runtime.correlation.batch_hours = v;
    }
    if let Some(v) = raw.correlation.per_message_timeout_secs {
        runtime.correlation.per_message_timeout = Duration::from_secs(v);
    }

    if let Some(v) = raw.retention.log_entries_days {
        runtime.retention.log_entries_days = v;
    }
    if let Some(v) = raw.retention.audit_days {
        runtime.retention.audit_days = v;
    }
    if let Some(v) = raw.retention.snapshots_days {
        runtime.retention.snapshots_days = v;
    }
    if let Some(v) = raw.retention.attempts_days {
        runtime.retention.attempts_days = v;
    }
    if let Some(v) = raw.retention.sessions_days {
        runtime.retention.sessions_days = v;
    }
    if let Some(v) = raw.retention.auto {
        runtime.retention.auto = v;
    }
    if let Some(v) = raw.retention.batch_size {
        runtime.retention.batch_size = v;
    }
    if let Some(v) = raw.retention.cleanup_interval_secs {
        runtime.retention.cleanup_interval = Duration::from_secs(v);
    }

    if let Some(v) = raw.store.path {
        runtime.store.path = v;
    }
    if let Some(v) = raw.store.max_open {
        runtime.store.max_open = v;
    }
    if let Some(v) = raw.store.max_idle {
        runtime.store.max_idle = v;
    }
    if let Some(v) = raw.store.conn_max_lifetime_secs {
        runtime.store.conn_max_lifetime = Duration::from_secs(v);
    }
    if let Some(v) = raw.store.busy_timeout_secs {
        runtime.store.busy_timeout = Duration::from_secs(v);
    }
}

// --- env layer ----------------------------------------------------------

fn env_var(suffix: &str) -> Option<String> {
    env::var(format!("{PREFIX}{suffix}")).ok()
}

fn env_u64(suffix: &str) -> Result<Option<u64>, ConfigError> {
    match env_var(suffix) {
        None => Ok(None),
        Some(raw) => raw.parse::<u64>().map(Some).map_err(|_| ConfigError::Invalid {
            field: field_name(suffix),
            reason: format!("not a valid integer: {raw}"),
        }),
    }
}

fn env_bool(suffix: &str) -> Result<Option<bool>, ConfigError> {
    match env_var(suffix) {
        None => Ok(None),
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid {
                field: field_name(suffix),
                reason: format!("not a valid boolean: {raw}"),
            }),
        },
    }
}

fn field_name(suffix: &str) -> &'static str {
    match suffix {
        "BATCH_SIZE" => "ingest.batch_size",
        "FLUSH_INTERVAL_MS" => "ingest.flush_interval",
        "PARSE_WORKERS" => "ingest.parse_workers",
        "QUEUE_DEPTH" => "ingest.queue_depth",
        "CORRELATION_INTERVAL_SECS" => "correlation.interval",
        "CORRELATION_BATCH_HOURS" => "correlation.batch_hours",
        "RETENTION_AUTO" => "retention.auto",
        "CLEANUP_INTERVAL_SECS" => "retention.cleanup_interval",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_successfully_with_no_env_set() {
        let loaded = load(None).unwrap();
        assert_eq!(loaded.runtime.ingest.batch_size, 1000);
        assert_eq!(loaded.log_level, "info");
    }

    #[test]
    fn overrides_batch_size_from_env() {
        env::set_var("MTA_CTL_BATCH_SIZE", "250");
        let loaded = load(None).unwrap();
        assert_eq!(loaded.runtime.ingest.batch_size, 250);
        env::remove_var("MTA_CTL_BATCH_SIZE");
    }

    #[test]
    fn toml_file_overrides_defaults_and_env_overrides_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control-plane.toml");
        std::fs::write(
            &path,
            "[ingest]\nbatch_size = 500\n\n[retention]\nauto = false\n",
        )
        .unwrap();

        let loaded = load(Some(&path)).unwrap();
        assert_eq!(loaded.runtime.ingest.batch_size, 500);
        assert!(!loaded.runtime.retention.auto);

        env::set_var("MTA_CTL_BATCH_SIZE", "999");
        let loaded = load(Some(&path)).unwrap();
        assert_eq!(loaded.runtime.ingest.batch_size, 999);
        env::remove_var("MTA_CTL_BATCH_SIZE");
    }
}
