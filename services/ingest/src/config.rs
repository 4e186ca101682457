//! Configuration management for the telemetry ingest service.
//!
//! Configuration is layered from built-in defaults, optional configuration
//! files and environment variables prefixed with `TELEMETRY__`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use telemetry_storage::DatabaseConfig;

/// Main configuration for the ingest service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestConfig {
    /// Service-level settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Watched directory settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Telemetry store settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Ingestion worker settings
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

/// Service-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Prometheus exporter port; the exporter is only started when set
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Watched directory configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Directory receiving telemetry files
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Interval between directory scans in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Substring marking object detection files
    #[serde(default = "default_detection_prefix")]
    pub detection_prefix: String,

    /// Substring marking vehicle status files
    #[serde(default = "default_status_prefix")]
    pub status_prefix: String,

    /// Ingest files already present at start-up
    #[serde(default)]
    pub process_existing: bool,
}

/// Ingestion worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    /// Maximum number of batches being ingested at once
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// Files read and inserted concurrently within one batch
    #[serde(default = "default_file_concurrency")]
    pub file_concurrency: usize,

    /// Upper bound on a single batch's ingestion time in seconds
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Key holding the object label inside a detection map
    #[serde(default = "default_label_key")]
    pub label_key: String,

    /// Key holding the distance/metric inside a detection map
    #[serde(default = "default_metric_key")]
    pub metric_key: String,
}

// Default value functions
fn default_service_name() -> String {
    "telemetry-ingest".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_directory() -> PathBuf {
    PathBuf::from("./MonitorFilesDirectory")
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_detection_prefix() -> String {
    "object_detection".to_string()
}
fn default_status_prefix() -> String {
    "vehicle_status".to_string()
}
fn default_max_concurrent_batches() -> usize {
    4
}
fn default_file_concurrency() -> usize {
    4
}
fn default_task_timeout_secs() -> u64 {
    300
}
fn default_label_key() -> String {
    "object_type".to_string()
}
fn default_metric_key() -> String {
    "object_value".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            poll_interval_ms: default_poll_interval_ms(),
            detection_prefix: default_detection_prefix(),
            status_prefix: default_status_prefix(),
            process_existing: false,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: default_max_concurrent_batches(),
            file_concurrency: default_file_concurrency(),
            task_timeout_secs: default_task_timeout_secs(),
            label_key: default_label_key(),
            metric_key: default_metric_key(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from files and environment variables.
    ///
    /// Later sources override earlier ones:
    /// 1. `config/ingest.*`
    /// 2. `/etc/telemetry/ingest.*`
    /// 3. Environment variables (e.g. `TELEMETRY__WATCH__DIRECTORY`)
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/ingest").required(false))
            .add_source(File::with_name("/etc/telemetry/ingest").required(false))
            .add_source(
                Environment::with_prefix("TELEMETRY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.watch.poll_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "watch.poll_interval_ms".to_string(),
                message: "Interval must be greater than 0".to_string(),
            });
        }

        if self.watch.detection_prefix.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "watch.detection_prefix".to_string(),
            ));
        }
        if self.watch.status_prefix.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "watch.status_prefix".to_string(),
            ));
        }

        if self.ingestion.max_concurrent_batches == 0 || self.ingestion.file_concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "ingestion.max_concurrent_batches/file_concurrency".to_string(),
                message: "Limits must be greater than 0".to_string(),
            });
        }

        if self.ingestion.task_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "ingestion.task_timeout_secs".to_string(),
                message: "Timeout must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl WatchConfig {
    /// Get scan interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl IngestionConfig {
    /// Get batch timeout as Duration.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
