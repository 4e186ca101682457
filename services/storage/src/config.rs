use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Database configuration for the telemetry store
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file (created if missing)
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Table holding object detection events
    #[serde(default = "default_detections_table")]
    pub detections_table: String,
    /// Table holding vehicle status reports
    #[serde(default = "default_status_table")]
    pub status_table: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a writer waits on a locked database, in seconds
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_path() -> PathBuf {
    PathBuf::from("./telemetry.db")
}

fn default_detections_table() -> String {
    "ObjectsEvents".to_string()
}

fn default_status_table() -> String {
    "VehiclesStatus".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_secs() -> u64 {
    5
}

impl DatabaseConfig {
    /// Configuration for a database at `path` with default table names
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Get busy timeout as Duration
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            detections_table: default_detections_table(),
            status_table: default_status_table(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}
