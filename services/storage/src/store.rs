use crate::config::DatabaseConfig;
use crate::records::{decode_detections, render_summary, DecodeError, Detection, ACCIDENT_STATUS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors returned by the telemetry store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No rows in {table} for vehicle {vehicle_id}")]
    NotFound { table: String, vehicle_id: String },

    #[error("Stored payload for vehicle {vehicle_id} could not be decoded: {source}")]
    Decode {
        vehicle_id: String,
        #[source]
        source: DecodeError,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid table name: {0:?}")]
    InvalidTableName(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

/// Result of an insert-if-absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was appended
    Inserted,
    /// A row with the same (vehicle_id, timestamp) already existed
    Duplicate,
}

/// Row counts across both tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StorageStats {
    pub detection_rows: i64,
    pub status_rows: i64,
    pub vehicle_count: i64,
}

/// Persistence for the detection and status streams.
///
/// Rows are keyed by (vehicle_id, timestamp) within each table and are only
/// ever appended. "Latest" always means the greatest timestamp, regardless of
/// insertion order.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// True if a detection row with this exact key exists
    async fn detection_exists(&self, vehicle_id: &str, timestamp: &str)
        -> Result<bool, StoreError>;

    /// True if a status row with this exact key exists
    async fn status_exists(&self, vehicle_id: &str, timestamp: &str) -> Result<bool, StoreError>;

    /// Append a detection row unless its key is already present
    async fn insert_detection(
        &self,
        vehicle_id: &str,
        timestamp: &str,
        payload: &str,
    ) -> Result<InsertOutcome, StoreError>;

    /// Append a status row unless its key is already present
    async fn insert_status(
        &self,
        vehicle_id: &str,
        timestamp: &str,
        status: &str,
    ) -> Result<InsertOutcome, StoreError>;

    /// Status of the vehicle's newest status row
    async fn latest_status(&self, vehicle_id: &str) -> Result<String, StoreError>;

    /// Decoded detections of the vehicle's newest detection row
    async fn latest_detections(&self, vehicle_id: &str) -> Result<Vec<Detection>, StoreError>;

    /// Rendered listing of the vehicle's newest detections
    async fn latest_detections_summary(&self, vehicle_id: &str) -> Result<String, StoreError> {
        let detections = self.latest_detections(vehicle_id).await?;
        Ok(render_summary(&detections))
    }

    /// True if any status row for the vehicle reports an accident
    async fn has_accident_history(&self, vehicle_id: &str) -> Result<bool, StoreError>;

    /// Aggregate row counts
    async fn stats(&self) -> Result<StorageStats, StoreError>;

    /// Release the underlying connections; later calls fail with `Unavailable`
    async fn close(&self);
}

/// SQLite-backed telemetry store
pub struct SqliteStore {
    pool: SqlitePool,
    detections_table: String,
    status_table: String,
}

impl SqliteStore {
    /// Open (or create) the database and ensure both tables exist
    pub async fn open(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let detections_table = validate_table_name(&config.detections_table)?;
        let status_table = validate_table_name(&config.status_table)?;

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            detections_table,
            status_table,
        };
        store.create_tables().await?;

        info!(
            path = %config.path.display(),
            detections_table = %store.detections_table,
            status_table = %store.status_table,
            "Opened telemetry store"
        );

        Ok(store)
    }

    /// Idempotent schema setup
    async fn create_tables(&self) -> Result<(), StoreError> {
        for table in [&self.detections_table, &self.status_table] {
            let sql = format!(
                r#"
                CREATE TABLE IF NOT EXISTS "{table}" (
                    vehicle_id TEXT NOT NULL,
                    timestamp  TEXT NOT NULL,
                    payload    TEXT NOT NULL,
                    UNIQUE (vehicle_id, timestamp)
                )
                "#
            );
            sqlx::query(&sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn exists(
        &self,
        table: &str,
        vehicle_id: &str,
        timestamp: &str,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            r#"SELECT EXISTS(SELECT 1 FROM "{table}" WHERE vehicle_id = ? AND timestamp = ?)"#
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(vehicle_id)
            .bind(timestamp)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn insert(
        &self,
        table: &str,
        vehicle_id: &str,
        timestamp: &str,
        payload: &str,
    ) -> Result<InsertOutcome, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO "{table}" (vehicle_id, timestamp, payload)
            VALUES (?, ?, ?)
            ON CONFLICT (vehicle_id, timestamp) DO NOTHING
            "#
        );
        let result = sqlx::query(&sql)
            .bind(vehicle_id)
            .bind(timestamp)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        let outcome = if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        };
        debug!(table, vehicle_id, timestamp, ?outcome, "Insert");
        Ok(outcome)
    }

    /// Payload of the greatest-timestamp row for a vehicle
    async fn latest_payload(&self, table: &str, vehicle_id: &str) -> Result<String, StoreError> {
        let sql = format!(
            r#"
            SELECT payload FROM "{table}"
            WHERE vehicle_id = ?
            ORDER BY timestamp DESC
            LIMIT 1
            "#
        );
        let payload: Option<String> = sqlx::query_scalar(&sql)
            .bind(vehicle_id)
            .fetch_optional(&self.pool)
            .await?;

        payload.ok_or_else(|| StoreError::NotFound {
            table: table.to_string(),
            vehicle_id: vehicle_id.to_string(),
        })
    }
}

#[async_trait]
impl TelemetryStore for SqliteStore {
    async fn detection_exists(
        &self,
        vehicle_id: &str,
        timestamp: &str,
    ) -> Result<bool, StoreError> {
        self.exists(&self.detections_table, vehicle_id, timestamp).await
    }

    async fn status_exists(&self, vehicle_id: &str, timestamp: &str) -> Result<bool, StoreError> {
        self.exists(&self.status_table, vehicle_id, timestamp).await
    }

    #[instrument(level = "debug", skip(self, payload))]
    async fn insert_detection(
        &self,
        vehicle_id: &str,
        timestamp: &str,
        payload: &str,
    ) -> Result<InsertOutcome, StoreError> {
        self.insert(&self.detections_table, vehicle_id, timestamp, payload)
            .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn insert_status(
        &self,
        vehicle_id: &str,
        timestamp: &str,
        status: &str,
    ) -> Result<InsertOutcome, StoreError> {
        self.insert(&self.status_table, vehicle_id, timestamp, status)
            .await
    }

    async fn latest_status(&self, vehicle_id: &str) -> Result<String, StoreError> {
        self.latest_payload(&self.status_table, vehicle_id).await
    }

    async fn latest_detections(&self, vehicle_id: &str) -> Result<Vec<Detection>, StoreError> {
        let payload = self
            .latest_payload(&self.detections_table, vehicle_id)
            .await?;
        decode_detections(&payload).map_err(|source| StoreError::Decode {
            vehicle_id: vehicle_id.to_string(),
            source,
        })
    }

    async fn has_accident_history(&self, vehicle_id: &str) -> Result<bool, StoreError> {
        let sql = format!(
            r#"SELECT EXISTS(SELECT 1 FROM "{}" WHERE vehicle_id = ? AND payload = ?)"#,
            self.status_table
        );
        let accident: bool = sqlx::query_scalar(&sql)
            .bind(vehicle_id)
            .bind(ACCIDENT_STATUS)
            .fetch_one(&self.pool)
            .await?;
        Ok(accident)
    }

    async fn stats(&self) -> Result<StorageStats, StoreError> {
        let sql = format!(
            r#"
            SELECT
                (SELECT COUNT(*) FROM "{d}") AS detection_rows,
                (SELECT COUNT(*) FROM "{s}") AS status_rows,
                (SELECT COUNT(*) FROM (
                    SELECT vehicle_id FROM "{d}"
                    UNION
                    SELECT vehicle_id FROM "{s}"
                )) AS vehicle_count
            "#,
            d = self.detections_table,
            s = self.status_table
        );
        let stats = sqlx::query_as::<_, StorageStats>(&sql)
            .fetch_one(&self.pool)
            .await?;
        Ok(stats)
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Telemetry store closed");
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass
fn validate_table_name(name: &str) -> Result<String, StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(name.to_string())
    } else {
        Err(StoreError::InvalidTableName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::encode_detections;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn open_temp_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&DatabaseConfig::at(dir.path().join("telemetry.db")))
            .await
            .unwrap();
        (dir, store)
    }

    #[test]
    fn test_table_name_validation() {
        assert!(validate_table_name("ObjectsEvents").is_ok());
        assert!(validate_table_name("_status_2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("2fast").is_err());
        assert!(validate_table_name("x\"; DROP TABLE y; --").is_err());
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig::at(dir.path().join("telemetry.db"));

        let store = SqliteStore::open(&config).await.unwrap();
        store.insert_status("V1", "t1", "normal").await.unwrap();
        store.close().await;

        let reopened = SqliteStore::open(&config).await.unwrap();
        assert!(reopened.status_exists("V1", "t1").await.unwrap());
        assert_eq!(reopened.stats().await.unwrap().status_rows, 1);
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let (_dir, store) = open_temp_store().await;

        assert!(!store.detection_exists("V1", "t1").await.unwrap());
        assert_eq!(
            store.insert_detection("V1", "t1", "[]").await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_detection("V1", "t1", "[]").await.unwrap(),
            InsertOutcome::Duplicate
        );
        assert!(store.detection_exists("V1", "t1").await.unwrap());
        // Keys are per table
        assert!(!store.status_exists("V1", "t1").await.unwrap());

        assert_eq!(store.stats().await.unwrap().detection_rows, 1);
    }

    #[tokio::test]
    async fn test_latest_is_by_timestamp_not_insertion_order() {
        let (_dir, store) = open_temp_store().await;

        store.insert_status("V1", "2024-01-01T00:02:00", "parked").await.unwrap();
        store.insert_status("V1", "2024-01-01T00:03:00", "driving").await.unwrap();
        store.insert_status("V1", "2024-01-01T00:01:00", "normal").await.unwrap();

        assert_eq!(store.latest_status("V1").await.unwrap(), "driving");

        let older = encode_detections(&[Detection::new("tree", 1_i64)]);
        let newer = encode_detections(&[Detection::new("car", 12.5)]);
        store.insert_detection("V1", "2024-01-01T00:05:00", &newer).await.unwrap();
        store.insert_detection("V1", "2024-01-01T00:04:00", &older).await.unwrap();

        assert_eq!(
            store.latest_detections_summary("V1").await.unwrap(),
            "The following objects were detected:\n12.5 car"
        );
    }

    #[tokio::test]
    async fn test_unknown_vehicle_is_not_found() {
        let (_dir, store) = open_temp_store().await;

        assert!(matches!(
            store.latest_status("ghost").await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.latest_detections_summary("ghost").await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(!store.has_accident_history("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_payload_surfaces_decode_error() {
        let (_dir, store) = open_temp_store().await;

        store
            .insert_detection("V1", "t1", "[{'object_type': 'car'}]")
            .await
            .unwrap();

        assert!(matches!(
            store.latest_detections_summary("V1").await,
            Err(StoreError::Decode { .. })
        ));
        // The bad row does not affect other reads
        assert_eq!(store.stats().await.unwrap().detection_rows, 1);
    }

    #[tokio::test]
    async fn test_accident_history() {
        let (_dir, store) = open_temp_store().await;

        store.insert_status("V1", "t1", "normal").await.unwrap();
        assert!(!store.has_accident_history("V1").await.unwrap());

        store.insert_status("V1", "t2", "accident").await.unwrap();
        store.insert_status("V1", "t3", "normal").await.unwrap();
        assert!(store.has_accident_history("V1").await.unwrap());
        assert!(!store.has_accident_history("V2").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_inserts_keep_keys_unique() {
        let (_dir, store) = open_temp_store().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut inserted = 0;
                for i in 0..20 {
                    let ts = format!("2024-01-01T00:00:{:02}", i);
                    if store.insert_status("V1", &ts, "normal").await.unwrap()
                        == InsertOutcome::Inserted
                    {
                        inserted += 1;
                    }
                }
                inserted
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }

        assert_eq!(total, 20);
        assert_eq!(store.stats().await.unwrap().status_rows, 20);
    }

    #[tokio::test]
    async fn test_stats_counts_distinct_vehicles() {
        let (_dir, store) = open_temp_store().await;

        store.insert_detection("V1", "t1", "[]").await.unwrap();
        store.insert_status("V1", "t1", "normal").await.unwrap();
        store.insert_status("V2", "t1", "normal").await.unwrap();

        assert_eq!(
            store.stats().await.unwrap(),
            StorageStats {
                detection_rows: 1,
                status_rows: 2,
                vehicle_count: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_operations_fail_after_close() {
        let (_dir, store) = open_temp_store().await;
        store.close().await;

        tokio_test::assert_err!(store.status_exists("V1", "t1").await);
        assert!(matches!(
            store.insert_status("V1", "t1", "normal").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
