//! Telemetry Storage
//!
//! Durable storage for the two vehicle telemetry streams: object detection
//! events and vehicle status reports. Each stream lives in its own table of
//! `(vehicle_id, timestamp, payload)` rows, deduplicated on
//! `(vehicle_id, timestamp)` by a uniqueness constraint so concurrent
//! ingestion tasks can insert without coordinating.
//!
//! ## Architecture
//!
//! ```text
//! Ingestion Worker ──insert-if-absent──▶ ┌──────────────┐
//!                                        │ SqliteStore  │  ObjectsEvents
//!                                        │              │  VehiclesStatus
//! TelemetryQueries ◀──latest / history── └──────────────┘
//! ```

pub mod config;
pub mod queries;
pub mod records;
pub mod store;

pub use config::DatabaseConfig;
pub use queries::TelemetryQueries;
pub use records::{
    decode_detections, encode_detections, render_summary, DecodeError, Detection,
    DetectionRecord, Metric, StatusRecord, ACCIDENT_STATUS,
};
pub use store::{InsertOutcome, SqliteStore, StorageStats, StoreError, TelemetryStore};
