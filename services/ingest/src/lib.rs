//! Telemetry Ingest Service
//!
//! Watches a directory for vehicle telemetry files (object detection events
//! and vehicle status reports), extracts their records and loads them into
//! the telemetry store, skipping records that are already present.
//!
//! ## Architecture
//!
//! ```text
//!  Watched dir         DirectoryMonitor            Ingestion tasks (bounded)
//! ┌────────────┐  scan ┌──────────────┐  dispatch ┌───────────────────────┐
//! │ *.json     │──────▶│ interval +   │──────────▶│ Ingestor              │
//! └────────────┘       │ watermark    │           │  classify → extract   │
//!                      └──────────────┘           │  → insert-if-absent   │
//!                                                 └───────────┬───────────┘
//!                                                             ▼
//!                                                     ┌──────────────┐
//!                                                     │ SqliteStore  │
//!                                                     └──────────────┘
//! ```

pub mod config;
pub mod extractor;
pub mod monitor;
pub mod scanner;
pub mod worker;

pub use config::{ConfigValidationError, IngestConfig, IngestionConfig, ServiceConfig, WatchConfig};
pub use extractor::{
    ExtractError, Extraction, FileClassifier, FileKind, RecordExtractor, RejectedRecord,
};
pub use monitor::{DirectoryMonitor, MonitorSummary, PollOutcome};
pub use scanner::{scan, ScanError, ScannedFile, Watermark};
pub use worker::{IngestFailure, IngestReport, Ingestor};
