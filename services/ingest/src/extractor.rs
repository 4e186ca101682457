//! File classification and record extraction.
//!
//! Detection files carry an `objects_detection_events` array and status
//! files a `vehicle_status` array. A file whose outer shape is wrong is
//! rejected as a whole; a single bad element is rejected on its own while
//! its siblings are still extracted.

use crate::config::{IngestionConfig, WatchConfig};
use serde_json::{Map, Value};
use std::path::Path;
use telemetry_storage::{Detection, DetectionRecord, Metric, StatusRecord};
use thiserror::Error;

const DETECTION_EVENTS_KEY: &str = "objects_detection_events";
const VEHICLE_STATUS_KEY: &str = "vehicle_status";

/// Malformed input found while extracting records
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Missing or non-array top-level key `{0}`")]
    MissingArray(&'static str),

    #[error("Record is not a JSON object")]
    NotAnObject,

    #[error("Missing or non-string field `{0}`")]
    InvalidField(String),

    #[error("Detection {index}: {reason}")]
    InvalidDetection { index: usize, reason: String },
}

/// Kind of telemetry file, decided by its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Detections,
    Status,
    Unknown,
}

/// Classifies files by a configured substring in their name
#[derive(Debug, Clone)]
pub struct FileClassifier {
    detection_prefix: String,
    status_prefix: String,
}

impl FileClassifier {
    pub fn new(detection_prefix: impl Into<String>, status_prefix: impl Into<String>) -> Self {
        Self {
            detection_prefix: detection_prefix.into(),
            status_prefix: status_prefix.into(),
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(&config.detection_prefix, &config.status_prefix)
    }

    /// Classify a bare file name. Detection files win if both prefixes match.
    pub fn classify(&self, file_name: &str) -> FileKind {
        if file_name.contains(&self.detection_prefix) {
            FileKind::Detections
        } else if file_name.contains(&self.status_prefix) {
            FileKind::Status
        } else {
            FileKind::Unknown
        }
    }

    /// Classify by the final path component only
    pub fn classify_path(&self, path: &Path) -> FileKind {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| self.classify(name))
            .unwrap_or(FileKind::Unknown)
    }
}

/// An element that could not be turned into a record
#[derive(Debug)]
pub struct RejectedRecord {
    /// Position in the file's top-level array
    pub index: usize,
    pub error: ExtractError,
}

/// Records extracted from one file
#[derive(Debug)]
pub struct Extraction<T> {
    pub records: Vec<T>,
    pub rejected: Vec<RejectedRecord>,
}

impl<T> Default for Extraction<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

/// Parses telemetry file bodies into typed records
#[derive(Debug, Clone)]
pub struct RecordExtractor {
    label_key: String,
    metric_key: String,
}

impl RecordExtractor {
    pub fn new(label_key: impl Into<String>, metric_key: impl Into<String>) -> Self {
        Self {
            label_key: label_key.into(),
            metric_key: metric_key.into(),
        }
    }

    pub fn from_config(config: &IngestionConfig) -> Self {
        Self::new(&config.label_key, &config.metric_key)
    }

    /// Extract detection events from a detection file body
    pub fn extract_detections(
        &self,
        contents: &str,
    ) -> Result<Extraction<DetectionRecord>, ExtractError> {
        extract_array(contents, DETECTION_EVENTS_KEY, |event| {
            self.parse_detection_event(event)
        })
    }

    /// Extract status reports from a status file body
    pub fn extract_status(&self, contents: &str) -> Result<Extraction<StatusRecord>, ExtractError> {
        extract_array(contents, VEHICLE_STATUS_KEY, parse_status_report)
    }

    fn parse_detection_event(
        &self,
        event: &Map<String, Value>,
    ) -> Result<DetectionRecord, ExtractError> {
        let vehicle_id = string_field(event, "vehicle_id")?;
        let timestamp = string_field(event, "detection_time")?;
        let detections = event
            .get("detections")
            .and_then(Value::as_array)
            .ok_or_else(|| ExtractError::InvalidField("detections".to_string()))?;

        let detections = detections
            .iter()
            .enumerate()
            .map(|(index, value)| {
                self.parse_detection(value)
                    .map_err(|reason| ExtractError::InvalidDetection { index, reason })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DetectionRecord {
            vehicle_id,
            timestamp,
            detections,
        })
    }

    /// Read one detection map.
    ///
    /// The configured keys are preferred. A map without them is read
    /// positionally: first value is the label, second the metric, and any
    /// further entries are ignored.
    fn parse_detection(&self, value: &Value) -> Result<Detection, String> {
        let map = value.as_object().ok_or("not a JSON object")?;

        let (label, metric) = match (map.get(&self.label_key), map.get(&self.metric_key)) {
            (Some(label), Some(metric)) => (label, metric),
            _ if map.len() >= 2 => {
                let mut values = map.values();
                match (values.next(), values.next()) {
                    (Some(label), Some(metric)) => (label, metric),
                    _ => return Err("expected a label and a metric".to_string()),
                }
            }
            _ => {
                return Err(format!(
                    "expected `{}` and `{}` keys",
                    self.label_key, self.metric_key
                ))
            }
        };

        let label = label.as_str().ok_or("label is not a string")?;
        let metric = match metric {
            Value::Number(n) => Metric::Number(n.clone()),
            Value::String(s) => Metric::Text(s.clone()),
            other => return Err(format!("unsupported metric value {}", other)),
        };

        Ok(Detection {
            label: label.to_string(),
            metric,
        })
    }
}

impl Default for RecordExtractor {
    fn default() -> Self {
        Self::from_config(&IngestionConfig::default())
    }
}

fn parse_status_report(report: &Map<String, Value>) -> Result<StatusRecord, ExtractError> {
    Ok(StatusRecord {
        vehicle_id: string_field(report, "vehicle_id")?,
        timestamp: string_field(report, "report_time")?,
        status: string_field(report, "status")?,
    })
}

fn string_field(map: &Map<String, Value>, field: &str) -> Result<String, ExtractError> {
    map.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ExtractError::InvalidField(field.to_string()))
}

fn extract_array<T, F>(
    contents: &str,
    key: &'static str,
    parse: F,
) -> Result<Extraction<T>, ExtractError>
where
    F: Fn(&Map<String, Value>) -> Result<T, ExtractError>,
{
    let root: Value = serde_json::from_str(contents)?;
    let elements = root
        .get(key)
        .and_then(Value::as_array)
        .ok_or(ExtractError::MissingArray(key))?;

    let mut extraction = Extraction::default();
    for (index, element) in elements.iter().enumerate() {
        let parsed = element
            .as_object()
            .ok_or(ExtractError::NotAnObject)
            .and_then(&parse);
        match parsed {
            Ok(record) => extraction.records.push(record),
            Err(error) => extraction.rejected.push(RejectedRecord { index, error }),
        }
    }

    Ok(extraction)
}
