//! Telemetry record types and the detection payload codec.
//!
//! Detection lists are stored as a single payload column per event. The
//! payload is a JSON array of `{"label": .., "metric": ..}` objects so any
//! consumer can decode it without knowing how it was produced.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Status value marking an accident report
pub const ACCIDENT_STATUS: &str = "accident";

/// Header line of a rendered detections summary
pub const SUMMARY_HEADER: &str = "The following objects were detected:";

/// Errors that can occur while decoding a stored payload
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Payload is not a valid detection list: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Distance or other measurement attached to a detected object.
///
/// Numbers keep their original representation (integer vs float).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metric {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Number(n) => write!(f, "{}", n),
            Metric::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Metric {
    fn from(value: f64) -> Self {
        serde_json::Number::from_f64(value)
            .map(Metric::Number)
            .unwrap_or_else(|| Metric::Text(value.to_string()))
    }
}

impl From<i64> for Metric {
    fn from(value: i64) -> Self {
        Metric::Number(value.into())
    }
}

impl From<&str> for Metric {
    fn from(value: &str) -> Self {
        Metric::Text(value.to_string())
    }
}

/// A single detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Object class (car, pedestrian, ...)
    pub label: String,
    /// Distance or other measurement
    pub metric: Metric,
}

impl Detection {
    pub fn new(label: impl Into<String>, metric: impl Into<Metric>) -> Self {
        Self {
            label: label.into(),
            metric: metric.into(),
        }
    }
}

/// Object detection event reported by a vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub vehicle_id: String,
    /// Producer timestamp, compared as a string
    pub timestamp: String,
    /// Detected objects in reported order
    pub detections: Vec<Detection>,
}

/// Vehicle status report
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub vehicle_id: String,
    /// Producer timestamp, compared as a string
    pub timestamp: String,
    pub status: String,
}

impl StatusRecord {
    pub fn is_accident(&self) -> bool {
        self.status == ACCIDENT_STATUS
    }
}

/// Encode a detection list into its stored payload form
pub fn encode_detections(detections: &[Detection]) -> String {
    // Serializing plain strings and serde_json numbers cannot fail.
    serde_json::to_string(detections).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a stored payload back into the ordered detection list
pub fn decode_detections(payload: &str) -> Result<Vec<Detection>, DecodeError> {
    Ok(serde_json::from_str(payload)?)
}

/// Render the human readable listing of a detection list.
///
/// One `"<metric> <label>"` line per detection after the header, in stored
/// order, without a trailing newline.
pub fn render_summary(detections: &[Detection]) -> String {
    let mut output = String::from(SUMMARY_HEADER);
    for detection in detections {
        output.push('\n');
        output.push_str(&format!("{} {}", detection.metric, detection.label));
    }
    output
}
