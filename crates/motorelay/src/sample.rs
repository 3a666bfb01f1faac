//! Core position types for motorelay.
//!
//! A [`PositionSample`] is one timestamped reading of where a subject was.
//! Samples are immutable; a subject's samples are ordered by timestamp and
//! identified by `(subject, timestamp)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of a tracked subject (vehicle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    /// Create a subject id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SubjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A single position reading.
///
/// Field names on the wire follow the relay protocol: `latitude`,
/// `longitude`, `timestamp` (Unix millis), and the optional `speed` (m/s),
/// `heading` (degrees) and `accuracy` (meters).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Latitude in degrees.
    pub latitude: f64,

    /// Longitude in degrees.
    pub longitude: f64,

    /// When the reading was taken, in milliseconds since the Unix epoch.
    #[serde(rename = "timestamp")]
    pub timestamp_millis: i64,

    /// Ground speed reported by the source, in meters per second.
    #[serde(rename = "speed", default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,

    /// Heading reported by the source, in degrees from true north.
    #[serde(rename = "heading", default, skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,

    /// Horizontal accuracy radius, in meters.
    #[serde(rename = "accuracy", default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
}

impl PositionSample {
    /// Create a sample with just a position and a timestamp.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, timestamp_millis: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_millis,
            speed_mps: None,
            heading_deg: None,
            accuracy_meters: None,
        }
    }

    /// Set the reported speed.
    #[must_use]
    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    /// Set the reported heading.
    #[must_use]
    pub fn with_heading(mut self, heading_deg: f64) -> Self {
        self.heading_deg = Some(heading_deg);
        self
    }

    /// Set the reported accuracy.
    #[must_use]
    pub fn with_accuracy(mut self, accuracy_meters: f64) -> Self {
        self.accuracy_meters = Some(accuracy_meters);
        self
    }

    /// Check that both coordinates are finite and inside their valid ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// The sample timestamp as a UTC date-time, if representable.
    #[must_use]
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_id_display() {
        let id = SubjectId::new("moto-42");
        assert_eq!(id.to_string(), "moto-42");
        assert_eq!(id.as_str(), "moto-42");
    }

    #[test]
    fn test_subject_id_serializes_as_plain_string() {
        let id = SubjectId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }

    #[test]
    fn test_sample_builders() {
        let sample = PositionSample::new(-23.55, -46.63, 1_000)
            .with_speed(12.5)
            .with_heading(90.0)
            .with_accuracy(4.0);

        assert_eq!(sample.speed_mps, Some(12.5));
        assert_eq!(sample.heading_deg, Some(90.0));
        assert_eq!(sample.accuracy_meters, Some(4.0));
    }

    #[test]
    fn test_sample_wire_names() {
        let sample = PositionSample::new(1.0, 2.0, 3).with_speed(4.0);
        let json = serde_json::to_value(sample).unwrap();

        assert_eq!(json["latitude"], 1.0);
        assert_eq!(json["longitude"], 2.0);
        assert_eq!(json["timestamp"], 3);
        assert_eq!(json["speed"], 4.0);
        assert!(json.get("heading").is_none());
        assert!(json.get("accuracy").is_none());
    }

    #[test]
    fn test_sample_deserialize_without_optionals() {
        let sample: PositionSample =
            serde_json::from_str(r#"{"latitude": 10.5, "longitude": -3.25, "timestamp": 99}"#)
                .unwrap();
        assert_eq!(sample, PositionSample::new(10.5, -3.25, 99));
    }

    #[test]
    fn test_is_valid() {
        assert!(PositionSample::new(0.0, 0.0, 0).is_valid());
        assert!(PositionSample::new(90.0, -180.0, 0).is_valid());
        assert!(!PositionSample::new(90.1, 0.0, 0).is_valid());
        assert!(!PositionSample::new(0.0, 181.0, 0).is_valid());
        assert!(!PositionSample::new(f64::NAN, 0.0, 0).is_valid());
        assert!(!PositionSample::new(0.0, f64::INFINITY, 0).is_valid());
    }

    #[test]
    fn test_recorded_at() {
        let sample = PositionSample::new(0.0, 0.0, 1_700_000_000_000);
        let at = sample.recorded_at().unwrap();
        assert_eq!(at.timestamp_millis(), 1_700_000_000_000);
    }
}
