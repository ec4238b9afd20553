use serde::{Deserialize, Serialize};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Detection confidence reported by the instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[default]
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Parse the archive's textual confidence, falling back to `Low`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "h" | "high" => Confidence::High,
            "m" | "n" | "nominal" | "medium" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

/// Day/night flag of the overpass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DayNight {
    #[serde(rename = "D")]
    Day,
    #[serde(rename = "N")]
    Night,
    #[default]
    #[serde(rename = "U")]
    Unknown,
}

impl DayNight {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "D" | "d" => DayNight::Day,
            "N" | "n" => DayNight::Night,
            _ => DayNight::Unknown,
        }
    }
}

/// A single geotagged fire detection from the archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Archive row id
    pub id: i64,

    /// Detection time in UTC
    #[serde(rename = "datetime_utc")]
    pub timestamp: DateTime<Utc>,

    pub latitude: f64,
    pub longitude: f64,

    /// Channel 21/22 brightness temperature (K)
    pub brightness: f64,

    /// Channel 31 brightness temperature (K)
    pub bright_t31: f64,

    /// Fire radiative power (MW)
    pub frp: f64,

    pub confidence: Confidence,

    /// Pixel scan/track geometry
    pub scan: f64,
    pub track: f64,

    pub satellite: String,
    pub instrument: String,
    pub daynight: DayNight,

    #[serde(rename = "type")]
    pub event_type: i32,

    /// Archive schema version
    pub version: String,

    /// Display hint in milliseconds, derived from the playback speed of the
    /// tick that delivered this record. Never stored in the archive.
    #[serde(rename = "fade_duration", default)]
    pub fade_duration_ms: u64,
}

impl EventRecord {
    /// Create a record with the archive's column defaults
    pub fn new(id: i64, timestamp: DateTime<Utc>, latitude: f64, longitude: f64, brightness: f64) -> Self {
        Self {
            id,
            timestamp,
            latitude,
            longitude,
            brightness,
            bright_t31: brightness,
            frp: 0.0,
            confidence: Confidence::Low,
            scan: 1.0,
            track: 1.0,
            satellite: String::new(),
            instrument: String::new(),
            daynight: DayNight::Unknown,
            event_type: 0,
            version: "1.0".to_string(),
            fade_duration_ms: 0,
        }
    }
}

/// Parse an archive or command timestamp.
///
/// Accepts RFC 3339 (`2024-03-15T14:30:00Z`), `2024-03-15 14:30:00` and
/// `2024-03-15T14:30:00`; zone-less forms are taken as UTC.
pub fn parse_timestamp(value: &str) -> anyhow::Result<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(date) = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }

    anyhow::bail!("Unrecognized timestamp: {:?}", value)
}
