use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use crate::core::{parse_timestamp, Confidence, DayNight, EventRecord};

/// Column positions resolved from the CSV header
struct Columns {
    id: Option<usize>,
    time: usize,
    latitude: usize,
    longitude: usize,
    brightness: usize,
    bright_t31: Option<usize>,
    frp: Option<usize>,
    confidence: Option<usize>,
    scan: Option<usize>,
    track: Option<usize>,
    satellite: Option<usize>,
    instrument: Option<usize>,
    daynight: Option<usize>,
    event_type: Option<usize>,
    version: Option<usize>,
}

/// Load fire detections from a CSV export of the archive
///
/// Required columns: time (`datetime_utc`, `timestamp`, ...), latitude,
/// longitude and brightness. Everything else falls back to the archive's
/// column defaults. Records are returned sorted by timestamp.
pub fn load_csv(path: &str) -> Result<Vec<EventRecord>> {
    let file = std::fs::File::open(Path::new(path))
        .with_context(|| format!("Failed to open archive: {}", path))?;
    load_csv_from_reader(file)
}

pub fn load_csv_from_reader<R: Read>(reader: R) -> Result<Vec<EventRecord>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers = rdr.headers()?.clone();
    let cols = detect_columns(&headers)?;

    let mut records = Vec::new();

    for (row, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read CSV row {}", row + 1))?;

        let time = record.get(cols.time).context("Missing time column")?;
        let timestamp = parse_timestamp(time).with_context(|| format!("Row {}: bad timestamp", row + 1))?;

        let id = optional(&record, cols.id)
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(row as i64 + 1);
        let latitude = required_f64(&record, cols.latitude, "latitude", row)?;
        let longitude = required_f64(&record, cols.longitude, "longitude", row)?;
        let brightness = required_f64(&record, cols.brightness, "brightness", row)?;

        let mut event = EventRecord::new(id, timestamp, latitude, longitude, brightness);

        if let Some(v) = optional_f64(&record, cols.bright_t31) {
            event.bright_t31 = v;
        }
        if let Some(v) = optional_f64(&record, cols.frp) {
            event.frp = v;
        }
        if let Some(v) = optional(&record, cols.confidence) {
            event.confidence = Confidence::parse(v);
        }
        if let Some(v) = optional_f64(&record, cols.scan) {
            event.scan = v;
        }
        if let Some(v) = optional_f64(&record, cols.track) {
            event.track = v;
        }
        if let Some(v) = optional(&record, cols.satellite) {
            event.satellite = v.to_string();
        }
        if let Some(v) = optional(&record, cols.instrument) {
            event.instrument = v.to_string();
        }
        if let Some(v) = optional(&record, cols.daynight) {
            event.daynight = DayNight::parse(v);
        }
        if let Some(v) = optional(&record, cols.event_type).and_then(|s| s.parse::<i32>().ok()) {
            event.event_type = v;
        }
        if let Some(v) = optional(&record, cols.version) {
            event.version = v.to_string();
        }

        records.push(event);
    }

    // Stable sort keeps archive order among equal timestamps
    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    Ok(records)
}

fn optional<'r>(record: &'r csv::StringRecord, idx: Option<usize>) -> Option<&'r str> {
    idx.and_then(|i| record.get(i)).filter(|s| !s.is_empty())
}

fn optional_f64(record: &csv::StringRecord, idx: Option<usize>) -> Option<f64> {
    optional(record, idx).and_then(|s| s.parse::<f64>().ok())
}

fn required_f64(record: &csv::StringRecord, idx: usize, name: &str, row: usize) -> Result<f64> {
    record.get(idx)
        .and_then(|s| s.parse::<f64>().ok())
        .with_context(|| format!("Row {}: missing or invalid {}", row + 1, name))
}

/// Detect column indices from CSV headers
fn detect_columns(headers: &csv::StringRecord) -> Result<Columns> {
    Ok(Columns {
        id: find_column(headers, &["id", "event_id"]),
        time: require_column(headers, &["datetime_utc", "datetime", "timestamp", "time", "acq_datetime"])?,
        latitude: require_column(headers, &["latitude", "lat"])?,
        longitude: require_column(headers, &["longitude", "lon", "lng"])?,
        brightness: require_column(headers, &["brightness", "bright_ti4"])?,
        bright_t31: find_column(headers, &["bright_t31", "bright_ti5"]),
        frp: find_column(headers, &["frp"]),
        confidence: find_column(headers, &["confidence"]),
        scan: find_column(headers, &["scan"]),
        track: find_column(headers, &["track"]),
        satellite: find_column(headers, &["satellite"]),
        instrument: find_column(headers, &["instrument"]),
        daynight: find_column(headers, &["daynight"]),
        event_type: find_column(headers, &["type"]),
        version: find_column(headers, &["version"]),
    })
}

/// Find a column by checking possible names
fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let header_lower = header.to_lowercase();
        names.iter().any(|&name| header_lower == name)
    })
}

fn require_column(headers: &csv::StringRecord, names: &[&str]) -> Result<usize> {
    match find_column(headers, names) {
        Some(idx) => Ok(idx),
        None => anyhow::bail!("Could not find column with names: {:?}", names),
    }
}
