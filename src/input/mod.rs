pub mod csv;

pub use self::csv::{load_csv, load_csv_from_reader};

use anyhow::{Context, Result};
use crate::core::EventRecord;

/// Archive export format
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputFormat {
    Csv,
    Json,
    Unknown,
}

/// Detect the format of an archive export by checking its first bytes
pub fn detect_format(data: &[u8]) -> InputFormat {
    let first = data.iter().copied().find(|b| !b.is_ascii_whitespace());

    if first == Some(b'[') {
        return InputFormat::Json;
    }

    if is_csv(data) {
        return InputFormat::Csv;
    }

    InputFormat::Unknown
}

fn is_csv(data: &[u8]) -> bool {
    if data.len() < 10 {
        return false;
    }

    match std::str::from_utf8(&data[..data.len().min(500)]) {
        // Header row of the archive has at least latitude, longitude, time, brightness
        Ok(text) => text.lines().take(5).any(|line| line.chars().filter(|&c| c == ',').count() >= 3),
        Err(_) => false,
    }
}

/// Load an archive export, auto-detecting CSV or a JSON array of records
pub fn load_archive(path: &str) -> Result<Vec<EventRecord>> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read archive: {}", path))?;

    match detect_format(&data) {
        InputFormat::Csv => load_csv_from_reader(data.as_slice()),
        InputFormat::Json => {
            let mut records: Vec<EventRecord> = serde_json::from_slice(&data)
                .with_context(|| format!("Invalid JSON archive: {}", path))?;
            records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            Ok(records)
        }
        InputFormat::Unknown => anyhow::bail!("Unknown archive format: {}", path),
    }
}
