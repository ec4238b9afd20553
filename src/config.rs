//! Playback configuration: the speed table and the engine's timing knobs.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;

/// Largest accepted rate: a thousand years of simulated time per tick
pub const MAX_HOURS_PER_SECOND: f64 = 24.0 * 366.0 * 1000.0;

/// One entry of the speed table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedProfile {
    /// Key used by commands (`"slow"`, `"fast"`, ...)
    pub key: String,
    /// Simulated hours advanced per tick
    pub hours_per_second: f64,
    /// Bounded channel capacity for sessions started at this speed
    pub queue_capacity: usize,
    /// Human readable label
    pub label: String,
    /// Display fade hint stamped on delivered records
    pub fade_ms: u64,
}

impl SpeedProfile {
    pub fn new(key: &str, hours_per_second: f64, queue_capacity: usize, label: &str, fade_ms: u64) -> Self {
        Self {
            key: key.to_string(),
            hours_per_second,
            queue_capacity,
            label: label.to_string(),
            fade_ms,
        }
    }

    /// Simulated time covered by one tick at this speed
    pub fn advance(&self) -> TimeDelta {
        let ms = (self.hours_per_second * 3_600_000.0).round() as i64;
        TimeDelta::try_milliseconds(ms).unwrap_or(TimeDelta::MAX)
    }
}

/// Top-level playback configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Ordered speed table, slowest first
    pub speeds: Vec<SpeedProfile>,
    pub default_speed: String,
    /// Real-time period between producer ticks
    pub tick_period_ms: u64,
    /// Bounded wait on an empty (consumer) or full (producer) channel
    pub recv_timeout_ms: u64,
    /// Upper bound on a single store query
    pub query_timeout_ms: u64,
    /// Per-subscriber event buffer in the in-process hub
    pub subscriber_buffer: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speeds: vec![
                SpeedProfile::new("slowest", 12.0, 10, "0.5 day/sec", 6000),
                SpeedProfile::new("slow", 24.0, 20, "1 day/sec", 4000),
                SpeedProfile::new("normal", 48.0, 30, "2 days/sec", 3000),
                SpeedProfile::new("fast", 120.0, 50, "5 days/sec", 2000),
                SpeedProfile::new("fastest", 240.0, 100, "10 days/sec", 1500),
            ],
            default_speed: "slow".to_string(),
            tick_period_ms: 1000,
            recv_timeout_ms: 1000,
            query_timeout_ms: 5000,
            subscriber_buffer: 64,
        }
    }
}

/// What a freshly connected client needs to render speed controls
#[derive(Debug, Clone, Serialize)]
pub struct ClientConfig {
    pub playback_speeds: Vec<(String, f64)>,
    pub speed_labels: Vec<(String, String)>,
    pub default_speed: String,
}

impl PlaybackConfig {
    /// Default config file location
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ember-replay").join("config.json"))
    }

    /// Load from an explicit path, the default location, or built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from(path);
        }

        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                debug!("No config file found, using built-in speed table");
                Ok(Self::default())
            }
        }
    }

    /// Load and validate a JSON config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = Self::from_json(&contents)
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        info!("Loaded playback config from {:?}", path);
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.speeds.is_empty() {
            return Err(ConfigError::EmptySpeedTable);
        }

        let mut seen = HashSet::new();
        for speed in &self.speeds {
            if !seen.insert(speed.key.as_str()) {
                return Err(ConfigError::DuplicateSpeed { key: speed.key.clone() });
            }
            if !(speed.hours_per_second > 0.0) || speed.advance() <= TimeDelta::zero() {
                return Err(ConfigError::NonPositiveRate { key: speed.key.clone() });
            }
            if speed.hours_per_second > MAX_HOURS_PER_SECOND {
                return Err(ConfigError::ExcessiveRate { key: speed.key.clone() });
            }
            if speed.queue_capacity == 0 {
                return Err(ConfigError::ZeroCapacity { key: speed.key.clone() });
            }
        }

        if self.speed_index(&self.default_speed).is_none() {
            return Err(ConfigError::MissingDefault { key: self.default_speed.clone() });
        }

        for (field, value) in [
            ("tick_period_ms", self.tick_period_ms),
            ("recv_timeout_ms", self.recv_timeout_ms),
            ("query_timeout_ms", self.query_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration { field });
            }
        }

        Ok(())
    }

    /// Position of `key` in the speed table
    pub fn speed_index(&self, key: &str) -> Option<usize> {
        self.speeds.iter().position(|s| s.key == key)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn client_view(&self) -> ClientConfig {
        ClientConfig {
            playback_speeds: self.speeds.iter().map(|s| (s.key.clone(), s.hours_per_second)).collect(),
            speed_labels: self.speeds.iter().map(|s| (s.key.clone(), s.label.clone())).collect(),
            default_speed: self.default_speed.clone(),
        }
    }
}
