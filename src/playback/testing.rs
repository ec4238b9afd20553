//! Fixtures shared by the playback tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::broadcast::{Broadcaster, DeliveryReport};
use crate::config::{PlaybackConfig, SpeedProfile};
use crate::core::{BatchPayload, EndOfStream, EventRecord, PlaybackEvent};
use crate::error::{StoreError, StoreResult};
use crate::store::{EventStore, MemoryStore};

/// 2024-01-01 at `hour`:00 UTC
pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
}

/// One record on every hour in `from..to`, id = hour
pub fn hourly_records(from: u32, to: u32) -> Vec<EventRecord> {
    (from..to)
        .map(|h| EventRecord::new(h as i64, at(h), 48.0, 37.0, 300.0 + h as f64))
        .collect()
}

/// Fast timings and a small speed table measured in hours per tick
pub fn test_config() -> PlaybackConfig {
    PlaybackConfig {
        speeds: vec![
            SpeedProfile::new("slowest", 0.5, 2, "30 min/sec", 6000),
            SpeedProfile::new("slow", 1.0, 4, "1 h/sec", 4000),
            SpeedProfile::new("fast", 2.0, 8, "2 h/sec", 2000),
            SpeedProfile::new("fastest", 6.0, 16, "6 h/sec", 1500),
        ],
        default_speed: "slow".into(),
        tick_period_ms: 5,
        recv_timeout_ms: 20,
        query_timeout_ms: 1000,
        subscriber_buffer: 256,
    }
}

/// Memory store that remembers every window it was asked for
pub struct RecordingStore {
    inner: MemoryStore,
    windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    failing: Vec<DateTime<Utc>>,
}

impl RecordingStore {
    pub fn new(records: Vec<EventRecord>) -> Self {
        Self::failing_at(records, Vec::new())
    }

    /// Queries for windows starting at any of `starts` fail as unavailable
    pub fn failing_at(records: Vec<EventRecord>, starts: Vec<DateTime<Utc>>) -> Self {
        Self {
            inner: MemoryStore::new(records),
            windows: Mutex::new(Vec::new()),
            failing: starts,
        }
    }

    pub fn windows(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventStore for RecordingStore {
    async fn count_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<u64> {
        self.inner.count_in_range(start, end).await
    }

    async fn query_interval(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<Vec<EventRecord>> {
        self.windows.lock().unwrap().push((start, end));
        if self.failing.contains(&start) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.query_interval(start, end).await
    }
}

/// Broadcaster that keeps everything it is given, optionally slowly
#[derive(Default)]
pub struct RecordingBroadcaster {
    events: Mutex<Vec<PlaybackEvent>>,
    delay: Option<Duration>,
}

impl RecordingBroadcaster {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub fn events(&self) -> Vec<PlaybackEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<Arc<BatchPayload>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PlaybackEvent::FireUpdate(p) => Some(p),
                PlaybackEvent::PlaybackEnded(_) => None,
            })
            .collect()
    }

    pub fn endings(&self) -> Vec<EndOfStream> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PlaybackEvent::PlaybackEnded(end) => Some(end),
                PlaybackEvent::FireUpdate(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn publish(&self, payload: Arc<BatchPayload>) -> DeliveryReport {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.events.lock().unwrap().push(PlaybackEvent::FireUpdate(payload));
        DeliveryReport { delivered: 1, failures: Vec::new() }
    }

    async fn publish_end_of_stream(&self, end: EndOfStream) -> DeliveryReport {
        self.events.lock().unwrap().push(PlaybackEvent::PlaybackEnded(end));
        DeliveryReport { delivered: 1, failures: Vec::new() }
    }
}
