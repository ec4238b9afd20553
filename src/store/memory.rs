use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::EventRecord;
use crate::error::StoreResult;
use crate::store::EventStore;

/// Archive held in memory, sorted by timestamp
pub struct MemoryStore {
    records: Vec<EventRecord>,
}

impl MemoryStore {
    pub fn new(mut records: Vec<EventRecord>) -> Self {
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Self { records }
    }

    /// Load a CSV or JSON archive export
    pub fn from_archive(path: &str) -> anyhow::Result<Self> {
        Ok(Self::new(crate::input::load_archive(path)?))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Earliest and latest timestamps in the archive
    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.records.first()?.timestamp, self.records.last()?.timestamp))
    }

    /// Slice of records with `start < timestamp <= end`
    fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[EventRecord] {
        if start >= end {
            return &[];
        }
        let lo = self.records.partition_point(|r| r.timestamp <= start);
        let hi = self.records.partition_point(|r| r.timestamp <= end);
        &self.records[lo..hi]
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn count_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<u64> {
        Ok(self.range(start, end).len() as u64)
    }

    async fn query_interval(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<Vec<EventRecord>> {
        Ok(self.range(start, end).to_vec())
    }
}
