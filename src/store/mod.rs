pub mod adapter;
pub mod memory;

pub use adapter::StoreQueryAdapter;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::EventRecord;
use crate::error::StoreResult;

/// Time-indexed archive of fire detections
///
/// Both range operations are left-exclusive and right-inclusive:
/// a record matches when `start < timestamp <= end`. Consecutive windows
/// sharing a boundary therefore never return the same record twice.
///
/// Implementations:
/// - [`MemoryStore`], a sorted in-memory archive
/// - external database adapters supplied by the embedding service
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Number of records in `(start, end]`
    async fn count_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<u64>;

    /// Records in `(start, end]`, ascending by timestamp
    async fn query_interval(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<Vec<EventRecord>>;
}
