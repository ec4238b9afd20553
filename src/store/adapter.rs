use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::EventRecord;
use crate::error::{StoreError, StoreResult};
use crate::store::EventStore;

/// Wraps an [`EventStore`] so a failing or slow store can never end a session.
///
/// Every call is bounded by `timeout`. A failure or timeout is logged as
/// store-unavailable and turned into an empty result for that window.
pub struct StoreQueryAdapter {
    store: Arc<dyn EventStore>,
    timeout: Duration,
    failures: AtomicU64,
}

impl StoreQueryAdapter {
    pub fn new(store: Arc<dyn EventStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            failures: AtomicU64::new(0),
        }
    }

    /// Records in `(start, end]`; empty on any store failure
    pub async fn query_interval(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<EventRecord> {
        match self.bounded(self.store.query_interval(start, end)).await {
            Ok(records) => {
                debug!("Window ({}, {}] returned {} records", start, end, records.len());
                records
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!("StoreUnavailable for window ({}, {}]: {}", start, end, e);
                Vec::new()
            }
        }
    }

    /// Progress estimate for `(start, end]`; zero on any store failure
    pub async fn count_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
        match self.bounded(self.store.count_in_range(start, end)).await {
            Ok(count) => count,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!("StoreUnavailable while counting ({}, {}]: {}", start, end, e);
                0
            }
        }
    }

    /// Number of store calls absorbed as failures
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    async fn bounded<T>(&self, call: impl std::future::Future<Output = StoreResult<T>>) -> StoreResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}
