use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::EventRecord;

/// Discriminant of a [`Batch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    DataBatch,
    EndOfStream,
}

/// One delivery unit passed from the producer to the consumer
#[derive(Debug, Clone)]
pub enum Batch {
    /// Records of one tick window, ascending by timestamp
    Data {
        records: Vec<EventRecord>,
        /// Upper bound of the window this batch covers
        simulated_timestamp: DateTime<Utc>,
        speed: String,
    },
    /// Natural end of the requested range; carries no records
    EndOfStream {
        simulated_timestamp: DateTime<Utc>,
    },
}

impl Batch {
    pub fn kind(&self) -> BatchKind {
        match self {
            Batch::Data { .. } => BatchKind::DataBatch,
            Batch::EndOfStream { .. } => BatchKind::EndOfStream,
        }
    }

    pub fn simulated_timestamp(&self) -> DateTime<Utc> {
        match self {
            Batch::Data { simulated_timestamp, .. } => *simulated_timestamp,
            Batch::EndOfStream { simulated_timestamp } => *simulated_timestamp,
        }
    }
}

/// Running statistics kept by the consumer for the current session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FireStatistics {
    /// Cumulative records delivered this session
    pub total_fires: u64,
    /// Size of the most recent batch
    pub active_count: usize,
    /// Simulated timestamp of the most recent batch
    pub current_time: Option<DateTime<Utc>>,
}

impl FireStatistics {
    /// Fold one delivered batch into the statistics
    pub fn record_batch(&mut self, batch_len: usize, simulated_timestamp: DateTime<Utc>) {
        self.total_fires += batch_len as u64;
        self.active_count = batch_len;
        self.current_time = Some(simulated_timestamp);
    }
}

/// Payload handed to the broadcaster for each data batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPayload {
    pub fires: Vec<EventRecord>,
    pub timestamp: DateTime<Utc>,
    pub speed: String,
    pub statistics: FireStatistics,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The simulated clock reached the end of the range
    Completed,
    /// An explicit stop command
    Stopped,
}

/// Final notification of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndOfStream {
    pub reason: EndReason,
    pub statistics: FireStatistics,
}

/// Event as seen by a subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlaybackEvent {
    FireUpdate(Arc<BatchPayload>),
    PlaybackEnded(EndOfStream),
}
