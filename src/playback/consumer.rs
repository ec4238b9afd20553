use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::core::{Batch, BatchPayload, EndOfStream, EndReason, EventRecord, FireStatistics};
use crate::playback::channel::{BatchReceiver, RecvOutcome};
use crate::playback::SessionHandle;

/// Drains the batch channel and fans each batch out to the broadcaster.
///
/// Batches are delivered strictly in the order they were enqueued. The
/// statistics belong to the consumer alone; the session handle only gets a
/// copy of the delivered count for progress reporting.
pub struct Consumer {
    session: Arc<SessionHandle>,
    rx: BatchReceiver,
    broadcaster: Arc<dyn Broadcaster>,
    stats: FireStatistics,
}

impl Consumer {
    pub fn new(session: Arc<SessionHandle>, rx: BatchReceiver, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            session,
            rx,
            broadcaster,
            stats: FireStatistics::default(),
        }
    }

    /// Run until end of stream or stop; returns the final statistics
    pub async fn run(mut self) -> FireStatistics {
        info!("Consumer started");

        let reason = loop {
            if self.session.is_cancelled() {
                let discarded = self.rx.discard_buffered();
                if discarded > 0 {
                    info!("Discarded {} buffered batches on stop", discarded);
                }
                break EndReason::Stopped;
            }

            match self.rx.recv_timeout().await {
                RecvOutcome::Batch(Batch::Data { records, simulated_timestamp, speed }) => {
                    // Stop landed while we were waiting; the loop head discards
                    if self.session.is_cancelled() {
                        continue;
                    }
                    self.deliver(records, simulated_timestamp, speed).await;
                }
                RecvOutcome::Batch(Batch::EndOfStream { simulated_timestamp }) => {
                    info!("Received end of stream at {}", simulated_timestamp);
                    break EndReason::Completed;
                }
                RecvOutcome::TimedOut => continue,
                RecvOutcome::Closed => {
                    if !self.session.is_cancelled() {
                        warn!("Producer exited without end of stream");
                    }
                    break EndReason::Stopped;
                }
            }
        };

        let end = EndOfStream {
            reason,
            statistics: self.stats.clone(),
        };
        let report = self.broadcaster.publish_end_of_stream(end).await;
        for failure in &report.failures {
            warn!("BroadcastFailure on end of stream: {}", failure);
        }

        info!("Consumer finished: {} records delivered ({:?})", self.stats.total_fires, reason);
        self.stats
    }

    async fn deliver(&mut self, records: Vec<EventRecord>, simulated_timestamp: DateTime<Utc>, speed: String) {
        let count = records.len();
        self.stats.record_batch(count, simulated_timestamp);
        self.session.add_records_delivered(count as u64);

        let payload = Arc::new(BatchPayload {
            fires: records,
            timestamp: simulated_timestamp,
            speed,
            statistics: self.stats.clone(),
        });

        let report = self.broadcaster.publish(payload).await;
        for failure in &report.failures {
            warn!("BroadcastFailure: {}", failure);
        }
        debug!("Delivered {} records to {} subscribers", count, report.delivered);
    }
}
