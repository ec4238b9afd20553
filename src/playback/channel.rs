//! Bounded batch channel between producer and consumer.
//!
//! This is the only backpressure point in the engine. A full channel parks
//! the producer, which slows the simulated clock to the pace of delivery
//! rather than dropping windows. Both ends wait in slices of `poll` so a
//! stop is noticed within one slice.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::core::Batch;
use crate::playback::SessionHandle;

/// Create a channel holding at most `capacity` batches
pub fn batch_channel(capacity: usize, poll: Duration) -> (BatchSender, BatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BatchSender { tx, poll }, BatchReceiver { rx, poll })
}

/// Why an enqueue did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The session was stopped while waiting for room
    Cancelled,
    /// The consumer is gone
    Closed,
}

pub struct BatchSender {
    tx: mpsc::Sender<Batch>,
    poll: Duration,
}

impl BatchSender {
    /// Enqueue `batch`, waiting while the channel is full.
    ///
    /// The wait is abandoned once `session` is cancelled; the batch is then
    /// dropped, never delivered.
    pub async fn send(&self, batch: Batch, session: &SessionHandle) -> Result<(), SendError> {
        loop {
            if session.is_cancelled() {
                return Err(SendError::Cancelled);
            }

            match tokio::time::timeout(self.poll, self.tx.reserve()).await {
                Ok(Ok(permit)) => {
                    // Re-check: a stop may have landed while we were parked
                    if session.is_cancelled() {
                        return Err(SendError::Cancelled);
                    }
                    permit.send(batch);
                    return Ok(());
                }
                Ok(Err(_)) => return Err(SendError::Closed),
                Err(_) => debug!("Batch channel full, producer waiting"),
            }
        }
    }
}

/// Result of one bounded receive
#[derive(Debug)]
pub enum RecvOutcome {
    Batch(Batch),
    /// Nothing arrived within the poll period
    TimedOut,
    /// Producer dropped its sender and the channel is drained
    Closed,
}

pub struct BatchReceiver {
    rx: mpsc::Receiver<Batch>,
    poll: Duration,
}

impl BatchReceiver {
    /// Wait up to one poll period for the next batch
    pub async fn recv_timeout(&mut self) -> RecvOutcome {
        match tokio::time::timeout(self.poll, self.rx.recv()).await {
            Ok(Some(batch)) => RecvOutcome::Batch(batch),
            Ok(None) => RecvOutcome::Closed,
            Err(_) => RecvOutcome::TimedOut,
        }
    }

    /// Close the channel and drop everything still buffered.
    ///
    /// Returns the number of batches discarded.
    pub fn discard_buffered(&mut self) -> usize {
        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}
