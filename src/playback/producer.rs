//! Producer: drives the simulated clock through the requested range.
//!
//! Each tick covers the window `(simulated_now, min(simulated_now + advance, end)]`.
//! Windows are contiguous: the next window starts exactly where the last one
//! ended, so pausing or changing speed can never skip or repeat an interval.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::PlaybackConfig;
use crate::core::Batch;
use crate::playback::channel::{BatchSender, SendError};
use crate::playback::{PlaybackState, SessionHandle};
use crate::store::StoreQueryAdapter;

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Session paused; no window queried
    Skipped,
    /// One window queried and enqueued
    Advanced {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        records: usize,
    },
    /// Final window enqueued, followed by end of stream
    Completed {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        records: usize,
    },
    /// Stopped or consumer gone; the producer must exit
    Halted,
}

pub struct Producer {
    session: Arc<SessionHandle>,
    config: Arc<PlaybackConfig>,
    store: StoreQueryAdapter,
    tx: BatchSender,
    simulated_now: DateTime<Utc>,
}

impl Producer {
    pub fn new(session: Arc<SessionHandle>, config: Arc<PlaybackConfig>, store: StoreQueryAdapter, tx: BatchSender) -> Self {
        let simulated_now = session.window_start();
        Self {
            session,
            config,
            store,
            tx,
            simulated_now,
        }
    }

    pub fn simulated_now(&self) -> DateTime<Utc> {
        self.simulated_now
    }

    /// Main loop: estimate the record count, then tick on a fixed period
    /// until the range is exhausted or the session is stopped.
    pub async fn run(mut self) {
        let start = self.session.window_start();
        let end = self.session.window_end();

        let estimate = self.store.count_in_range(start, end).await;
        self.session.set_total_records_estimate(estimate);
        info!("Producer started: ({}, {}], ~{} records", start, end, estimate);

        let period = self.config.tick_period();
        let mut ticker = interval_at(Instant::now() + period, period);
        // A backpressure stall must not turn into a burst of catch-up ticks
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Wake at least once per poll period so a stop is seen promptly
            // even with a long tick period
            let recv_timeout = self.config.recv_timeout();
            if tokio::time::timeout(recv_timeout, ticker.tick()).await.is_err() {
                if self.should_exit() {
                    break;
                }
                continue;
            }

            match self.tick().await {
                TickOutcome::Completed { .. } | TickOutcome::Halted => break,
                TickOutcome::Skipped | TickOutcome::Advanced { .. } => {}
            }
        }

        info!(
            "Producer finished at simulated time {} ({} store failures)",
            self.simulated_now,
            self.store.failures()
        );
    }

    fn should_exit(&self) -> bool {
        self.session.is_cancelled() || !self.session.state().is_active()
    }

    /// Execute one tick.
    ///
    /// Reads the speed once at the top, so a speed change lands on the next
    /// tick and never alters a window already in flight.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.session.is_cancelled() {
            return TickOutcome::Halted;
        }

        match self.session.state() {
            PlaybackState::Running => {}
            PlaybackState::Paused => return TickOutcome::Skipped,
            PlaybackState::Idle | PlaybackState::Stopped => return TickOutcome::Halted,
        }

        let end = self.session.window_end();
        let Some(profile) = self.config.speeds.get(self.session.speed_index()) else {
            // The controller only stores validated indices
            warn!("Speed index {} outside speed table", self.session.speed_index());
            return TickOutcome::Halted;
        };

        let from = self.simulated_now;
        // Clamp on overflow as well; a window never reaches past the range end
        let to = from
            .checked_add_signed(profile.advance())
            .map_or(end, |t| t.min(end));

        let mut records = self.store.query_interval(from, to).await;
        for record in &mut records {
            record.fade_duration_ms = profile.fade_ms;
        }
        let count = records.len();

        let batch = Batch::Data {
            records,
            simulated_timestamp: to,
            speed: profile.key.clone(),
        };

        if let Err(e) = self.tx.send(batch, &self.session).await {
            debug!("Producer halting before enqueue of ({}, {}]: {:?}", from, to, e);
            return TickOutcome::Halted;
        }

        self.simulated_now = to;
        self.session.set_simulated_now(to);
        debug!("Tick ({}, {}] at {}: {} records", from, to, profile.key, count);

        if to < end {
            return TickOutcome::Advanced { from, to, records: count };
        }

        // Natural completion; a concurrent stop may already have won
        let completed = self
            .session
            .transition(&[PlaybackState::Running, PlaybackState::Paused], PlaybackState::Stopped);
        if completed.is_err() {
            return TickOutcome::Halted;
        }

        match self.tx.send(Batch::EndOfStream { simulated_timestamp: to }, &self.session).await {
            Ok(()) => info!("Reached end of range at {}", to),
            Err(SendError::Cancelled) | Err(SendError::Closed) => {
                debug!("End of stream not enqueued, session already torn down")
            }
        }

        TickOutcome::Completed { from, to, records: count }
    }
}
