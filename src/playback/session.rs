//! Shared state of one playback session.
//!
//! Single-writer contract:
//! - `state` and `speed` are written only by the session controller, with one
//!   exception: the producer moves `Running`/`Paused` to `Stopped` when the
//!   simulated clock reaches the end of the range. Every write is a
//!   compare-and-swap, so a command never half-applies against that move.
//! - `simulated_now` is written only by the producer.
//! - `records_delivered` is written only by the consumer.
//! - `cancelled` is set once, by the controller's stop, and never cleared.
//!
//! Everything else reads with acquire loads. The window bounds are fixed at
//! construction, and the simulated clock is kept as a nanosecond offset from
//! `window_start`, so it reads back exactly and never outside the window.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use chrono::{DateTime, TimeDelta, Utc};

use crate::playback::PlaybackState;

pub struct SessionHandle {
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    state: AtomicU8,
    speed: AtomicUsize,
    cancelled: AtomicBool,
    simulated_offset_ns: AtomicI64,
    total_records_estimate: AtomicU64,
    records_delivered: AtomicU64,
}

impl SessionHandle {
    /// New running session positioned at `window_start`
    pub fn new(window_start: DateTime<Utc>, window_end: DateTime<Utc>, speed_index: usize) -> Self {
        Self {
            window_start,
            window_end,
            state: AtomicU8::new(PlaybackState::Running.as_u8()),
            speed: AtomicUsize::new(speed_index),
            cancelled: AtomicBool::new(false),
            simulated_offset_ns: AtomicI64::new(0),
            total_records_estimate: AtomicU64::new(0),
            records_delivered: AtomicU64::new(0),
        }
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_end
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Atomically move to `to` if the current state is one of `from`.
    ///
    /// Returns the state observed before the attempt.
    pub(crate) fn transition(&self, from: &[PlaybackState], to: PlaybackState) -> Result<PlaybackState, PlaybackState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let observed = PlaybackState::from_u8(current);
            if !from.contains(&observed) {
                return Err(observed);
            }
            match self.state.compare_exchange(current, to.as_u8(), Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(observed),
                Err(actual) => current = actual,
            }
        }
    }

    /// Index into the configured speed table
    pub fn speed_index(&self) -> usize {
        self.speed.load(Ordering::Acquire)
    }

    pub(crate) fn set_speed_index(&self, index: usize) {
        self.speed.store(index, Ordering::Release);
    }

    /// True once a stop command has been issued
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Current simulated time, always within `[window_start, window_end]`
    pub fn simulated_now(&self) -> DateTime<Utc> {
        let offset = TimeDelta::nanoseconds(self.simulated_offset_ns.load(Ordering::Acquire));
        self
            .window_start
            .checked_add_signed(offset)
            .map_or(self.window_end, |now| now.min(self.window_end))
    }

    pub(crate) fn set_simulated_now(&self, now: DateTime<Utc>) {
        // Ranges longer than ~292 years saturate the offset; reads clamp to the end
        let offset = (now - self.window_start).num_nanoseconds().unwrap_or(i64::MAX).max(0);
        self.simulated_offset_ns.store(offset, Ordering::Release);
    }

    pub fn total_records_estimate(&self) -> u64 {
        self.total_records_estimate.load(Ordering::Acquire)
    }

    pub(crate) fn set_total_records_estimate(&self, estimate: u64) {
        self.total_records_estimate.store(estimate, Ordering::Release);
    }

    pub fn records_delivered(&self) -> u64 {
        self.records_delivered.load(Ordering::Acquire)
    }

    pub(crate) fn add_records_delivered(&self, count: u64) {
        self.records_delivered.fetch_add(count, Ordering::AcqRel);
    }
}
