//! Error taxonomy for playback commands, the store seam and the broadcaster.
//!
//! Only [`CommandError`] ever reaches a caller. Store and broadcast failures
//! are absorbed by the engine: logged, counted, and never fatal to a session.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Rejected session command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("invalid range: start {start} must be before end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("unknown speed key {key:?}")]
    UnknownSpeed { key: String },
    #[error("a playback session is already active")]
    SessionBusy,
    #[error("no playback session is running")]
    SessionNotRunning,
}

impl CommandError {
    /// Stable condition name reported to the routing layer
    pub fn condition(&self) -> &'static str {
        match self {
            CommandError::InvalidRange { .. } => "InvalidRange",
            CommandError::UnknownSpeed { .. } => "UnknownSpeed",
            CommandError::SessionBusy => "SessionBusy",
            CommandError::SessionNotRunning => "SessionNotRunning",
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Failure of a single store call
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store query exceeded {0:?}")]
    Timeout(Duration),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Delivery failure to one subscriber
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    #[error("subscriber {0} has disconnected")]
    SubscriberClosed(u64),
    #[error("subscriber {0} is not keeping up, event dropped")]
    SubscriberLagging(u64),
}

/// Invalid playback configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("speed table is empty")]
    EmptySpeedTable,
    #[error("speed {key:?} must advance a positive number of hours")]
    NonPositiveRate { key: String },
    #[error("speed {key:?} advances too far per tick")]
    ExcessiveRate { key: String },
    #[error("speed {key:?} must have a queue capacity of at least 1")]
    ZeroCapacity { key: String },
    #[error("speed {key:?} is listed more than once")]
    DuplicateSpeed { key: String },
    #[error("default speed {key:?} is not in the speed table")]
    MissingDefault { key: String },
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
}
