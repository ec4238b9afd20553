pub mod channel;
pub mod consumer;
pub mod controller;
pub mod producer;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{batch_channel, BatchReceiver, BatchSender, RecvOutcome};
pub use consumer::Consumer;
pub use controller::{CommandAck, SessionController, SessionStatus};
pub use producer::{Producer, TickOutcome};
pub use session::SessionHandle;

use serde::{Deserialize, Serialize};

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl PlaybackState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            PlaybackState::Idle => 0,
            PlaybackState::Running => 1,
            PlaybackState::Paused => 2,
            PlaybackState::Stopped => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Running,
            2 => PlaybackState::Paused,
            3 => PlaybackState::Stopped,
            _ => PlaybackState::Idle,
        }
    }

    /// Running or paused: a session occupies the engine
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackState::Running | PlaybackState::Paused)
    }
}
