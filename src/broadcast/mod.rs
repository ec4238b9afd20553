pub mod hub;

pub use hub::{SubscriberHub, Subscription};

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{BatchPayload, EndOfStream};
use crate::error::BroadcastError;

/// Outcome of one fan-out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    /// Subscribers that accepted the event
    pub delivered: usize,
    /// Per-subscriber failures; never abort delivery to the others
    pub failures: Vec<BroadcastError>,
}

/// Sink that delivers playback output to every current subscriber
///
/// The consumer treats a broadcaster as write-only: it never inspects who
/// is subscribed. Publishing with no subscribers is a no-op.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Deliver one data batch with its statistics snapshot
    async fn publish(&self, payload: Arc<BatchPayload>) -> DeliveryReport;

    /// Announce the end of the session
    async fn publish_end_of_stream(&self, end: EndOfStream) -> DeliveryReport;
}
