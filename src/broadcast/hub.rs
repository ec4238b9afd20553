//! In-process broadcaster with one bounded queue per subscriber.
//!
//! Each subscriber gets a unique sequential id and its own queue. A full
//! queue drops the event for that subscriber only; a closed queue
//! unsubscribes it. Either way the other subscribers still receive it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::broadcast::{Broadcaster, DeliveryReport};
use crate::core::{BatchPayload, EndOfStream, PlaybackEvent};
use crate::error::BroadcastError;

/// How long the end notification may wait on a full subscriber queue
const END_OF_STREAM_GRACE: Duration = Duration::from_millis(500);

/// Receiving half handed to a subscriber
pub struct Subscription {
    pub id: u64,
    events: mpsc::Receiver<PlaybackEvent>,
}

impl Subscription {
    /// Next event, or `None` once the hub has dropped this subscriber
    pub async fn recv(&mut self) -> Option<PlaybackEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PlaybackEvent> {
        self.events.try_recv().ok()
    }
}

pub struct SubscriberHub {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<PlaybackEvent>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl SubscriberHub {
    /// Create a hub whose subscribers each buffer up to `buffer` events
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub async fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers.write().await.insert(id, tx);
        info!("Subscriber {} connected", id);
        Subscription { id, events: rx }
    }

    pub async fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.subscribers.write().await.remove(&id).is_some();
        if removed {
            info!("Subscriber {} disconnected", id);
        }
        removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    async fn fan_out(&self, event: PlaybackEvent, wait: Option<Duration>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            for (&id, sender) in subscribers.iter() {
                let result = match wait {
                    Some(grace) => match sender.send_timeout(event.clone(), grace).await {
                        Ok(()) => Ok(()),
                        Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(BroadcastError::SubscriberLagging(id)),
                        Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(BroadcastError::SubscriberClosed(id)),
                    },
                    None => match sender.try_send(event.clone()) {
                        Ok(()) => Ok(()),
                        Err(mpsc::error::TrySendError::Full(_)) => Err(BroadcastError::SubscriberLagging(id)),
                        Err(mpsc::error::TrySendError::Closed(_)) => Err(BroadcastError::SubscriberClosed(id)),
                    },
                };

                match result {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        if matches!(e, BroadcastError::SubscriberClosed(_)) {
                            closed.push(id);
                        }
                        report.failures.push(e);
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in closed {
                subscribers.remove(&id);
                debug!("Dropped closed subscriber {}", id);
            }
        }

        report
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Broadcaster for SubscriberHub {
    async fn publish(&self, payload: Arc<BatchPayload>) -> DeliveryReport {
        self.fan_out(PlaybackEvent::FireUpdate(payload), None).await
    }

    async fn publish_end_of_stream(&self, end: EndOfStream) -> DeliveryReport {
        self.fan_out(PlaybackEvent::PlaybackEnded(end), Some(END_OF_STREAM_GRACE)).await
    }
}
