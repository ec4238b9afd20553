//! Session controller: the command surface exposed to the routing layer.
//!
//! Commands are serialized through one async mutex, so each transition is
//! atomic with respect to concurrent commands. The controller is the only
//! external writer of session state. On start it spawns the consumer before
//! the producer. On stop it halts the producer first, then the consumer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broadcast::Broadcaster;
use crate::config::PlaybackConfig;
use crate::core::FireStatistics;
use crate::error::{CommandError, CommandResult};
use crate::playback::channel::batch_channel;
use crate::playback::{Consumer, PlaybackState, Producer, SessionHandle};
use crate::store::{EventStore, StoreQueryAdapter};

/// Successful command acknowledgment, named after the client-facing events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CommandAck {
    PlaybackStarted {
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        speed: String,
    },
    PlaybackPaused,
    PlaybackResumed,
    PlaybackStopped {
        statistics: FireStatistics,
    },
    SpeedChanged {
        speed: String,
    },
}

/// Snapshot of the current (or last) session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: PlaybackState,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub simulated_now: Option<DateTime<Utc>>,
    pub speed: Option<String>,
    pub total_records_estimate: u64,
    pub records_delivered: u64,
}

/// Tasks of the session occupying the engine
struct SessionTasks {
    producer: JoinHandle<()>,
    consumer: JoinHandle<FireStatistics>,
}

impl SessionTasks {
    fn is_finished(&self) -> bool {
        self.producer.is_finished() && self.consumer.is_finished()
    }

    /// Wait for both tasks, producer first; returns the consumer's statistics
    async fn join(self) -> FireStatistics {
        if let Err(e) = self.producer.await {
            warn!("Producer task failed: {}", e);
        }
        match self.consumer.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Consumer task failed: {}", e);
                FireStatistics::default()
            }
        }
    }
}

/// Current (or last) session; the handle outlives the tasks for status queries
#[derive(Default)]
struct Slot {
    handle: Option<Arc<SessionHandle>>,
    tasks: Option<SessionTasks>,
}

impl Slot {
    fn active_handle(&self) -> Option<&Arc<SessionHandle>> {
        self.handle.as_ref().filter(|h| h.state().is_active())
    }

    /// Close out a session whose tasks exited without reaching a final state
    fn settle(&self) {
        let exited = self.tasks.as_ref().is_some_and(|t| t.is_finished());
        let Some(handle) = self.handle.as_ref().filter(|_| exited) else {
            return;
        };
        if handle
            .transition(&[PlaybackState::Running, PlaybackState::Paused], PlaybackState::Stopped)
            .is_ok()
        {
            warn!("Session tasks exited early at {}, marking stopped", handle.simulated_now());
        }
    }
}

pub struct SessionController {
    config: Arc<PlaybackConfig>,
    store: Arc<dyn EventStore>,
    broadcaster: Arc<dyn Broadcaster>,
    slot: Mutex<Slot>,
}

impl SessionController {
    pub fn new(config: PlaybackConfig, store: Arc<dyn EventStore>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            broadcaster,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Begin replaying `(start, end]` at `speed` (or the default speed)
    pub async fn start(&self, start: DateTime<Utc>, end: DateTime<Utc>, speed: Option<&str>) -> CommandResult<CommandAck> {
        let mut slot = self.slot.lock().await;
        slot.settle();

        if slot.active_handle().is_some() {
            return Err(CommandError::SessionBusy);
        }

        if start >= end {
            return Err(CommandError::InvalidRange { start, end });
        }

        let key = speed.unwrap_or(self.config.default_speed.as_str());
        let speed_index = self
            .config
            .speed_index(key)
            .ok_or_else(|| CommandError::UnknownSpeed { key: key.to_string() })?;
        let profile = &self.config.speeds[speed_index];

        // Reap a session that reached the end of its range on its own
        if let Some(previous) = slot.tasks.take() {
            previous.join().await;
        }

        let handle = Arc::new(SessionHandle::new(start, end, speed_index));
        let (tx, rx) = batch_channel(profile.queue_capacity, self.config.recv_timeout());

        let consumer = Consumer::new(handle.clone(), rx, self.broadcaster.clone());
        let consumer = tokio::spawn(consumer.run());

        let adapter = StoreQueryAdapter::new(self.store.clone(), self.config.query_timeout());
        let producer = Producer::new(handle.clone(), self.config.clone(), adapter, tx);
        let producer = tokio::spawn(producer.run());

        info!("Playback started: {} to {} at {} (queue {})", start, end, profile.key, profile.queue_capacity);

        slot.handle = Some(handle);
        slot.tasks = Some(SessionTasks { producer, consumer });

        Ok(CommandAck::PlaybackStarted {
            start_date: start,
            end_date: end,
            speed: profile.key.clone(),
        })
    }

    pub async fn pause(&self) -> CommandResult<CommandAck> {
        let slot = self.slot.lock().await;
        slot.settle();
        let handle = slot.handle.as_ref().ok_or(CommandError::SessionNotRunning)?;

        handle
            .transition(&[PlaybackState::Running], PlaybackState::Paused)
            .map_err(|_| CommandError::SessionNotRunning)?;

        info!("Playback paused at {}", handle.simulated_now());
        Ok(CommandAck::PlaybackPaused)
    }

    pub async fn resume(&self) -> CommandResult<CommandAck> {
        let slot = self.slot.lock().await;
        slot.settle();
        let handle = slot.handle.as_ref().ok_or(CommandError::SessionNotRunning)?;

        handle
            .transition(&[PlaybackState::Paused], PlaybackState::Running)
            .map_err(|_| CommandError::SessionNotRunning)?;

        info!("Playback resumed at {}", handle.simulated_now());
        Ok(CommandAck::PlaybackResumed)
    }

    /// Stop the active session.
    ///
    /// Returns only after both tasks have exited, so no data batch reaches
    /// the broadcaster after the acknowledgment.
    pub async fn stop(&self) -> CommandResult<CommandAck> {
        let mut slot = self.slot.lock().await;
        slot.settle();

        let handle = slot.active_handle().cloned().ok_or(CommandError::SessionNotRunning)?;
        handle.cancel();
        // The producer may complete the range concurrently; either way the session is over
        let _ = handle.transition(&[PlaybackState::Running, PlaybackState::Paused], PlaybackState::Stopped);

        let statistics = match slot.tasks.take() {
            Some(tasks) => tasks.join().await,
            None => FireStatistics::default(),
        };

        info!("Playback stopped at {} after {} records", handle.simulated_now(), statistics.total_fires);
        Ok(CommandAck::PlaybackStopped { statistics })
    }

    /// Change speed; takes effect from the next tick
    pub async fn change_speed(&self, key: &str) -> CommandResult<CommandAck> {
        let slot = self.slot.lock().await;
        slot.settle();
        let handle = slot.active_handle().ok_or(CommandError::SessionNotRunning)?;

        let index = self
            .config
            .speed_index(key)
            .ok_or_else(|| CommandError::UnknownSpeed { key: key.to_string() })?;
        handle.set_speed_index(index);

        info!("Speed changed to {}", key);
        Ok(CommandAck::SpeedChanged { speed: key.to_string() })
    }

    pub async fn status(&self) -> SessionStatus {
        let slot = self.slot.lock().await;
        slot.settle();
        match slot.handle.as_ref() {
            Some(handle) => SessionStatus {
                state: handle.state(),
                window_start: Some(handle.window_start()),
                window_end: Some(handle.window_end()),
                simulated_now: Some(handle.simulated_now()),
                speed: self.config.speeds.get(handle.speed_index()).map(|s| s.key.clone()),
                total_records_estimate: handle.total_records_estimate(),
                records_delivered: handle.records_delivered(),
            },
            None => SessionStatus {
                state: PlaybackState::Idle,
                window_start: None,
                window_end: None,
                simulated_now: None,
                speed: None,
                total_records_estimate: 0,
                records_delivered: 0,
            },
        }
    }

    /// Wait for a session that is running to its natural end and reap it.
    ///
    /// Returns `None` when there is nothing left to wait for.
    pub async fn wait_finished(&self) -> Option<FireStatistics> {
        loop {
            {
                let mut slot = self.slot.lock().await;
                match slot.tasks.as_ref() {
                    None => return None,
                    Some(tasks) if tasks.is_finished() => {
                        slot.settle();
                        let tasks = slot.tasks.take()?;
                        return Some(tasks.join().await);
                    }
                    Some(_) => {}
                }
            }
            tokio::time::sleep(self.config.recv_timeout()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EndReason;
    use crate::playback::testing::{at, hourly_records, test_config, RecordingBroadcaster, RecordingStore};
    use std::time::Duration;

    struct Rig {
        controller: SessionController,
        store: Arc<RecordingStore>,
        broadcaster: Arc<RecordingBroadcaster>,
    }

    fn rig_with(broadcaster: RecordingBroadcaster) -> Rig {
        let store = Arc::new(RecordingStore::new(hourly_records(0, 24)));
        let broadcaster = Arc::new(broadcaster);
        let controller = SessionController::new(test_config(), store.clone(), broadcaster.clone());
        Rig { controller, store, broadcaster }
    }

    fn rig() -> Rig {
        rig_with(RecordingBroadcaster::default())
    }

    fn assert_contiguous(windows: &[(DateTime<Utc>, DateTime<Utc>)], start: DateTime<Utc>, end: DateTime<Utc>) {
        assert_eq!(windows.first().map(|w| w.0), Some(start));
        assert_eq!(windows.last().map(|w| w.1), Some(end));
        for pair in windows.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        for w in windows {
            assert!(w.0 < w.1);
        }
    }

    #[tokio::test]
    async fn test_start_rejects_bad_arguments() {
        let rig = rig();

        assert_eq!(
            rig.controller.start(at(3), at(3), None).await,
            Err(CommandError::InvalidRange { start: at(3), end: at(3) })
        );
        assert_eq!(
            rig.controller.start(at(0), at(3), Some("warp")).await,
            Err(CommandError::UnknownSpeed { key: "warp".into() })
        );
        assert_eq!(rig.controller.status().await.state, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_commands_without_session() {
        let rig = rig();

        assert_eq!(rig.controller.pause().await, Err(CommandError::SessionNotRunning));
        assert_eq!(rig.controller.resume().await, Err(CommandError::SessionNotRunning));
        assert_eq!(rig.controller.stop().await, Err(CommandError::SessionNotRunning));
        assert_eq!(rig.controller.change_speed("fast").await, Err(CommandError::SessionNotRunning));
    }

    #[tokio::test]
    async fn test_single_active_session() {
        let rig = rig();

        let ack = rig.controller.start(at(0), at(23), Some("slowest")).await.unwrap();
        assert_eq!(ack, CommandAck::PlaybackStarted { start_date: at(0), end_date: at(23), speed: "slowest".into() });
        assert_eq!(rig.controller.start(at(0), at(1), None).await, Err(CommandError::SessionBusy));

        assert_eq!(rig.controller.resume().await, Err(CommandError::SessionNotRunning));
        assert_eq!(rig.controller.pause().await, Ok(CommandAck::PlaybackPaused));
        assert_eq!(rig.controller.pause().await, Err(CommandError::SessionNotRunning));
        assert_eq!(rig.controller.start(at(0), at(1), None).await, Err(CommandError::SessionBusy));

        assert_eq!(
            rig.controller.change_speed("warp").await,
            Err(CommandError::UnknownSpeed { key: "warp".into() })
        );
        assert_eq!(rig.controller.status().await.state, PlaybackState::Paused);
        assert_eq!(rig.controller.status().await.speed.as_deref(), Some("slowest"));

        assert!(matches!(rig.controller.stop().await, Ok(CommandAck::PlaybackStopped { .. })));
        assert_eq!(rig.controller.stop().await, Err(CommandError::SessionNotRunning));
        assert!(rig.controller.start(at(0), at(1), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_full_session_delivers_every_record_once() {
        let rig = rig();

        rig.controller.start(at(0), at(6), Some("fast")).await.unwrap();
        let stats = rig.controller.wait_finished().await.unwrap();

        assert_eq!(stats.total_fires, 6);
        let status = rig.controller.status().await;
        assert_eq!(status.state, PlaybackState::Stopped);
        assert_eq!(status.simulated_now, Some(at(6)));
        assert_eq!(status.total_records_estimate, 6);
        assert_eq!(status.records_delivered, 6);

        assert_eq!(rig.store.windows(), vec![(at(0), at(2)), (at(2), at(4)), (at(4), at(6))]);

        let payloads = rig.broadcaster.payloads();
        let times: Vec<_> = payloads.iter().map(|p| p.timestamp).collect();
        assert_eq!(times, vec![at(2), at(4), at(6)]);
        let ids: Vec<i64> = payloads.iter().flat_map(|p| p.fires.iter().map(|r| r.id)).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);

        let endings = rig.broadcaster.endings();
        assert_eq!(endings.len(), 1);
        assert_eq!(endings[0].reason, EndReason::Completed);

        // Already over: nothing to stop, and a new session may start
        assert_eq!(rig.controller.stop().await, Err(CommandError::SessionNotRunning));
        assert!(rig.controller.start(at(6), at(8), None).await.is_ok());
        assert_eq!(rig.controller.wait_finished().await.unwrap().total_fires, 2);
    }

    #[tokio::test]
    async fn test_total_is_independent_of_speed() {
        let mut totals = Vec::new();
        for speed in ["slowest", "slow", "fast", "fastest"] {
            let rig = rig();
            rig.controller.start(at(0), at(10), Some(speed)).await.unwrap();
            let stats = rig.controller.wait_finished().await.unwrap();
            let delivered: usize = rig.broadcaster.payloads().iter().map(|p| p.fires.len()).sum();
            assert_eq!(stats.total_fires, delivered as u64);
            assert_contiguous(&rig.store.windows(), at(0), at(10));
            totals.push(stats.total_fires);
        }
        assert_eq!(totals, vec![10, 10, 10, 10]);
    }

    #[tokio::test]
    async fn test_pause_freezes_clock_without_losing_windows() {
        let rig = rig();

        rig.controller.start(at(0), at(12), Some("slowest")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        rig.controller.pause().await.unwrap();

        // Let an in-flight tick settle, then the clock must hold still
        tokio::time::sleep(Duration::from_millis(30)).await;
        let frozen = rig.controller.status().await.simulated_now;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(rig.controller.status().await.simulated_now, frozen);
        assert!(frozen < Some(at(12)));

        rig.controller.resume().await.unwrap();
        let stats = rig.controller.wait_finished().await.unwrap();

        assert_eq!(stats.total_fires, 12);
        let expected: Vec<_> = (0..24)
            .map(|i| (at(0) + chrono::TimeDelta::minutes(30 * i), at(0) + chrono::TimeDelta::minutes(30 * (i + 1))))
            .collect();
        assert_eq!(rig.store.windows(), expected);
    }

    #[tokio::test]
    async fn test_change_speed_mid_session() {
        let rig = rig();

        rig.controller.start(at(0), at(23), Some("slowest")).await.unwrap();
        while rig.controller.status().await.simulated_now == Some(at(0)) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(
            rig.controller.change_speed("fastest").await,
            Ok(CommandAck::SpeedChanged { speed: "fastest".into() })
        );
        assert_eq!(rig.controller.status().await.speed.as_deref(), Some("fastest"));

        let stats = rig.controller.wait_finished().await.unwrap();
        assert_eq!(stats.total_fires, 23);

        let windows = rig.store.windows();
        assert_contiguous(&windows, at(0), at(23));
        assert!(windows.iter().any(|w| w.1 - w.0 == chrono::TimeDelta::minutes(30)));
        assert!(windows.iter().any(|w| w.1 - w.0 == chrono::TimeDelta::hours(6)));

        // Speed labels on payloads switch once and never switch back
        let speeds: Vec<String> = rig.broadcaster.payloads().iter().map(|p| p.speed.clone()).collect();
        let switch = speeds.iter().position(|s| s == "fastest").unwrap();
        assert!(speeds[..switch].iter().all(|s| s == "slowest"));
        assert!(speeds[switch..].iter().all(|s| s == "fastest"));
    }

    #[tokio::test]
    async fn test_unavailable_window_does_not_end_session() {
        let store = Arc::new(RecordingStore::failing_at(hourly_records(0, 24), vec![at(2), at(3)]));
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let controller = SessionController::new(test_config(), store.clone(), broadcaster.clone());

        controller.start(at(0), at(6), Some("slow")).await.unwrap();
        let stats = controller.wait_finished().await.unwrap();

        // Records in (2, 4] are lost with their windows; everything else arrives
        assert_eq!(stats.total_fires, 4);
        let expected: Vec<_> = (0..6).map(|h| (at(h), at(h + 1))).collect();
        assert_eq!(store.windows(), expected);

        let times: Vec<_> = broadcaster.payloads().iter().map(|p| p.timestamp).collect();
        assert_eq!(times, (1..=6).map(at).collect::<Vec<_>>());

        let endings = broadcaster.endings();
        assert_eq!(endings.len(), 1);
        assert_eq!(endings[0].reason, EndReason::Completed);
        assert_eq!(controller.status().await.state, PlaybackState::Stopped);
    }

    struct PanickingStore;

    #[async_trait::async_trait]
    impl EventStore for PanickingStore {
        async fn count_in_range(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> crate::error::StoreResult<u64> {
            Ok(0)
        }

        async fn query_interval(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> crate::error::StoreResult<Vec<crate::core::EventRecord>> {
            panic!("store driver bug");
        }
    }

    #[tokio::test]
    async fn test_crashed_producer_frees_the_engine() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let controller = SessionController::new(test_config(), Arc::new(PanickingStore), broadcaster.clone());

        controller.start(at(0), at(6), None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while broadcaster.endings().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // Consumer has ended; give its task a moment to be reported finished
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.status().await.state, PlaybackState::Stopped);
        assert_eq!(controller.stop().await, Err(CommandError::SessionNotRunning));
        assert_eq!(broadcaster.endings()[0].reason, EndReason::Stopped);

        assert!(controller.start(at(0), at(6), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_discards_buffered_and_silences_data() {
        // Slow delivery fills the channel behind the consumer
        let rig = rig_with(RecordingBroadcaster::with_delay(Duration::from_millis(25)));

        rig.controller.start(at(0), at(23), Some("slowest")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let ack = rig.controller.stop().await.unwrap();
        let delivered_at_ack = rig.broadcaster.payloads().len();

        let statistics = match ack {
            CommandAck::PlaybackStopped { statistics } => statistics,
            other => panic!("unexpected ack: {:?}", other),
        };
        assert_eq!(statistics.current_time.is_some(), delivered_at_ack > 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rig.broadcaster.payloads().len(), delivered_at_ack);

        let endings = rig.broadcaster.endings();
        assert_eq!(endings.len(), 1);
        assert_eq!(endings[0].reason, EndReason::Stopped);

        // Far fewer windows delivered than queried: the backlog was dropped
        assert!(delivered_at_ack < rig.store.windows().len());
        assert!(delivered_at_ack < 46);

        let status = rig.controller.status().await;
        assert_eq!(status.state, PlaybackState::Stopped);
        assert!(status.simulated_now < Some(at(23)));
    }
}
