//! Focus Tracker.
//!
//! One tracker per connected viewer. Each accepted transition goes to two
//! independent sinks: the room's bus (best effort, for the presenter's live
//! view) and the durable log (retried, authoritative for the report). Each
//! sink has its own worker task and queue, so a slow or failing sink never
//! delays the other and `observe` never blocks.
//!
//! The live view may briefly disagree with the log; the report only ever
//! reads the log.

use crate::bus::{BusMessage, DataPublisher};
use crate::observability::metrics;
use crate::store::{append_focus_with_retry, ActivityLog, FocusEvent, RetryPolicy};

use chrono::{DateTime, Utc};
use common::types::{FocusKind, RoomCode};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Sink workers of a tracker. They exit once the tracker is dropped and
/// their queues are drained.
#[derive(Debug)]
pub struct FocusWorkers {
    pub bus: JoinHandle<()>,
    pub log: JoinHandle<()>,
}

/// Per-viewer attention transition detector.
#[derive(Debug)]
pub struct FocusTracker {
    participant: String,
    last: Option<FocusKind>,
    bus_queue: mpsc::UnboundedSender<FocusEvent>,
    log_queue: mpsc::UnboundedSender<FocusEvent>,
}

impl FocusTracker {
    /// Start a tracker for `participant` in room `code`. Both workers run on
    /// `appends`, so whoever waits on it also waits for queued log rows.
    pub fn spawn(
        code: RoomCode,
        participant: String,
        publisher: Arc<dyn DataPublisher>,
        log: Arc<dyn ActivityLog>,
        retry: RetryPolicy,
        appends: &TaskTracker,
    ) -> (Self, FocusWorkers) {
        let (bus_queue, bus_rx) = mpsc::unbounded_channel();
        let (log_queue, log_rx) = mpsc::unbounded_channel();

        let workers = FocusWorkers {
            bus: appends.spawn(run_bus_sink(code.clone(), publisher, bus_rx)),
            log: appends.spawn(run_log_sink(code, log, retry, log_rx)),
        };

        (
            Self {
                participant,
                last: None,
                bus_queue,
                log_queue,
            },
            workers,
        )
    }

    #[must_use]
    pub fn participant(&self) -> &str {
        &self.participant
    }

    /// Record a transition observed now.
    pub fn observe(&mut self, kind: FocusKind) -> bool {
        self.observe_at(kind, Utc::now())
    }

    /// Record a transition. Returns `false` for a repeat of the previous
    /// kind, which is suppressed.
    pub fn observe_at(&mut self, kind: FocusKind, timestamp: DateTime<Utc>) -> bool {
        if self.last == Some(kind) {
            metrics::record_focus_event(kind.as_str(), "suppressed");
            debug!(
                target: "cc.focus",
                participant = %self.participant,
                kind = kind.as_str(),
                "Suppressed duplicate focus transition"
            );
            return false;
        }
        self.last = Some(kind);
        metrics::record_focus_event(kind.as_str(), "accepted");

        let event = FocusEvent {
            participant: self.participant.clone(),
            kind,
            timestamp,
        };

        // Workers only stop after the tracker is gone.
        let _ = self.bus_queue.send(event.clone());
        let _ = self.log_queue.send(event);
        true
    }
}

async fn run_bus_sink(
    code: RoomCode,
    publisher: Arc<dyn DataPublisher>,
    mut events: mpsc::UnboundedReceiver<FocusEvent>,
) {
    while let Some(event) = events.recv().await {
        let timestamp = Some(event.timestamp.timestamp_millis());
        let message = match event.kind {
            FocusKind::Lost => BusMessage::FocusLost {
                user: event.participant,
                timestamp,
            },
            FocusKind::Gained => BusMessage::FocusGained {
                user: event.participant,
                timestamp,
            },
        };

        if let Err(e) = publisher.publish(&message).await {
            warn!(
                target: "cc.focus",
                room = %code,
                kind = message.kind(),
                error = %e,
                "Focus publish failed"
            );
        }
    }
}

async fn run_log_sink(
    code: RoomCode,
    log: Arc<dyn ActivityLog>,
    retry: RetryPolicy,
    mut events: mpsc::UnboundedReceiver<FocusEvent>,
) {
    while let Some(event) = events.recv().await {
        if let Err(e) = append_focus_with_retry(&log, retry, &code, &event).await {
            warn!(
                target: "cc.focus",
                room = %code,
                participant = %event.participant,
                kind = event.kind.as_str(),
                error = %e,
                "Dropping focus event after retries"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::bus::mock::RecordingPublisher;
    use crate::store::InMemoryActivityLog;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn code() -> RoomCode {
        "K3ZQ9A".parse().unwrap()
    }

    #[tokio::test]
    async fn test_transitions_reach_both_sinks_in_order() {
        let publisher = Arc::new(RecordingPublisher::new());
        let log = Arc::new(InMemoryActivityLog::new());
        let (mut tracker, workers) = FocusTracker::spawn(
            code(),
            "Priya".to_string(),
            publisher.clone(),
            log.clone(),
            RetryPolicy::default(),
            &TaskTracker::new(),
        );

        assert!(tracker.observe_at(FocusKind::Lost, at(1)));
        assert!(tracker.observe_at(FocusKind::Gained, at(2)));
        assert!(tracker.observe_at(FocusKind::Lost, at(3)));

        drop(tracker);
        workers.bus.await.unwrap();
        workers.log.await.unwrap();

        let kinds: Vec<&str> = publisher
            .messages()
            .await
            .iter()
            .map(BusMessage::kind)
            .collect();
        assert_eq!(kinds, vec!["FOCUS_LOST", "FOCUS_GAINED", "FOCUS_LOST"]);

        let logged = log.focus_events(&code()).await.unwrap();
        assert_eq!(logged.len(), 3);
        assert_eq!(logged[2].timestamp, at(3));
    }

    #[tokio::test]
    async fn test_repeated_kind_is_suppressed() {
        let publisher = Arc::new(RecordingPublisher::new());
        let log = Arc::new(InMemoryActivityLog::new());
        let (mut tracker, workers) = FocusTracker::spawn(
            code(),
            "Priya".to_string(),
            publisher.clone(),
            log.clone(),
            RetryPolicy::default(),
            &TaskTracker::new(),
        );

        assert!(tracker.observe_at(FocusKind::Lost, at(1)));
        assert!(!tracker.observe_at(FocusKind::Lost, at(2)));

        drop(tracker);
        workers.bus.await.unwrap();
        workers.log.await.unwrap();

        assert_eq!(publisher.call_count(), 1);
        assert_eq!(log.focus_events(&code()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bus_failure_does_not_block_log() {
        let publisher = Arc::new(RecordingPublisher::failing());
        let log = Arc::new(InMemoryActivityLog::new());
        let (mut tracker, workers) = FocusTracker::spawn(
            code(),
            "Priya".to_string(),
            publisher.clone(),
            log.clone(),
            RetryPolicy::default(),
            &TaskTracker::new(),
        );

        tracker.observe_at(FocusKind::Lost, at(1));
        tracker.observe_at(FocusKind::Gained, at(2));

        drop(tracker);
        workers.bus.await.unwrap();
        workers.log.await.unwrap();

        assert_eq!(publisher.call_count(), 2);
        assert_eq!(log.focus_events(&code()).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_failures_are_retried_and_do_not_block_bus() {
        let publisher = Arc::new(RecordingPublisher::new());
        let log = Arc::new(InMemoryActivityLog::with_failures(2));
        let (mut tracker, workers) = FocusTracker::spawn(
            code(),
            "Priya".to_string(),
            publisher.clone(),
            log.clone(),
            RetryPolicy::default(),
            &TaskTracker::new(),
        );

        tracker.observe_at(FocusKind::Lost, at(1));
        drop(tracker);

        workers.bus.await.unwrap();
        assert_eq!(publisher.call_count(), 1);

        workers.log.await.unwrap();
        assert_eq!(log.focus_events(&code()).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_wait_covers_queued_log_rows() {
        let appends = TaskTracker::new();
        let log = Arc::new(InMemoryActivityLog::with_failures(1));
        let (mut tracker, _workers) = FocusTracker::spawn(
            code(),
            "Priya".to_string(),
            Arc::new(RecordingPublisher::new()),
            log.clone(),
            RetryPolicy::default(),
            &appends,
        );
        assert_eq!(tracker.participant(), "Priya");

        tracker.observe_at(FocusKind::Lost, at(1));
        tracker.observe_at(FocusKind::Gained, at(2));
        drop(tracker);

        appends.close();
        appends.wait().await;
        assert_eq!(log.focus_events(&code()).await.unwrap().len(), 2);
    }
}
