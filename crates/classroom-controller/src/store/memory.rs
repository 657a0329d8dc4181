//! In-process activity log, used when no database is configured and in tests.

use super::{ActivityLog, AnswerRecord, FocusEvent};
use crate::errors::CcError;
use async_trait::async_trait;
use common::types::RoomCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct RoomLog {
    focus: Vec<FocusEvent>,
    answers: Vec<AnswerRecord>,
}

/// Activity log held in memory. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryActivityLog {
    rooms: RwLock<HashMap<RoomCode, RoomLog>>,
    /// Remaining appends to fail before succeeding.
    pending_failures: AtomicU32,
}

impl InMemoryActivityLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log whose next `count` appends fail with `Database`.
    #[must_use]
    pub fn with_failures(count: u32) -> Self {
        Self {
            pending_failures: AtomicU32::new(count),
            ..Self::default()
        }
    }

    fn take_failure(&self) -> Result<(), CcError> {
        let failed = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(CcError::Database("injected append failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ActivityLog for InMemoryActivityLog {
    async fn append_focus(&self, code: &RoomCode, event: &FocusEvent) -> Result<(), CcError> {
        self.take_failure()?;
        self.rooms
            .write()
            .await
            .entry(code.clone())
            .or_default()
            .focus
            .push(event.clone());
        Ok(())
    }

    async fn append_answer(&self, code: &RoomCode, record: &AnswerRecord) -> Result<(), CcError> {
        self.take_failure()?;
        self.rooms
            .write()
            .await
            .entry(code.clone())
            .or_default()
            .answers
            .push(record.clone());
        Ok(())
    }

    async fn focus_events(&self, code: &RoomCode) -> Result<Vec<FocusEvent>, CcError> {
        let rooms = self.rooms.read().await;
        let mut events = rooms.get(code).map(|r| r.focus.clone()).unwrap_or_default();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn answers(&self, code: &RoomCode) -> Result<Vec<AnswerRecord>, CcError> {
        let rooms = self.rooms.read().await;
        let mut answers = rooms.get(code).map(|r| r.answers.clone()).unwrap_or_default();
        answers.sort_by_key(|a| a.submitted_at);
        Ok(answers)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::types::FocusKind;

    fn code(s: &str) -> RoomCode {
        s.parse().unwrap()
    }

    fn event(who: &str, kind: FocusKind, secs: i64) -> FocusEvent {
        FocusEvent {
            participant: who.to_string(),
            kind,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_focus_events_are_scoped_and_ordered() {
        let log = InMemoryActivityLog::new();
        let room = code("AAAAAA");

        log.append_focus(&room, &event("Priya", FocusKind::Gained, 20))
            .await
            .unwrap();
        log.append_focus(&room, &event("Priya", FocusKind::Lost, 10))
            .await
            .unwrap();
        log.append_focus(&code("BBBBBB"), &event("Arjun", FocusKind::Lost, 5))
            .await
            .unwrap();

        let events = log.focus_events(&room).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, FocusKind::Lost);
        assert_eq!(events[1].kind, FocusKind::Gained);

        assert!(log.focus_events(&code("CCCCCC")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let log = InMemoryActivityLog::with_failures(2);
        let room = code("AAAAAA");
        let e = event("Priya", FocusKind::Lost, 0);

        assert!(log.append_focus(&room, &e).await.is_err());
        assert!(log.append_focus(&room, &e).await.is_err());
        assert!(log.append_focus(&room, &e).await.is_ok());
        assert_eq!(log.focus_events(&room).await.unwrap().len(), 1);
    }
}
