//! Message and value types exchanged with the room actors.

use crate::bus::{RoomPublisher, Subscription};
use crate::errors::CcError;
use crate::presenter::quiz::{QuizActorHandle, Topic, TopicDraft};
use crate::presenter::voice::{TranscriptSender, VoiceSettings, VoiceTriggerHandle};
use crate::store::{ActivityLog, RetryPolicy};
use crate::view::View;

use super::metrics::MailboxLevel;
use super::room::RoomActorHandle;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::types::{ParticipantRole, RoomCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// A room member's identity and role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    /// Display name, with the roll id appended when one was given.
    pub identity: String,
    pub role: ParticipantRole,
}

impl Participant {
    #[must_use]
    pub fn presenter(name: &str) -> Self {
        Self {
            identity: name.trim().to_string(),
            role: ParticipantRole::Presenter,
        }
    }

    /// Viewer identity, e.g. `"Priya (21CS042)"` when a roll id is given.
    #[must_use]
    pub fn viewer(name: &str, roll_id: Option<&str>) -> Self {
        let name = name.trim();
        let identity = match roll_id.map(str::trim).filter(|r| !r.is_empty()) {
            Some(roll) => format!("{name} ({roll})"),
            None => name.to_string(),
        };
        Self {
            identity,
            role: ParticipantRole::Viewer,
        }
    }
}

/// Result of joining a room.
#[derive(Debug)]
pub struct Membership {
    pub participant: Participant,
    pub subscription: Subscription,
    pub publisher: RoomPublisher,
}

/// Room lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Setup,
    Live,
    Ended,
}

/// Point-in-time view of a room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub code: RoomCode,
    pub presenter: String,
    pub status: RoomStatus,
    pub presenter_view: View,
    pub member_count: usize,
    /// Prepared topics while in Setup; the quiz owns them once Live.
    pub topics: Vec<Topic>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RoomSnapshot {
    /// Snapshot with every prepared topic redacted.
    #[must_use]
    pub fn redacted(mut self) -> Self {
        self.topics = self.topics.iter().map(Topic::redacted).collect();
        self
    }
}

/// Where an added topic went.
#[derive(Debug)]
pub enum TopicRoute {
    /// Stored by the room while in Setup.
    Stored(Topic),
    /// Room is Live; the topic must be added to this quiz.
    Live(QuizActorHandle),
}

/// Settings every room is created with.
#[derive(Clone)]
pub struct RoomSettings {
    pub round_duration: Duration,
    pub voice: VoiceSettings,
    pub log: Arc<dyn ActivityLog>,
    pub retry: RetryPolicy,
    /// Detached log appends and task cleanups. Shared by every room; the
    /// directory waits on it during shutdown.
    pub appends: TaskTracker,
}

impl std::fmt::Debug for RoomSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSettings")
            .field("round_duration", &self.round_duration)
            .field("voice", &self.voice)
            .field("retry", &self.retry)
            .field("appends", &self.appends)
            .finish_non_exhaustive()
    }
}

/// Messages handled by a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    Join {
        participant: Participant,
        respond_to: oneshot::Sender<Result<Membership, CcError>>,
    },
    Leave {
        member_id: Uuid,
        respond_to: oneshot::Sender<()>,
    },
    /// Fan-out to every member except `from`. No reply.
    Publish {
        from: Option<Uuid>,
        sender: String,
        payload: Bytes,
    },
    AddTopic {
        draft: TopicDraft,
        respond_to: oneshot::Sender<Result<TopicRoute, CcError>>,
    },
    Start {
        respond_to: oneshot::Sender<Result<RoomSnapshot, CcError>>,
    },
    /// Replies `true` if this call ended the room.
    End {
        respond_to: oneshot::Sender<bool>,
    },
    GetSnapshot {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
    /// Replies with when the room last became idle; `None` while in use.
    GetIdleSince {
        respond_to: oneshot::Sender<Option<Instant>>,
    },
    GetQuiz {
        respond_to: oneshot::Sender<Result<QuizActorHandle, CcError>>,
    },
    GetVoice {
        respond_to: oneshot::Sender<Result<(VoiceTriggerHandle, TranscriptSender), CcError>>,
    },
}

/// Messages handled by the `RoomDirectoryActor`.
#[derive(Debug)]
pub enum DirectoryMessage {
    CreateRoom {
        presenter: String,
        respond_to: oneshot::Sender<Result<RoomSnapshot, CcError>>,
    },
    GetRoom {
        code: RoomCode,
        respond_to: oneshot::Sender<Result<RoomActorHandle, CcError>>,
    },
    EndRoom {
        code: RoomCode,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },
    GetStatus {
        respond_to: oneshot::Sender<DirectoryStatus>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Directory counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DirectoryStatus {
    pub room_count: usize,
    pub member_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
    pub peak_mailbox_depth: usize,
    pub mailbox_level: MailboxLevel,
    /// Log appends still in flight.
    pub pending_appends: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_identity_includes_roll_id() {
        assert_eq!(
            Participant::viewer(" Priya ", Some("21CS042")).identity,
            "Priya (21CS042)"
        );
        assert_eq!(Participant::viewer("Priya", Some("  ")).identity, "Priya");
        assert_eq!(Participant::viewer("Priya", None).identity, "Priya");
    }

    #[test]
    fn test_presenter_identity_is_trimmed() {
        let presenter = Participant::presenter("  Ms. Rao ");
        assert_eq!(presenter.identity, "Ms. Rao");
        assert_eq!(presenter.role, ParticipantRole::Presenter);
    }
}
