//! Presenter-side components, run by the room on behalf of its presenter.

pub mod quiz;
pub mod voice;

pub use quiz::{QuizActor, QuizActorHandle, QuizState, Topic, TopicDraft, TopicStatus};
pub use voice::{TranscriptFeed, TranscriptSender, VoiceStatus, VoiceTrigger, VoiceTriggerHandle};
