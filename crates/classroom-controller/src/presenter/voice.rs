//! Voice Trigger.
//!
//! Perpetual listen loop on behalf of the presenter: start a recognition
//! session, consume finalized utterances, and advance the quiz when one
//! contains the trigger phrase. Sessions end on end-of-utterance, silence,
//! or transient errors and are restarted after a short delay. Unsupported
//! recognizers and denied permissions park the loop in a degraded state.
//!
//! The active session is stopped on every exit path.

use super::quiz::QuizActorHandle;
use crate::errors::CcError;
use crate::observability::metrics;

use async_trait::async_trait;
use common::types::RoomCode;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Why the recognizer could not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    Unsupported,
    PermissionDenied,
    /// Network or audio-capture hiccup; the loop restarts.
    Transient(String),
}

/// One event from a recognition session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Finalized transcript text.
    Final(String),
    NoSpeech,
    /// End of utterance; the session is over.
    End,
    Error(RecognitionError),
}

/// A running recognition session holding the microphone.
#[async_trait]
pub trait RecognitionSession: Send {
    /// Next event. `None` means the recognizer has shut down for good.
    async fn next_event(&mut self) -> Option<RecognitionEvent>;

    /// Release the microphone.
    async fn stop(&mut self);
}

/// Speech-to-text backend.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn start(&self) -> Result<Box<dyn RecognitionSession>, RecognitionError>;
}

/// Why voice triggering is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    Unsupported,
    PermissionDenied,
}

/// Observable state of the listen loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum VoiceStatus {
    Idle,
    Listening,
    Degraded(DegradedReason),
}

#[derive(Debug, Clone)]
pub struct VoiceSettings {
    /// Lower-cased phrase searched for in each utterance.
    pub trigger_phrase: String,
    /// Minimum time between two fires.
    pub cooldown: Duration,
    pub restart_delay: Duration,
}

/// Handle to a running voice trigger.
#[derive(Debug, Clone)]
pub struct VoiceTriggerHandle {
    status: watch::Receiver<VoiceStatus>,
    cancel_token: CancellationToken,
}

impl VoiceTriggerHandle {
    #[must_use]
    pub fn status(&self) -> VoiceStatus {
        *self.status.borrow()
    }

    /// Stop listening. The session is released before the task exits.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

enum SessionExit {
    Restart,
    Closed,
    Degraded(DegradedReason),
    Cancelled,
}

/// The listen loop.
pub struct VoiceTrigger {
    code: RoomCode,
    settings: VoiceSettings,
    recognizer: Arc<dyn SpeechRecognizer>,
    quiz: QuizActorHandle,
    status: watch::Sender<VoiceStatus>,
    cancel_token: CancellationToken,
    last_fired: Option<Instant>,
}

impl VoiceTrigger {
    pub fn spawn(
        code: RoomCode,
        settings: VoiceSettings,
        recognizer: Arc<dyn SpeechRecognizer>,
        quiz: QuizActorHandle,
        cancel_token: CancellationToken,
    ) -> (VoiceTriggerHandle, JoinHandle<()>) {
        let (status_tx, status_rx) = watch::channel(VoiceStatus::Idle);

        let trigger = Self {
            code,
            settings,
            recognizer,
            quiz,
            status: status_tx,
            cancel_token: cancel_token.clone(),
            last_fired: None,
        };

        let task_handle = tokio::spawn(trigger.run());

        (
            VoiceTriggerHandle {
                status: status_rx,
                cancel_token,
            },
            task_handle,
        )
    }

    #[instrument(skip_all, name = "cc.voice", fields(room = %self.code))]
    async fn run(mut self) {
        info!(target: "cc.voice", room = %self.code, "Voice trigger started");

        loop {
            let started = tokio::select! {
                () = self.cancel_token.cancelled() => break,
                started = self.recognizer.start() => started,
            };

            let exit = match started {
                Ok(mut session) => {
                    self.set_status(VoiceStatus::Listening);
                    let exit = self.listen(session.as_mut()).await;
                    session.stop().await;
                    exit
                }
                Err(e) => classify_error(&self.code, e),
            };

            match exit {
                SessionExit::Restart => {
                    self.set_status(VoiceStatus::Idle);
                    tokio::select! {
                        () = self.cancel_token.cancelled() => break,
                        () = tokio::time::sleep(self.settings.restart_delay) => {}
                    }
                }
                SessionExit::Degraded(reason) => {
                    warn!(
                        target: "cc.voice",
                        room = %self.code,
                        reason = ?reason,
                        "Voice trigger unavailable"
                    );
                    self.set_status(VoiceStatus::Degraded(reason));
                    break;
                }
                SessionExit::Closed | SessionExit::Cancelled => {
                    self.set_status(VoiceStatus::Idle);
                    break;
                }
            }
        }

        info!(target: "cc.voice", room = %self.code, "Voice trigger stopped");
    }

    async fn listen(&mut self, session: &mut dyn RecognitionSession) -> SessionExit {
        loop {
            let event = tokio::select! {
                () = self.cancel_token.cancelled() => return SessionExit::Cancelled,
                event = session.next_event() => event,
            };

            match event {
                None => return SessionExit::Closed,
                Some(RecognitionEvent::End | RecognitionEvent::NoSpeech) => {
                    return SessionExit::Restart;
                }
                Some(RecognitionEvent::Error(e)) => return classify_error(&self.code, e),
                Some(RecognitionEvent::Final(text)) => self.on_utterance(&text).await,
            }
        }
    }

    /// Fires at most once per utterance.
    async fn on_utterance(&mut self, text: &str) {
        let normalized = text.trim().to_lowercase();
        if !normalized.contains(&self.settings.trigger_phrase) {
            return;
        }

        if let Some(last) = self.last_fired {
            if last.elapsed() < self.settings.cooldown {
                debug!(target: "cc.voice", room = %self.code, "Trigger phrase ignored during cooldown");
                metrics::record_voice_trigger("cooldown");
                return;
            }
        }

        match self.quiz.trigger_next().await {
            Ok(topic) => {
                self.last_fired = Some(Instant::now());
                metrics::record_voice_trigger("fired");
                info!(
                    target: "cc.voice",
                    room = %self.code,
                    topic_id = topic.id,
                    "Voice command triggered quiz"
                );
            }
            Err(CcError::InvalidTransition(reason)) => {
                metrics::record_voice_trigger("rejected");
                info!(
                    target: "cc.voice",
                    room = %self.code,
                    reason = %reason,
                    "Voice command rejected"
                );
            }
            Err(e) => {
                metrics::record_voice_trigger("error");
                warn!(target: "cc.voice", room = %self.code, error = %e, "Voice command failed");
            }
        }
    }

    fn set_status(&self, status: VoiceStatus) {
        self.status.send_replace(status);
    }
}

fn classify_error(code: &RoomCode, error: RecognitionError) -> SessionExit {
    match error {
        RecognitionError::Unsupported => SessionExit::Degraded(DegradedReason::Unsupported),
        RecognitionError::PermissionDenied => {
            SessionExit::Degraded(DegradedReason::PermissionDenied)
        }
        RecognitionError::Transient(reason) => {
            debug!(target: "cc.voice", room = %code, reason = %reason, "Recognition interrupted");
            SessionExit::Restart
        }
    }
}

/// Recognizer fed with finalized transcripts from an external
/// speech-to-text service.
///
/// Each session yields one utterance and then ends, so the loop restarts
/// between utterances. Transcripts posted in between stay queued.
#[derive(Debug, Clone)]
pub struct TranscriptFeed {
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

/// Posting side of a [`TranscriptFeed`].
#[derive(Debug, Clone)]
pub struct TranscriptSender {
    sender: mpsc::UnboundedSender<String>,
}

impl TranscriptFeed {
    #[must_use]
    pub fn channel() -> (TranscriptSender, TranscriptFeed) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            TranscriptSender { sender },
            TranscriptFeed {
                receiver: Arc::new(Mutex::new(receiver)),
            },
        )
    }
}

impl TranscriptSender {
    /// # Errors
    ///
    /// Returns `Transport` once the listening side is gone.
    pub fn send(&self, transcript: impl Into<String>) -> Result<(), CcError> {
        self.sender
            .send(transcript.into())
            .map_err(|_| CcError::Transport("voice trigger is not listening".to_string()))
    }
}

struct FeedSession {
    receiver: OwnedMutexGuard<mpsc::UnboundedReceiver<String>>,
    delivered: bool,
}

#[async_trait]
impl RecognitionSession for FeedSession {
    async fn next_event(&mut self) -> Option<RecognitionEvent> {
        if self.delivered {
            return Some(RecognitionEvent::End);
        }
        let text = self.receiver.recv().await?;
        self.delivered = true;
        Some(RecognitionEvent::Final(text))
    }

    async fn stop(&mut self) {}
}

#[async_trait]
impl SpeechRecognizer for TranscriptFeed {
    async fn start(&self) -> Result<Box<dyn RecognitionSession>, RecognitionError> {
        let receiver = Arc::clone(&self.receiver).lock_owned().await;
        Ok(Box::new(FeedSession {
            receiver,
            delivered: false,
        }))
    }
}

/// Scripted recognizer for testing.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Outcome of one `start()` call.
    #[derive(Debug, Clone)]
    pub enum Script {
        /// Session yielding these events, then listening forever.
        Events(Vec<RecognitionEvent>),
        Fail(RecognitionError),
    }

    /// Plays back scripts in order; once exhausted, every session listens
    /// silently.
    #[derive(Debug, Default)]
    pub struct ScriptedRecognizer {
        scripts: std::sync::Mutex<VecDeque<Script>>,
        starts: AtomicUsize,
        stops: Arc<AtomicUsize>,
    }

    impl ScriptedRecognizer {
        #[must_use]
        pub fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: std::sync::Mutex::new(scripts.into()),
                ..Self::default()
            }
        }

        #[must_use]
        pub fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        #[must_use]
        pub fn stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }
    }

    struct ScriptedSession {
        events: VecDeque<RecognitionEvent>,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RecognitionSession for ScriptedSession {
        async fn next_event(&mut self) -> Option<RecognitionEvent> {
            match self.events.pop_front() {
                Some(event) => Some(event),
                None => std::future::pending().await,
            }
        }

        async fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SpeechRecognizer for ScriptedRecognizer {
        async fn start(&self) -> Result<Box<dyn RecognitionSession>, RecognitionError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .map_err(|_| RecognitionError::Transient("script lock poisoned".to_string()))?
                .pop_front()
                .unwrap_or(Script::Events(Vec::new()));

            match script {
                Script::Fail(e) => Err(e),
                Script::Events(events) => Ok(Box::new(ScriptedSession {
                    events: events.into(),
                    stops: Arc::clone(&self.stops),
                })),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::mock::{Script, ScriptedRecognizer};
    use super::*;
    use crate::actors::metrics::ActorMetrics;
    use crate::bus::mock::RecordingPublisher;
    use crate::presenter::quiz::{QuizActor, QuizSettings, Topic, TopicDraft, TopicStatus};
    use crate::store::{InMemoryActivityLog, RetryPolicy};
    use tokio_util::task::TaskTracker;

    fn code() -> RoomCode {
        "K3ZQ9A".parse().unwrap()
    }

    fn settings() -> VoiceSettings {
        VoiceSettings {
            trigger_phrase: "ask the question".to_string(),
            cooldown: Duration::from_secs(3),
            restart_delay: Duration::from_millis(500),
        }
    }

    fn spawn_quiz(topics: u32) -> QuizActorHandle {
        let topics = (1..=topics)
            .map(|id| {
                Topic::new(
                    id,
                    TopicDraft {
                        name: format!("Topic {id}"),
                        question: "q".to_string(),
                        answer: "a".to_string(),
                        options: vec![],
                        explanation: None,
                    },
                )
            })
            .collect();
        let (handle, _task) = QuizActor::spawn(
            QuizSettings {
                code: code(),
                round_duration: Duration::from_secs(600),
                retry: RetryPolicy::default(),
                appends: TaskTracker::new(),
            },
            topics,
            Arc::new(RecordingPublisher::new()),
            Arc::new(InMemoryActivityLog::new()),
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        handle
    }

    fn final_text(text: &str) -> RecognitionEvent {
        RecognitionEvent::Final(text.to_string())
    }

    async fn statuses(quiz: &QuizActorHandle) -> Vec<TopicStatus> {
        quiz.state()
            .await
            .unwrap()
            .topics
            .iter()
            .map(|t| t.status)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_phrase_fires_once_per_utterance() {
        let quiz = spawn_quiz(2);
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Script::Events(vec![
            final_text("  OK class, Ask The Question... ask the question now "),
        ])]));

        let (handle, _task) = VoiceTrigger::spawn(
            code(),
            settings(),
            recognizer.clone(),
            quiz.clone(),
            CancellationToken::new(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            statuses(&quiz).await,
            vec![TopicStatus::Active, TopicStatus::Pending]
        );
        assert_eq!(handle.status(), VoiceStatus::Listening);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_speech_does_not_fire() {
        let quiz = spawn_quiz(1);
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Script::Events(vec![
            final_text("please open your books"),
        ])]));

        let (handle, _task) =
            VoiceTrigger::spawn(code(), settings(), recognizer, quiz.clone(), CancellationToken::new());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(statuses(&quiz).await, vec![TopicStatus::Pending]);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_suppresses_rapid_second_fire() {
        let quiz = spawn_quiz(2);
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Script::Events(vec![
            final_text("ask the question"),
            final_text("ask the question"),
        ])]));

        let (handle, _task) =
            VoiceTrigger::spawn(code(), settings(), recognizer, quiz.clone(), CancellationToken::new());
        tokio::time::sleep(Duration::from_millis(100)).await;

        // First topic is still active; the second utterance hit the cooldown
        // before reaching the quiz.
        assert_eq!(
            statuses(&quiz).await,
            vec![TopicStatus::Active, TopicStatus::Pending]
        );
        assert_eq!(quiz.state().await.unwrap().audit.len(), 1);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_degrades_without_retry() {
        let quiz = spawn_quiz(1);
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Script::Fail(
            RecognitionError::PermissionDenied,
        )]));

        let (handle, task) = VoiceTrigger::spawn(
            code(),
            settings(),
            recognizer.clone(),
            quiz,
            CancellationToken::new(),
        );
        task.await.unwrap();

        assert_eq!(
            handle.status(),
            VoiceStatus::Degraded(DegradedReason::PermissionDenied)
        );
        assert_eq!(recognizer.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_mid_session_degrades_and_releases_microphone() {
        let quiz = spawn_quiz(1);
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![Script::Events(vec![
            RecognitionEvent::Error(RecognitionError::Unsupported),
        ])]));

        let (handle, task) = VoiceTrigger::spawn(
            code(),
            settings(),
            recognizer.clone(),
            quiz,
            CancellationToken::new(),
        );
        task.await.unwrap();

        assert_eq!(
            handle.status(),
            VoiceStatus::Degraded(DegradedReason::Unsupported)
        );
        assert_eq!(recognizer.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_and_transient_errors_restart_the_loop() {
        let quiz = spawn_quiz(1);
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![
            Script::Events(vec![RecognitionEvent::NoSpeech]),
            Script::Fail(RecognitionError::Transient("network".to_string())),
            Script::Events(vec![RecognitionEvent::End]),
        ]));

        let (handle, _task) = VoiceTrigger::spawn(
            code(),
            settings(),
            recognizer.clone(),
            quiz,
            CancellationToken::new(),
        );
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(recognizer.starts(), 4);
        assert_eq!(handle.status(), VoiceStatus::Listening);
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_active_session() {
        let quiz = spawn_quiz(1);
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![]));

        let (handle, task) = VoiceTrigger::spawn(
            code(),
            settings(),
            recognizer.clone(),
            quiz,
            CancellationToken::new(),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.status(), VoiceStatus::Listening);

        handle.cancel();
        task.await.unwrap();

        assert_eq!(recognizer.starts(), 1);
        assert_eq!(recognizer.stops(), 1);
        assert_eq!(handle.status(), VoiceStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcript_feed_drives_trigger() {
        let quiz = spawn_quiz(2);
        let (sender, feed) = TranscriptFeed::channel();

        let (handle, _task) = VoiceTrigger::spawn(
            code(),
            settings(),
            Arc::new(feed),
            quiz.clone(),
            CancellationToken::new(),
        );

        sender.send("Let me ask the question").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        quiz.close(1).await.unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        sender.send("ASK THE QUESTION").unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            statuses(&quiz).await,
            vec![TopicStatus::Completed, TopicStatus::Active]
        );
        handle.cancel();
    }
}
