//! `QuizActor` - per-room quiz lifecycle state machine.
//!
//! Owns the room's topics once the room goes Live. Every state change runs
//! inside the actor's mailbox, so the "at most one Active topic" check and
//! the activation that follows are atomic with respect to every caller
//! (presenter HTTP calls and the voice trigger alike).
//!
//! Topic states: `Pending -> Active -> Completed`, never reversed. An
//! Active topic auto-closes after the round duration unless closed first.

use crate::actors::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::bus::{BusMessage, DataPublisher};
use crate::errors::CcError;
use crate::observability::metrics;
use crate::store::{append_answer_with_retry, ActivityLog, AnswerRecord, RetryPolicy};

use chrono::{DateTime, Utc};
use common::types::RoomCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the quiz mailbox.
const QUIZ_CHANNEL_BUFFER: usize = 100;

/// Lifecycle status of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicStatus {
    Pending,
    Active,
    Completed,
}

/// A prepared quiz prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topic {
    pub id: u32,
    pub name: String,
    pub question: String,
    /// Canonical answer. Graded by trimmed, case-insensitive equality.
    /// Empty (and omitted) in views shown before the round completes.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub answer: String,
    pub options: Vec<String>,
    pub explanation: Option<String>,
    pub status: TopicStatus,
}

impl Topic {
    /// Build a Pending topic from a validated draft.
    #[must_use]
    pub fn new(id: u32, draft: TopicDraft) -> Self {
        Self {
            id,
            name: draft.name.trim().to_string(),
            question: draft.question.trim().to_string(),
            answer: draft.answer.trim().to_string(),
            options: draft.options,
            explanation: draft.explanation,
            status: TopicStatus::Pending,
        }
    }

    /// Copy fit for viewers: the answer and explanation stay hidden until
    /// the topic is Completed.
    #[must_use]
    pub fn redacted(&self) -> Self {
        if self.status == TopicStatus::Completed {
            return self.clone();
        }
        Self {
            answer: String::new(),
            explanation: None,
            ..self.clone()
        }
    }

    /// Grade a submission against the canonical answer.
    #[must_use]
    pub fn is_correct(&self, submitted: &str) -> bool {
        submitted.trim().to_lowercase() == self.answer.trim().to_lowercase()
    }
}

/// Topic as supplied by the presenter or the question generator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicDraft {
    pub name: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl TopicDraft {
    /// # Errors
    ///
    /// Returns `MissingParameter` if name, question, or answer is blank.
    pub fn validate(&self) -> Result<(), CcError> {
        for (field, value) in [
            ("name", &self.name),
            ("question", &self.question),
            ("answer", &self.answer),
        ] {
            if value.trim().is_empty() {
                return Err(CcError::MissingParameter(format!("topic {field} is required")));
            }
        }
        Ok(())
    }
}

/// Kind of audit-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Triggered,
    Closed,
    TimedOut,
}

/// Local record of a trigger or close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub topic_id: u32,
    pub action: AuditAction,
    pub at: DateTime<Utc>,
}

/// Latest submission from one participant for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatestAnswer {
    pub participant: String,
    pub topic_id: u32,
    pub answer: String,
    pub is_correct: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Result of grading one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnswerOutcome {
    pub topic_id: u32,
    pub is_correct: bool,
}

/// Snapshot of the quiz.
#[derive(Debug, Clone, Serialize)]
pub struct QuizState {
    pub active_topic: Option<u32>,
    pub topics: Vec<Topic>,
    pub audit: Vec<AuditEntry>,
    pub answers: Vec<LatestAnswer>,
}

impl QuizState {
    /// View for a non-presenter: topics redacted, and only the submissions
    /// of `participant` (none when anonymous).
    #[must_use]
    pub fn redacted_for(self, participant: Option<&str>) -> Self {
        Self {
            active_topic: self.active_topic,
            topics: self.topics.iter().map(Topic::redacted).collect(),
            audit: self.audit,
            answers: self
                .answers
                .into_iter()
                .filter(|a| Some(a.participant.as_str()) == participant)
                .collect(),
        }
    }
}

/// Settings fixed for the lifetime of a quiz actor.
#[derive(Debug, Clone)]
pub struct QuizSettings {
    pub code: RoomCode,
    pub round_duration: Duration,
    pub retry: RetryPolicy,
    /// Answer appends run here so shutdown can wait for them.
    pub appends: TaskTracker,
}

/// Messages handled by the `QuizActor`.
#[derive(Debug)]
pub enum QuizMessage {
    Trigger {
        topic_id: u32,
        respond_to: oneshot::Sender<Result<Topic, CcError>>,
    },
    TriggerNext {
        respond_to: oneshot::Sender<Result<Topic, CcError>>,
    },
    ReceiveAnswer {
        participant: String,
        answer: String,
        respond_to: oneshot::Sender<Result<AnswerOutcome, CcError>>,
    },
    Close {
        topic_id: u32,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },
    NextPending {
        respond_to: oneshot::Sender<Option<u32>>,
    },
    AddTopic {
        draft: TopicDraft,
        respond_to: oneshot::Sender<Result<Topic, CcError>>,
    },
    GetState {
        respond_to: oneshot::Sender<QuizState>,
    },
}

/// Handle to a `QuizActor`.
#[derive(Clone, Debug)]
pub struct QuizActorHandle {
    sender: mpsc::Sender<QuizMessage>,
    cancel_token: CancellationToken,
}

impl QuizActorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> QuizMessage,
    ) -> Result<T, CcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Activate a Pending topic and broadcast it.
    ///
    /// # Errors
    ///
    /// `TopicNotFound` for an unknown id; `InvalidTransition` if the topic
    /// is not Pending or another topic is Active.
    pub async fn trigger(&self, topic_id: u32) -> Result<Topic, CcError> {
        self.request(|respond_to| QuizMessage::Trigger {
            topic_id,
            respond_to,
        })
        .await?
    }

    /// Trigger the first Pending topic in insertion order.
    ///
    /// Selection and activation happen in one mailbox turn.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if nothing is Pending or a topic is Active.
    pub async fn trigger_next(&self) -> Result<Topic, CcError> {
        self.request(|respond_to| QuizMessage::TriggerNext { respond_to })
            .await?
    }

    /// Grade and record a submission against the Active topic.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if no topic is Active; `MissingParameter` for a
    /// blank participant.
    pub async fn receive_answer(
        &self,
        participant: String,
        answer: String,
    ) -> Result<AnswerOutcome, CcError> {
        self.request(|respond_to| QuizMessage::ReceiveAnswer {
            participant,
            answer,
            respond_to,
        })
        .await?
    }

    /// Close an Active topic. Closing a Completed topic is a no-op.
    ///
    /// # Errors
    ///
    /// `TopicNotFound` for an unknown id; `InvalidTransition` for a Pending one.
    pub async fn close(&self, topic_id: u32) -> Result<(), CcError> {
        self.request(|respond_to| QuizMessage::Close {
            topic_id,
            respond_to,
        })
        .await?
    }

    /// First Pending topic id in insertion order, without side effects.
    pub async fn next_pending(&self) -> Result<Option<u32>, CcError> {
        self.request(|respond_to| QuizMessage::NextPending { respond_to })
            .await
    }

    /// Append a Pending topic.
    pub async fn add_topic(&self, draft: TopicDraft) -> Result<Topic, CcError> {
        self.request(|respond_to| QuizMessage::AddTopic { draft, respond_to })
            .await?
    }

    pub async fn state(&self) -> Result<QuizState, CcError> {
        self.request(|respond_to| QuizMessage::GetState { respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `QuizActor` implementation.
pub struct QuizActor {
    settings: QuizSettings,
    receiver: mpsc::Receiver<QuizMessage>,
    cancel_token: CancellationToken,
    topics: Vec<Topic>,
    next_topic_id: u32,
    /// Active topic and when it auto-closes.
    deadline: Option<(u32, Instant)>,
    audit: Vec<AuditEntry>,
    latest_answers: HashMap<(String, u32), LatestAnswer>,
    publisher: Arc<dyn DataPublisher>,
    log: Arc<dyn ActivityLog>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl QuizActor {
    /// Spawn a quiz actor owning `topics`.
    pub fn spawn(
        settings: QuizSettings,
        topics: Vec<Topic>,
        publisher: Arc<dyn DataPublisher>,
        log: Arc<dyn ActivityLog>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (QuizActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(QUIZ_CHANNEL_BUFFER);

        let next_topic_id = topics.iter().map(|t| t.id).max().map_or(1, |id| id + 1);
        let mailbox = MailboxMonitor::new(ActorType::Quiz, settings.code.as_str());

        let actor = Self {
            settings,
            receiver,
            cancel_token: cancel_token.clone(),
            topics,
            next_topic_id,
            deadline: None,
            audit: Vec::new(),
            latest_answers: HashMap::new(),
            publisher,
            log,
            metrics,
            mailbox,
        };

        let task_handle = tokio::spawn(actor.run());

        (
            QuizActorHandle {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    #[instrument(skip_all, name = "cc.actor.quiz", fields(room = %self.settings.code))]
    async fn run(mut self) {
        info!(
            target: "cc.quiz",
            room = %self.settings.code,
            topics = self.topics.len(),
            "QuizActor started"
        );

        loop {
            let deadline = self.deadline;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "cc.quiz", room = %self.settings.code, "QuizActor cancelled");
                    break;
                }

                () = sleep_until_deadline(deadline) => {
                    if let Some((topic_id, _)) = deadline {
                        self.close_topic(topic_id, AuditAction::TimedOut);
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => break,
                    }
                }
            }
        }

        info!(
            target: "cc.quiz",
            room = %self.settings.code,
            messages_processed = self.mailbox.messages_processed(),
            "QuizActor stopped"
        );
    }

    async fn handle_message(&mut self, message: QuizMessage) {
        match message {
            QuizMessage::Trigger {
                topic_id,
                respond_to,
            } => {
                let result = self.trigger(topic_id, "manual").await;
                let _ = respond_to.send(result);
            }
            QuizMessage::TriggerNext { respond_to } => {
                let result = match self.next_pending() {
                    Some(topic_id) => self.trigger(topic_id, "next").await,
                    None => Err(CcError::InvalidTransition(
                        "no pending topics remain".to_string(),
                    )),
                };
                let _ = respond_to.send(result);
            }
            QuizMessage::ReceiveAnswer {
                participant,
                answer,
                respond_to,
            } => {
                let result = self.receive_answer(participant, answer);
                let _ = respond_to.send(result);
            }
            QuizMessage::Close {
                topic_id,
                respond_to,
            } => {
                let result = self.close(topic_id);
                let _ = respond_to.send(result);
            }
            QuizMessage::NextPending { respond_to } => {
                let _ = respond_to.send(self.next_pending());
            }
            QuizMessage::AddTopic { draft, respond_to } => {
                let result = self.add_topic(draft);
                let _ = respond_to.send(result);
            }
            QuizMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state());
            }
        }
    }

    fn active_topic(&self) -> Option<&Topic> {
        self.topics
            .iter()
            .find(|t| t.status == TopicStatus::Active)
    }

    fn next_pending(&self) -> Option<u32> {
        self.topics
            .iter()
            .find(|t| t.status == TopicStatus::Pending)
            .map(|t| t.id)
    }

    async fn trigger(&mut self, topic_id: u32, source: &'static str) -> Result<Topic, CcError> {
        let active_id = self.active_topic().map(|t| t.id);
        let topic = self
            .topics
            .iter_mut()
            .find(|t| t.id == topic_id)
            .ok_or(CcError::TopicNotFound)?;

        if let Some(active_id) = active_id {
            metrics::record_quiz_round("rejected", "already_active");
            return Err(CcError::InvalidTransition(format!(
                "topic {active_id} is already active"
            )));
        }
        if topic.status != TopicStatus::Pending {
            metrics::record_quiz_round("rejected", "not_pending");
            return Err(CcError::InvalidTransition(format!(
                "topic {topic_id} is not pending"
            )));
        }

        topic.status = TopicStatus::Active;
        let snapshot = topic.clone();

        self.deadline = Some((topic_id, Instant::now() + self.settings.round_duration));
        self.audit.push(AuditEntry {
            topic_id,
            action: AuditAction::Triggered,
            at: Utc::now(),
        });
        metrics::record_quiz_round("triggered", source);

        info!(
            target: "cc.quiz",
            room = %self.settings.code,
            topic_id = topic_id,
            source = source,
            "Quiz round started"
        );

        let message = BusMessage::QuizStart {
            question: snapshot.question.clone(),
            answer: snapshot.answer.clone(),
            options: snapshot.options.clone(),
            timestamp: Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.publisher.publish(&message).await {
            warn!(
                target: "cc.quiz",
                room = %self.settings.code,
                topic_id = topic_id,
                error = %e,
                "QUIZ_START publish failed"
            );
        }

        Ok(snapshot)
    }

    fn receive_answer(
        &mut self,
        participant: String,
        answer: String,
    ) -> Result<AnswerOutcome, CcError> {
        let participant = participant.trim().to_string();
        if participant.is_empty() {
            return Err(CcError::MissingParameter(
                "participant is required".to_string(),
            ));
        }

        let topic = self
            .active_topic()
            .ok_or_else(|| CcError::InvalidTransition("no topic is active".to_string()))?;

        let topic_id = topic.id;
        let is_correct = topic.is_correct(&answer);
        let submitted_at = Utc::now();

        let record = AnswerRecord {
            participant: participant.clone(),
            topic_id,
            question: topic.question.clone(),
            answer_given: answer.clone(),
            is_correct,
            submitted_at,
        };

        self.latest_answers.insert(
            (participant.clone(), topic_id),
            LatestAnswer {
                participant,
                topic_id,
                answer,
                is_correct,
                submitted_at,
            },
        );
        metrics::record_quiz_answer(is_correct);

        let log = Arc::clone(&self.log);
        let retry = self.settings.retry;
        let code = self.settings.code.clone();
        self.settings.appends.spawn(async move {
            if let Err(e) = append_answer_with_retry(&log, retry, &code, &record).await {
                warn!(
                    target: "cc.quiz",
                    room = %code,
                    topic_id = record.topic_id,
                    error = %e,
                    "Dropping quiz response after retries"
                );
            }
        });

        Ok(AnswerOutcome {
            topic_id,
            is_correct,
        })
    }

    fn close(&mut self, topic_id: u32) -> Result<(), CcError> {
        let status = self
            .topics
            .iter()
            .find(|t| t.id == topic_id)
            .map(|t| t.status)
            .ok_or(CcError::TopicNotFound)?;

        match status {
            TopicStatus::Completed => Ok(()),
            TopicStatus::Pending => Err(CcError::InvalidTransition(format!(
                "topic {topic_id} has not been triggered"
            ))),
            TopicStatus::Active => {
                self.close_topic(topic_id, AuditAction::Closed);
                Ok(())
            }
        }
    }

    /// Active -> Completed. Anything else is left untouched.
    fn close_topic(&mut self, topic_id: u32, action: AuditAction) {
        let Some(topic) = self
            .topics
            .iter_mut()
            .find(|t| t.id == topic_id && t.status == TopicStatus::Active)
        else {
            return;
        };

        topic.status = TopicStatus::Completed;
        if matches!(self.deadline, Some((id, _)) if id == topic_id) {
            self.deadline = None;
        }
        self.audit.push(AuditEntry {
            topic_id,
            action,
            at: Utc::now(),
        });

        let reason = if action == AuditAction::TimedOut {
            "timeout"
        } else {
            "explicit"
        };
        metrics::record_quiz_round("closed", reason);

        info!(
            target: "cc.quiz",
            room = %self.settings.code,
            topic_id = topic_id,
            reason = reason,
            "Quiz round closed"
        );
    }

    fn add_topic(&mut self, draft: TopicDraft) -> Result<Topic, CcError> {
        draft.validate()?;
        let topic = Topic::new(self.next_topic_id, draft);
        self.next_topic_id += 1;
        self.topics.push(topic.clone());
        Ok(topic)
    }

    fn state(&self) -> QuizState {
        let mut answers: Vec<LatestAnswer> = self.latest_answers.values().cloned().collect();
        answers.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.participant.cmp(&b.participant))
        });

        QuizState {
            active_topic: self.active_topic().map(|t| t.id),
            topics: self.topics.clone(),
            audit: self.audit.clone(),
            answers,
        }
    }
}

async fn sleep_until_deadline(deadline: Option<(u32, Instant)>) {
    match deadline {
        Some((_, at)) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
