//! `RoomActor` - one per room.
//!
//! Owns the room's membership, its prepared topics while in Setup, and the
//! presenter-side tasks (quiz and voice trigger) once Live. All bus
//! publishes pass through this mailbox, which is what gives per-sender
//! ordering: a sender's frames are fanned out in the order they arrived.
//!
//! Lifecycle: `Setup -> Live -> Ended`. Ending is idempotent; an Ended room
//! rejects joins but stays addressable until the directory evicts it.

use super::messages::{
    Membership, Participant, RoomMessage, RoomSettings, RoomSnapshot, RoomStatus, TopicRoute,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::bus::{Frame, RoomPublisher, Subscription};
use crate::errors::CcError;
use crate::observability::metrics;
use crate::presenter::quiz::{QuizActor, QuizActorHandle, QuizSettings, Topic, TopicDraft};
use crate::presenter::voice::{TranscriptFeed, TranscriptSender, VoiceTrigger, VoiceTriggerHandle};
use crate::view::View;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::types::{ParticipantRole, RoomCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// How long an ended room waits for its quiz and voice tasks.
const TASK_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    code: RoomCode,
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
}

impl RoomActorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, CcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    #[must_use]
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Subscribe `participant` to the room's bus.
    ///
    /// # Errors
    ///
    /// - `RoomNotFound` if the room has ended
    /// - `PermissionDenied` if a presenter identity other than the room's
    ///   presenter tries to join as presenter
    pub async fn join(&self, participant: Participant) -> Result<Membership, CcError> {
        self.request(|respond_to| RoomMessage::Join {
            participant,
            respond_to,
        })
        .await?
    }

    /// Remove a member. Unknown ids are ignored.
    pub async fn leave(&self, member_id: Uuid) -> Result<(), CcError> {
        self.request(|respond_to| RoomMessage::Leave {
            member_id,
            respond_to,
        })
        .await
    }

    /// Queue a payload for fan-out. Does not wait for delivery.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the room actor has stopped.
    pub async fn publish(
        &self,
        from: Option<Uuid>,
        sender: String,
        payload: Bytes,
    ) -> Result<(), CcError> {
        self.sender
            .send(RoomMessage::Publish {
                from,
                sender,
                payload,
            })
            .await
            .map_err(|_| CcError::Transport(format!("room {} is closed", self.code)))
    }

    /// Add a topic. While Live the topic goes straight to the quiz.
    ///
    /// # Errors
    ///
    /// `MissingParameter` for an incomplete draft; `InvalidTransition` once
    /// the room has ended.
    pub async fn add_topic(&self, draft: TopicDraft) -> Result<Topic, CcError> {
        let route = self
            .request(|respond_to| RoomMessage::AddTopic { draft: draft.clone(), respond_to })
            .await??;

        match route {
            TopicRoute::Stored(topic) => Ok(topic),
            TopicRoute::Live(quiz) => quiz.add_topic(draft).await,
        }
    }

    /// Move the room from Setup to Live.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the room is in Setup.
    pub async fn start(&self) -> Result<RoomSnapshot, CcError> {
        self.request(|respond_to| RoomMessage::Start { respond_to })
            .await?
    }

    /// End the room. Returns `true` if this call ended it.
    pub async fn end(&self) -> Result<bool, CcError> {
        self.request(|respond_to| RoomMessage::End { respond_to })
            .await
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot, CcError> {
        self.request(|respond_to| RoomMessage::GetSnapshot { respond_to })
            .await
    }

    /// When the room went idle: its last Setup activity, or the moment a
    /// Live room lost its last member. `None` while a Live room has members
    /// and once the room has ended.
    pub async fn idle_since(&self) -> Result<Option<Instant>, CcError> {
        self.request(|respond_to| RoomMessage::GetIdleSince { respond_to })
            .await
    }

    /// The running quiz.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the room is Live.
    pub async fn quiz(&self) -> Result<QuizActorHandle, CcError> {
        self.request(|respond_to| RoomMessage::GetQuiz { respond_to })
            .await?
    }

    /// The running voice trigger and its transcript input.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the room is Live.
    pub async fn voice(&self) -> Result<(VoiceTriggerHandle, TranscriptSender), CcError> {
        self.request(|respond_to| RoomMessage::GetVoice { respond_to })
            .await?
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

struct Member {
    identity: String,
    role: ParticipantRole,
    queue: mpsc::UnboundedSender<Frame>,
}

/// Presenter-side tasks of a Live room.
struct LiveTasks {
    quiz: QuizActorHandle,
    quiz_task: JoinHandle<()>,
    voice: VoiceTriggerHandle,
    voice_task: JoinHandle<()>,
    transcripts: TranscriptSender,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    code: RoomCode,
    presenter: String,
    settings: RoomSettings,
    receiver: mpsc::Receiver<RoomMessage>,
    /// Own handle, given to subscriptions and publishers.
    handle: RoomActorHandle,
    cancel_token: CancellationToken,
    status: RoomStatus,
    presenter_view: View,
    members: HashMap<Uuid, Member>,
    topics: Vec<Topic>,
    live: Option<LiveTasks>,
    idle_since: Option<Instant>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a room in Setup owned by `presenter`.
    pub fn spawn(
        code: RoomCode,
        presenter: String,
        settings: RoomSettings,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let handle = RoomActorHandle {
            code: code.clone(),
            sender,
            cancel_token: cancel_token.clone(),
        };
        let mailbox = MailboxMonitor::new(ActorType::Room, code.as_str());

        let actor = Self {
            code,
            presenter: presenter.trim().to_string(),
            settings,
            receiver,
            handle: handle.clone(),
            cancel_token,
            status: RoomStatus::Setup,
            presenter_view: View::PresenterSetup,
            members: HashMap::new(),
            topics: Vec::new(),
            live: None,
            idle_since: Some(Instant::now()),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            metrics,
            mailbox,
        };

        let task_handle = tokio::spawn(actor.run());

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "cc.actor.room", fields(room = %self.code))]
    async fn run(mut self) {
        info!(
            target: "cc.actor.room",
            room = %self.code,
            presenter = %self.presenter,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "cc.actor.room", room = %self.code, "RoomActor cancelled");
                    self.end();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => break,
                    }
                }
            }
        }

        info!(
            target: "cc.actor.room",
            room = %self.code,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                participant,
                respond_to,
            } => {
                let result = self.join(participant);
                let _ = respond_to.send(result);
            }
            RoomMessage::Leave {
                member_id,
                respond_to,
            } => {
                self.leave(member_id);
                let _ = respond_to.send(());
            }
            RoomMessage::Publish {
                from,
                sender,
                payload,
            } => {
                self.fan_out(from, sender, payload);
            }
            RoomMessage::AddTopic { draft, respond_to } => {
                let result = self.add_topic(draft);
                let _ = respond_to.send(result);
            }
            RoomMessage::Start { respond_to } => {
                let result = self.start();
                let _ = respond_to.send(result);
            }
            RoomMessage::End { respond_to } => {
                let _ = respond_to.send(self.end());
            }
            RoomMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            RoomMessage::GetIdleSince { respond_to } => {
                let _ = respond_to.send(self.idle_since);
            }
            RoomMessage::GetQuiz { respond_to } => {
                let result = self
                    .live_tasks()
                    .map(|live| live.quiz.clone());
                let _ = respond_to.send(result);
            }
            RoomMessage::GetVoice { respond_to } => {
                let result = self
                    .live_tasks()
                    .map(|live| (live.voice.clone(), live.transcripts.clone()));
                let _ = respond_to.send(result);
            }
        }
    }

    fn live_tasks(&self) -> Result<&LiveTasks, CcError> {
        self.live
            .as_ref()
            .ok_or_else(|| CcError::InvalidTransition(format!("room {} is not live", self.code)))
    }

    fn join(&mut self, participant: Participant) -> Result<Membership, CcError> {
        if self.status == RoomStatus::Ended {
            return Err(CcError::RoomNotFound);
        }
        if participant.role == ParticipantRole::Presenter && participant.identity != self.presenter {
            return Err(CcError::PermissionDenied(
                "only the room's presenter may join as presenter".to_string(),
            ));
        }

        let member_id = Uuid::new_v4();
        let (queue, receiver) = mpsc::unbounded_channel();

        self.members.insert(
            member_id,
            Member {
                identity: participant.identity.clone(),
                role: participant.role,
                queue,
            },
        );
        self.metrics.member_joined();
        metrics::record_room_join(participant.role.as_str());
        if self.status == RoomStatus::Live {
            self.idle_since = None;
        }

        info!(
            target: "cc.actor.room",
            room = %self.code,
            member_id = %member_id,
            role = participant.role.as_str(),
            members = self.members.len(),
            "Participant joined"
        );

        Ok(Membership {
            subscription: Subscription::new(member_id, receiver, self.handle.clone()),
            publisher: RoomPublisher::new(
                self.handle.clone(),
                participant.identity.clone(),
                Some(member_id),
            ),
            participant,
        })
    }

    fn leave(&mut self, member_id: Uuid) {
        if let Some(member) = self.members.remove(&member_id) {
            self.metrics.member_left();
            debug!(
                target: "cc.actor.room",
                room = %self.code,
                member_id = %member_id,
                role = member.role.as_str(),
                "Participant left"
            );
        }
        self.mark_idle_if_empty();
    }

    /// A Live room with nobody connected starts its idle clock.
    fn mark_idle_if_empty(&mut self) {
        if self.status == RoomStatus::Live && self.members.is_empty() && self.idle_since.is_none() {
            self.idle_since = Some(Instant::now());
        }
    }

    fn fan_out(&mut self, from: Option<Uuid>, sender: String, payload: Bytes) {
        if self.status == RoomStatus::Ended {
            return;
        }

        let frame = Frame {
            sender,
            sent_at: Utc::now(),
            payload,
        };

        let mut closed = Vec::new();
        for (member_id, member) in &self.members {
            if Some(*member_id) == from {
                continue;
            }
            if member.queue.send(frame.clone()).is_err() {
                closed.push(*member_id);
            }
        }

        for member_id in closed {
            if let Some(member) = self.members.remove(&member_id) {
                self.metrics.member_left();
                debug!(
                    target: "cc.actor.room",
                    room = %self.code,
                    identity = %member.identity,
                    "Pruned closed subscription"
                );
            }
        }
        self.mark_idle_if_empty();
    }

    fn add_topic(&mut self, draft: TopicDraft) -> Result<TopicRoute, CcError> {
        draft.validate()?;

        match self.status {
            RoomStatus::Setup => {
                let id = self
                    .topics
                    .last()
                    .map_or(1, |t| t.id + 1);
                let topic = Topic::new(id, draft);
                self.topics.push(topic.clone());
                self.idle_since = Some(Instant::now());
                Ok(TopicRoute::Stored(topic))
            }
            RoomStatus::Live => Ok(TopicRoute::Live(self.live_tasks()?.quiz.clone())),
            RoomStatus::Ended => Err(CcError::InvalidTransition(format!(
                "room {} has ended",
                self.code
            ))),
        }
    }

    fn start(&mut self) -> Result<RoomSnapshot, CcError> {
        if self.status != RoomStatus::Setup {
            return Err(CcError::InvalidTransition(format!(
                "room {} is not in setup",
                self.code
            )));
        }
        self.presenter_view = self.presenter_view.transition(View::PresenterLive {
            code: self.code.clone(),
        })?;

        let publisher = Arc::new(RoomPublisher::new(
            self.handle.clone(),
            self.presenter.clone(),
            None,
        ));
        let (quiz, quiz_task) = QuizActor::spawn(
            QuizSettings {
                code: self.code.clone(),
                round_duration: self.settings.round_duration,
                retry: self.settings.retry,
                appends: self.settings.appends.clone(),
            },
            std::mem::take(&mut self.topics),
            publisher,
            Arc::clone(&self.settings.log),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        let (transcripts, feed) = TranscriptFeed::channel();
        let (voice, voice_task) = VoiceTrigger::spawn(
            self.code.clone(),
            self.settings.voice.clone(),
            Arc::new(feed),
            quiz.clone(),
            self.cancel_token.child_token(),
        );

        self.live = Some(LiveTasks {
            quiz,
            quiz_task,
            voice,
            voice_task,
            transcripts,
        });
        self.status = RoomStatus::Live;
        self.started_at = Some(Utc::now());
        self.idle_since = self.members.is_empty().then(Instant::now);

        info!(target: "cc.actor.room", room = %self.code, "Room is live");

        Ok(self.snapshot())
    }

    /// Idempotent. Returns `true` if the room was not already Ended.
    fn end(&mut self) -> bool {
        if self.status == RoomStatus::Ended {
            return false;
        }

        self.status = RoomStatus::Ended;
        self.ended_at = Some(Utc::now());
        self.idle_since = None;
        match self.presenter_view.transition(View::PresenterReport {
            code: self.code.clone(),
        }) {
            Ok(next) => self.presenter_view = next,
            Err(e) => {
                warn!(target: "cc.actor.room", room = %self.code, error = %e, "Presenter view not moved to report");
            }
        }

        // Dropping the queues closes every subscription.
        let members = self.members.len();
        self.members.clear();
        self.metrics.members_left(members);

        if let Some(live) = self.live.take() {
            live.voice.cancel();
            live.quiz.cancel();

            let code = self.code.clone();
            self.settings.appends.spawn(async move {
                for (name, task) in [("voice", live.voice_task), ("quiz", live.quiz_task)] {
                    match tokio::time::timeout(TASK_CLEANUP_TIMEOUT, task).await {
                        Ok(Ok(())) => {
                            debug!(target: "cc.actor.room", room = %code, task = name, "Task completed cleanly");
                        }
                        Ok(Err(e)) => {
                            warn!(target: "cc.actor.room", room = %code, task = name, error = ?e, "Task panicked during room end");
                        }
                        Err(_) => {
                            warn!(target: "cc.actor.room", room = %code, task = name, "Task cleanup timed out");
                        }
                    }
                }
            });
        }

        info!(
            target: "cc.actor.room",
            room = %self.code,
            members_released = members,
            "Room ended"
        );
        true
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            code: self.code.clone(),
            presenter: self.presenter.clone(),
            status: self.status,
            presenter_view: self.presenter_view.clone(),
            member_count: self.members.len(),
            topics: self.topics.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}
