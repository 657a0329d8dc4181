//! `RoomDirectoryActor` - singleton supervisor for room actors.
//!
//! - Generates room codes and spawns one `RoomActor` per room
//! - Resolves codes to room handles for joins and presenter actions
//! - Ends rooms left idle (Setup untouched, or Live with nobody connected)
//! - Evicts ended rooms once the retention window has passed
//! - Owns the root `CancellationToken` for graceful shutdown, which waits
//!   for every room and every in-flight log append
//! - Detects room actors that exited unexpectedly (panic via `JoinHandle`)

use super::messages::{
    DirectoryMessage, DirectoryStatus, Membership, Participant, RoomSettings, RoomSnapshot,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle};
use crate::errors::CcError;
use crate::observability::metrics;

use common::types::{RoomCode, ROOM_CODE_ALPHABET, ROOM_CODE_LENGTH};
use ring::rand::{SecureRandom, SystemRandom};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the directory mailbox.
const DIRECTORY_CHANNEL_BUFFER: usize = 1000;

/// How often rooms are checked for idleness and eviction.
const EVICTION_INTERVAL: Duration = Duration::from_secs(30);

/// How long shutdown waits for in-flight log appends.
const APPEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts at finding an unused code before giving up.
const CODE_ATTEMPTS: usize = 8;

/// Largest multiple of the alphabet size that fits in a byte; bytes at or
/// above it are rejected so every character is equally likely.
const UNBIASED_BYTE_LIMIT: u8 = 252;

/// Settings for the directory and the rooms it creates.
#[derive(Debug, Clone)]
pub struct DirectorySettings {
    pub max_rooms: usize,
    pub ended_room_retention: Duration,
    pub idle_room_timeout: Duration,
    pub room: RoomSettings,
}

/// Handle to the `RoomDirectoryActor`.
#[derive(Clone, Debug)]
pub struct RoomDirectoryActorHandle {
    sender: mpsc::Sender<DirectoryMessage>,
    cancel_token: CancellationToken,
    appends: TaskTracker,
}

impl RoomDirectoryActorHandle {
    /// Spawn the directory actor and return a handle to it.
    #[must_use]
    pub fn new(settings: DirectorySettings, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(DIRECTORY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let appends = settings.room.appends.clone();

        let actor = RoomDirectoryActor::new(settings, receiver, cancel_token.clone(), metrics);
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            appends,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(tokio::sync::oneshot::Sender<T>) -> DirectoryMessage,
    ) -> Result<T, CcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Create a room in Setup owned by `presenter`.
    ///
    /// # Errors
    ///
    /// - `MissingParameter` if `presenter` is blank
    /// - `RoomLimitReached` at capacity
    /// - `Draining` during shutdown
    pub async fn create_room(&self, presenter: String) -> Result<RoomSnapshot, CcError> {
        self.request(|respond_to| DirectoryMessage::CreateRoom {
            presenter,
            respond_to,
        })
        .await?
    }

    /// Resolve a code to its room, including Ended rooms not yet evicted.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` for unknown or evicted codes.
    pub async fn get_room(&self, code: RoomCode) -> Result<RoomActorHandle, CcError> {
        self.request(|respond_to| DirectoryMessage::GetRoom { code, respond_to })
            .await?
    }

    /// Join the room with `code`.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` for unknown or Ended rooms.
    pub async fn join(
        &self,
        code: RoomCode,
        participant: Participant,
    ) -> Result<Membership, CcError> {
        let room = self.get_room(code).await?;
        room.join(participant).await
    }

    /// Mark a room Ended. Ending an Ended room is a no-op.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` for unknown or evicted codes.
    pub async fn end_room(&self, code: RoomCode) -> Result<(), CcError> {
        self.request(|respond_to| DirectoryMessage::EndRoom { code, respond_to })
            .await?
    }

    pub async fn get_status(&self) -> Result<DirectoryStatus, CcError> {
        self.request(|respond_to| DirectoryMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting rooms and cancel every room.
    /// Stop accepting rooms, end every room, and wait for in-flight log
    /// appends. Returns once the drain has finished or timed out.
    pub async fn shutdown(&self) -> Result<(), CcError> {
        self.request(|respond_to| DirectoryMessage::Shutdown { respond_to })
            .await
    }

    /// Tracker for log work that must finish before shutdown completes.
    #[must_use]
    pub fn appends(&self) -> &TaskTracker {
        &self.appends
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
    /// Set when the room ends; drives eviction.
    ended_at: Option<Instant>,
}

/// The `RoomDirectoryActor` implementation.
pub struct RoomDirectoryActor {
    settings: DirectorySettings,
    receiver: mpsc::Receiver<DirectoryMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<RoomCode, ManagedRoom>,
    accepting_new: bool,
    rng: SystemRandom,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
    shutdown_reply: Option<oneshot::Sender<()>>,
}

impl RoomDirectoryActor {
    fn new(
        settings: DirectorySettings,
        receiver: mpsc::Receiver<DirectoryMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        Self {
            settings,
            receiver,
            cancel_token,
            rooms: HashMap::new(),
            accepting_new: true,
            rng: SystemRandom::new(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Directory, "directory"),
            shutdown_reply: None,
        }
    }

    #[instrument(skip_all, name = "cc.actor.directory")]
    async fn run(mut self) {
        info!(
            target: "cc.actor.directory",
            max_rooms = self.settings.max_rooms,
            "RoomDirectoryActor started"
        );

        let mut eviction = tokio::time::interval(EVICTION_INTERVAL);
        eviction.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "cc.actor.directory",
                        "RoomDirectoryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    if let Some(reply) = self.shutdown_reply.take() {
                        let _ = reply.send(());
                    }
                    break;
                }

                _ = eviction.tick() => {
                    self.end_idle_rooms().await;
                    self.evict_ended_rooms();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "cc.actor.directory",
                                "RoomDirectoryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "cc.actor.directory",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "RoomDirectoryActor stopped"
        );
    }

    async fn handle_message(&mut self, message: DirectoryMessage) {
        match message {
            DirectoryMessage::CreateRoom {
                presenter,
                respond_to,
            } => {
                let result = self.create_room(presenter).await;
                let _ = respond_to.send(result);
            }
            DirectoryMessage::GetRoom { code, respond_to } => {
                let result = self
                    .rooms
                    .get(&code)
                    .map(|managed| managed.handle.clone())
                    .ok_or(CcError::RoomNotFound);
                let _ = respond_to.send(result);
            }
            DirectoryMessage::EndRoom { code, respond_to } => {
                let result = self.end_room(&code).await;
                let _ = respond_to.send(result);
            }
            DirectoryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }
            DirectoryMessage::Shutdown { respond_to } => {
                info!(
                    target: "cc.actor.directory",
                    room_count = self.rooms.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.shutdown_reply = Some(respond_to);
                self.cancel_token.cancel();
            }
        }
    }

    async fn create_room(&mut self, presenter: String) -> Result<RoomSnapshot, CcError> {
        if !self.accepting_new {
            return Err(CcError::Draining);
        }
        if presenter.trim().is_empty() {
            return Err(CcError::MissingParameter(
                "presenter name is required".to_string(),
            ));
        }
        if self.rooms.len() >= self.settings.max_rooms {
            warn!(
                target: "cc.actor.directory",
                room_count = self.rooms.len(),
                "Room limit reached"
            );
            return Err(CcError::RoomLimitReached);
        }

        let code = self.unused_code()?;
        let (handle, task_handle) = RoomActor::spawn(
            code.clone(),
            presenter,
            self.settings.room.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );
        let snapshot = handle.snapshot().await?;

        self.rooms.insert(
            code.clone(),
            ManagedRoom {
                handle,
                task_handle,
                ended_at: None,
            },
        );
        metrics::record_room_created();
        metrics::set_room_count(self.rooms.len());

        info!(
            target: "cc.actor.directory",
            room = %code,
            total_rooms = self.rooms.len(),
            "Room created"
        );

        Ok(snapshot)
    }

    fn unused_code(&self) -> Result<RoomCode, CcError> {
        for _ in 0..CODE_ATTEMPTS {
            let code = generate_code(&self.rng)?;
            if !self.rooms.contains_key(&code) {
                return Ok(code);
            }
            debug!(target: "cc.actor.directory", "Room code collision, retrying");
        }
        Err(CcError::Internal(
            "could not find an unused room code".to_string(),
        ))
    }

    async fn end_room(&mut self, code: &RoomCode) -> Result<(), CcError> {
        let managed = self.rooms.get_mut(code).ok_or(CcError::RoomNotFound)?;

        if managed.handle.end().await? {
            metrics::record_room_ended();
            info!(target: "cc.actor.directory", room = %code, "Room ended");
        }
        if managed.ended_at.is_none() {
            managed.ended_at = Some(Instant::now());
        }
        Ok(())
    }

    async fn end_idle_rooms(&mut self) {
        let timeout = self.settings.idle_room_timeout;
        let mut idle = Vec::new();

        for (code, managed) in &self.rooms {
            if managed.ended_at.is_some() {
                continue;
            }
            match managed.handle.idle_since().await {
                Ok(Some(since)) if since.elapsed() >= timeout => idle.push(code.clone()),
                Ok(_) => {}
                Err(e) => {
                    debug!(target: "cc.actor.directory", room = %code, error = %e, "Idle check failed");
                }
            }
        }

        for code in idle {
            info!(
                target: "cc.actor.directory",
                room = %code,
                idle_timeout_seconds = timeout.as_secs(),
                "Ending idle room"
            );
            if let Err(e) = self.end_room(&code).await {
                warn!(target: "cc.actor.directory", room = %code, error = %e, "Failed to end idle room");
            }
        }
    }

    fn evict_ended_rooms(&mut self) {
        let retention = self.settings.ended_room_retention;
        let expired: Vec<RoomCode> = self
            .rooms
            .iter()
            .filter(|(_, managed)| {
                managed
                    .ended_at
                    .is_some_and(|ended_at| ended_at.elapsed() >= retention)
            })
            .map(|(code, _)| code.clone())
            .collect();

        for code in expired {
            self.remove_room(&code);
        }
    }

    /// Cancel a room without blocking the message loop on its exit.
    fn remove_room(&mut self, code: &RoomCode) {
        let Some(managed) = self.rooms.remove(code) else {
            return;
        };

        managed.handle.cancel();

        let code_owned = code.clone();
        self.settings.room.appends.spawn(async move {
            match tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "cc.actor.directory",
                        room = %code_owned,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "cc.actor.directory",
                        room = %code_owned,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "cc.actor.directory",
                        room = %code_owned,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });

        metrics::set_room_count(self.rooms.len());

        info!(
            target: "cc.actor.directory",
            room = %code,
            total_rooms = self.rooms.len(),
            "Room evicted"
        );
    }

    fn get_status(&self) -> DirectoryStatus {
        DirectoryStatus {
            room_count: self.rooms.len(),
            member_count: self.metrics.member_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
            peak_mailbox_depth: self.mailbox.peak_depth(),
            mailbox_level: self.mailbox.current_level(),
            pending_appends: self.settings.room.appends.len(),
        }
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "cc.actor.directory",
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (code, managed) in self.rooms.drain() {
            match tokio::time::timeout(Duration::from_secs(30), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(target: "cc.actor.directory", room = %code, "Room actor completed cleanly");
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "cc.actor.directory",
                        room = %code,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(target: "cc.actor.directory", room = %code, "Room actor shutdown timed out");
                }
            }
        }
        metrics::set_room_count(0);

        let appends = &self.settings.room.appends;
        appends.close();
        if tokio::time::timeout(APPEND_DRAIN_TIMEOUT, appends.wait())
            .await
            .is_err()
        {
            warn!(
                target: "cc.actor.directory",
                pending = appends.len(),
                "Log appends still in flight at shutdown"
            );
        }

        info!(target: "cc.actor.directory", "Graceful shutdown complete");
    }

    /// Drop rooms whose actor task has finished on its own.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomCode> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(code, _)| code.clone())
            .collect();

        for code in finished {
            let Some(managed) = self.rooms.remove(&code) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    info!(target: "cc.actor.directory", room = %code, "Room actor exited");
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "cc.actor.directory",
                            room = %code,
                            error = ?join_error,
                            "Room actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }

            metrics::set_room_count(self.rooms.len());
        }
    }
}

/// Draw a room code from the system CSPRNG.
fn generate_code(rng: &SystemRandom) -> Result<RoomCode, CcError> {
    let mut code = String::with_capacity(ROOM_CODE_LENGTH);
    let mut buf = [0u8; 16];

    while code.len() < ROOM_CODE_LENGTH {
        rng.fill(&mut buf)
            .map_err(|_| CcError::Internal("system RNG failure".to_string()))?;

        for byte in buf.iter().filter(|b| **b < UNBIASED_BYTE_LIMIT) {
            if code.len() == ROOM_CODE_LENGTH {
                break;
            }
            let index = usize::from(*byte) % ROOM_CODE_ALPHABET.len();
            if let Some(c) = ROOM_CODE_ALPHABET.get(index) {
                code.push(char::from(*c));
            }
        }
    }

    code.parse()
        .map_err(|e| CcError::Internal(format!("generated invalid room code: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::metrics::MailboxLevel;
    use crate::presenter::voice::VoiceSettings;
    use crate::store::{InMemoryActivityLog, RetryPolicy};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn settings(max_rooms: usize) -> DirectorySettings {
        DirectorySettings {
            max_rooms,
            ended_room_retention: Duration::from_secs(60),
            idle_room_timeout: Duration::from_secs(600),
            room: RoomSettings {
                round_duration: Duration::from_secs(30),
                voice: VoiceSettings {
                    trigger_phrase: "ask the question".to_string(),
                    cooldown: Duration::from_secs(3),
                    restart_delay: Duration::from_millis(500),
                },
                log: Arc::new(InMemoryActivityLog::new()),
                retry: RetryPolicy::default(),
                appends: TaskTracker::new(),
            },
        }
    }

    fn directory(max_rooms: usize) -> RoomDirectoryActorHandle {
        RoomDirectoryActorHandle::new(settings(max_rooms), ActorMetrics::new())
    }

    #[test]
    fn test_generated_codes_are_valid_and_randomized() {
        let rng = SystemRandom::new();
        let codes: HashSet<RoomCode> = (0..100).map(|_| generate_code(&rng).unwrap()).collect();

        // 36^6 possibilities; 100 draws colliding would point at a broken RNG.
        assert!(codes.len() > 95);
        for code in &codes {
            assert_eq!(code.as_str().len(), ROOM_CODE_LENGTH);
            assert!(code
                .as_str()
                .bytes()
                .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()));
        }
    }

    #[tokio::test]
    async fn test_create_and_join_room() {
        let directory = directory(10);
        let room = directory.create_room("Ms. Rao".to_string()).await.unwrap();
        assert_eq!(room.presenter, "Ms. Rao");

        let membership = directory
            .join(room.code.clone(), Participant::viewer("Priya", Some("21CS042")))
            .await
            .unwrap();
        assert_eq!(membership.participant.identity, "Priya (21CS042)");

        let status = directory.get_status().await.unwrap();
        assert_eq!(status.room_count, 1);
        assert_eq!(status.member_count, 1);
        assert!(!status.is_draining);
        assert!(status.peak_mailbox_depth >= 1);
        assert_eq!(status.mailbox_level, MailboxLevel::Normal);
        assert_eq!(status.pending_appends, 0);

        directory.cancel();
    }

    #[tokio::test]
    async fn test_join_unknown_room() {
        let directory = directory(10);
        let result = directory
            .join("ZZZZZZ".parse().unwrap(), Participant::viewer("Priya", None))
            .await;
        assert!(matches!(result, Err(CcError::RoomNotFound)));
        directory.cancel();
    }

    #[tokio::test]
    async fn test_end_room_is_idempotent_and_blocks_joins() {
        let directory = directory(10);
        let room = directory.create_room("Ms. Rao".to_string()).await.unwrap();

        directory.end_room(room.code.clone()).await.unwrap();
        directory.end_room(room.code.clone()).await.unwrap();

        let result = directory
            .join(room.code.clone(), Participant::viewer("Priya", None))
            .await;
        assert!(matches!(result, Err(CcError::RoomNotFound)));

        // Still addressable for reporting until evicted.
        let handle = directory.get_room(room.code.clone()).await.unwrap();
        assert_eq!(handle.code(), &room.code);

        assert!(matches!(
            directory.end_room("ZZZZZZ".parse().unwrap()).await,
            Err(CcError::RoomNotFound)
        ));
        directory.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_rooms_are_evicted_after_retention() {
        let directory = directory(10);
        let ended = directory.create_room("Ms. Rao".to_string()).await.unwrap();
        let live = directory.create_room("Mr. Iyer".to_string()).await.unwrap();
        directory.end_room(ended.code.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(95)).await;

        assert!(matches!(
            directory.get_room(ended.code).await,
            Err(CcError::RoomNotFound)
        ));
        assert!(directory.get_room(live.code).await.is_ok());
        directory.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_rooms_release_capacity() {
        let directory = directory(2);
        let setup = directory.create_room("Ms. Rao".to_string()).await.unwrap();
        let live = directory.create_room("Mr. Iyer".to_string()).await.unwrap();
        directory
            .get_room(live.code.clone())
            .await
            .unwrap()
            .start()
            .await
            .unwrap();

        assert!(matches!(
            directory.create_room("Ms. Das".to_string()).await,
            Err(CcError::RoomLimitReached)
        ));

        // Idle timeout (600 s) plus retention (60 s) plus two sweeps.
        tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;

        assert!(matches!(
            directory.get_room(setup.code).await,
            Err(CcError::RoomNotFound)
        ));
        assert!(matches!(
            directory.get_room(live.code).await,
            Err(CcError::RoomNotFound)
        ));
        assert_eq!(directory.get_status().await.unwrap().room_count, 0);
        directory.create_room("Ms. Das".to_string()).await.unwrap();
        directory.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rooms_in_use_are_not_ended() {
        let directory = directory(10);
        let room = directory.create_room("Ms. Rao".to_string()).await.unwrap();
        let handle = directory.get_room(room.code.clone()).await.unwrap();
        handle.start().await.unwrap();
        let _priya = directory
            .join(room.code.clone(), Participant::viewer("Priya", None))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.status, crate::actors::RoomStatus::Live);
        assert_eq!(snapshot.member_count, 1);
        directory.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_room_idles_after_last_member_leaves() {
        let directory = directory(10);
        let room = directory.create_room("Ms. Rao".to_string()).await.unwrap();
        let handle = directory.get_room(room.code.clone()).await.unwrap();
        handle.start().await.unwrap();
        assert!(handle.idle_since().await.unwrap().is_some());

        let priya = directory
            .join(room.code.clone(), Participant::viewer("Priya", None))
            .await
            .unwrap();
        assert!(handle.idle_since().await.unwrap().is_none());

        priya.subscription.unsubscribe().await.unwrap();
        assert!(handle.idle_since().await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(700)).await;
        assert_eq!(
            handle.snapshot().await.unwrap().status,
            crate::actors::RoomStatus::Ended
        );
        directory.cancel();
    }

    #[tokio::test]
    async fn test_room_limit() {
        let directory = directory(1);
        directory.create_room("Ms. Rao".to_string()).await.unwrap();
        assert!(matches!(
            directory.create_room("Mr. Iyer".to_string()).await,
            Err(CcError::RoomLimitReached)
        ));
        directory.cancel();
    }

    #[tokio::test]
    async fn test_blank_presenter_rejected() {
        let directory = directory(10);
        assert!(matches!(
            directory.create_room("   ".to_string()).await,
            Err(CcError::MissingParameter(_))
        ));
        directory.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_rooms() {
        let directory = directory(10);
        let room = directory.create_room("Ms. Rao".to_string()).await.unwrap();
        let handle = directory.get_room(room.code).await.unwrap();

        directory.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(directory.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_pending_appends() {
        let directory = directory(10);
        let written = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&written);
        directory.appends().spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(directory.get_status().await.unwrap().pending_appends, 1);

        directory.shutdown().await.unwrap();
        assert!(written.load(Ordering::SeqCst));
        assert!(directory.appends().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_gives_up_on_stuck_appends() {
        let directory = directory(10);
        directory
            .appends()
            .spawn(std::future::pending::<()>());

        let started = Instant::now();
        directory.shutdown().await.unwrap();
        assert!(started.elapsed() >= APPEND_DRAIN_TIMEOUT);
        assert_eq!(directory.appends().len(), 1);
    }

    #[tokio::test]
    async fn test_child_token_follows_directory() {
        let directory = directory(10);
        let child = directory.child_token();
        assert!(!child.is_cancelled());

        directory.cancel();
        assert!(child.is_cancelled());
    }
}
