//! End-to-end classroom flow through the actor layer.
//!
//! A presenter runs a Live room, viewers join the bus, a quiz round is
//! broadcast and answered, attention changes are tracked, and the report is
//! computed from the durable log.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use classroom_controller::actors::{
    ActorMetrics, DirectorySettings, Participant, RoomDirectoryActorHandle, RoomSettings,
};
use classroom_controller::bus::{BusMessage, DataPublisher, Envelope, Subscription};
use classroom_controller::engagement::{score, summarize};
use classroom_controller::errors::CcError;
use classroom_controller::presenter::quiz::TopicDraft;
use classroom_controller::presenter::voice::VoiceSettings;
use classroom_controller::store::{ActivityLog, InMemoryActivityLog, RetryPolicy};
use classroom_controller::viewer::FocusTracker;
use common::types::{FocusKind, RoomCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::task::TaskTracker;

fn directory(log: Arc<dyn ActivityLog>) -> RoomDirectoryActorHandle {
    RoomDirectoryActorHandle::new(
        DirectorySettings {
            max_rooms: 4,
            ended_room_retention: Duration::from_secs(600),
            idle_room_timeout: Duration::from_secs(7200),
            room: RoomSettings {
                round_duration: Duration::from_secs(30),
                voice: VoiceSettings {
                    trigger_phrase: "ask the question".to_string(),
                    cooldown: Duration::from_secs(3),
                    restart_delay: Duration::from_millis(10),
                },
                log,
                retry: RetryPolicy::default(),
                appends: TaskTracker::new(),
            },
        },
        ActorMetrics::new(),
    )
}

fn draft(name: &str, answer: &str) -> TopicDraft {
    TopicDraft {
        name: name.to_string(),
        question: format!("Question about {name}?"),
        answer: answer.to_string(),
        options: vec![answer.to_string(), "Other".to_string()],
        explanation: None,
    }
}

async fn next(subscription: &mut Subscription) -> Envelope {
    timeout(Duration::from_secs(2), subscription.recv())
        .await
        .expect("timed out waiting for bus message")
        .expect("subscription closed")
}

#[tokio::test]
async fn test_full_classroom_session() {
    let log = Arc::new(InMemoryActivityLog::new());
    let directory = directory(log.clone());

    let room = directory.create_room("Ms. Rao".to_string()).await.unwrap();
    let code: RoomCode = room.code.clone();
    let handle = directory.get_room(code.clone()).await.unwrap();
    handle.add_topic(draft("Async JS", "Promise")).await.unwrap();
    handle.add_topic(draft("Closures", "Scope")).await.unwrap();

    let mut presenter = directory
        .join(code.clone(), Participant::presenter("Ms. Rao"))
        .await
        .unwrap();
    let mut priya = directory
        .join(code.clone(), Participant::viewer("Priya", Some("21CS042")))
        .await
        .unwrap();
    let mut arjun = directory
        .join(code.clone(), Participant::viewer("Arjun", None))
        .await
        .unwrap();

    handle.start().await.unwrap();
    let quiz = handle.quiz().await.unwrap();

    // The round reaches every viewer.
    let topic = quiz.trigger_next().await.unwrap();
    assert_eq!(topic.name, "Async JS");
    for viewer in [&mut priya, &mut arjun] {
        let envelope = next(&mut viewer.subscription).await;
        assert_eq!(envelope.sender, "Ms. Rao");
        assert!(matches!(
            envelope.message,
            BusMessage::QuizStart { ref question, .. } if question == "Question about Async JS?"
        ));
    }
    // Server-side publishes reach the presenter's own connection too.
    assert_eq!(next(&mut presenter.subscription).await.message.kind(), "QUIZ_START");

    let outcome = quiz
        .receive_answer(priya.participant.identity.clone(), "promise".to_string())
        .await
        .unwrap();
    assert!(outcome.is_correct);
    let outcome = quiz
        .receive_answer(arjun.participant.identity.clone(), "Callback".to_string())
        .await
        .unwrap();
    assert!(!outcome.is_correct);
    quiz.close(topic.id).await.unwrap();

    // Priya looks away once; her duplicate report is suppressed.
    let priya_publisher: Arc<dyn DataPublisher> = Arc::new(priya.publisher.clone());
    let (mut tracker, workers) = FocusTracker::spawn(
        code.clone(),
        priya.participant.identity.clone(),
        priya_publisher,
        log.clone(),
        RetryPolicy::default(),
        &TaskTracker::new(),
    );
    assert!(tracker.observe(FocusKind::Lost));
    assert!(!tracker.observe(FocusKind::Lost));
    assert!(tracker.observe(FocusKind::Gained));
    drop(tracker);
    workers.bus.await.unwrap();
    workers.log.await.unwrap();

    let lost = next(&mut presenter.subscription).await;
    assert_eq!(lost.sender, "Priya (21CS042)");
    assert!(matches!(lost.message, BusMessage::FocusLost { ref user, .. } if user == "Priya (21CS042)"));
    let gained = next(&mut presenter.subscription).await;
    assert_eq!(gained.message.kind(), "FOCUS_GAINED");

    // Senders never receive their own frames.
    assert!(
        timeout(Duration::from_millis(50), priya.subscription.recv())
            .await
            .is_err()
    );

    directory.end_room(code.clone()).await.unwrap();
    assert!(next_or_closed(&mut arjun.subscription).await);

    // Answer appends are spawned; wait for both rows.
    let mut answers = Vec::new();
    for _ in 0..100 {
        answers = log.answers(&code).await.unwrap();
        if answers.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(answers.len(), 2);

    let events = log.focus_events(&code).await.unwrap();
    let report = summarize(&code, &score(&events, 10), &answers);
    assert_eq!(report.participant_count, 1);
    assert_eq!(report.average_score, 90);
    assert_eq!(report.total_distractions, 1);
    assert_eq!(report.answers_total, 2);
    assert_eq!(report.answers_correct, 1);

    // Ended rooms refuse new members.
    let result = directory
        .join(code, Participant::viewer("Late", None))
        .await;
    assert!(matches!(result, Err(CcError::RoomNotFound)));
}

/// True once the subscription reports the room closed.
async fn next_or_closed(subscription: &mut Subscription) -> bool {
    timeout(Duration::from_secs(2), async {
        while subscription.recv().await.is_some() {}
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_voice_trigger_respects_single_active_topic() {
    let log: Arc<dyn ActivityLog> = Arc::new(InMemoryActivityLog::new());
    let directory = directory(log);

    let room = directory.create_room("Ms. Rao".to_string()).await.unwrap();
    let handle = directory.get_room(room.code.clone()).await.unwrap();
    handle.add_topic(draft("Async JS", "Promise")).await.unwrap();
    handle.add_topic(draft("Closures", "Scope")).await.unwrap();
    handle.start().await.unwrap();

    let quiz = handle.quiz().await.unwrap();
    let manual = quiz.trigger_next().await.unwrap();

    // The voice path hits the same mailbox and is refused while a topic is Active.
    let (_, transcripts) = handle.voice().await.unwrap();
    transcripts.send("please ask the question").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = quiz.state().await.unwrap();
    assert_eq!(state.active_topic, Some(manual.id));
    assert_eq!(
        state
            .topics
            .iter()
            .filter(|t| t.status == classroom_controller::presenter::TopicStatus::Pending)
            .count(),
        1
    );
}
