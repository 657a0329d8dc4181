//! `GET /api/v1/rooms/{code}/ws?token=`
//!
//! Event Bus transport. Each connection is one room membership: outbound
//! envelopes are written as JSON text frames, and inbound frames are decoded
//! and routed by type.
//!
//! Inbound routing:
//! - `FOCUS_LOST` / `FOCUS_GAINED` from a viewer go through that viewer's
//!   Focus Tracker, which publishes and logs them under the credential's
//!   identity. From a presenter they are dropped.
//! - `HAND_RAISE` is republished with the `user` field replaced by the
//!   credential's identity.
//! - `QUIZ_START` is accepted from the presenter only.
//! - Anything that does not decode is dropped.

use super::{authorize_room, parse_code};
use crate::actors::{Membership, Participant};
use crate::bus::{BusMessage, DataPublisher, Subscription};
use crate::errors::CcError;
use crate::routes::AppState;
use crate::viewer::{FocusTracker, FocusWorkers};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use common::types::{Capability, FocusKind, ParticipantRole, RoomCode};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How long a closing connection waits for its focus rows to be written.
const FOCUS_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

/// Handler for GET /api/v1/rooms/{code}/ws
///
/// The credential is checked and the room joined before the upgrade, so a
/// bad token or an Ended room fails with a normal JSON error.
///
/// - 101 Switching Protocols: joined
/// - 401 Unauthorized: missing or invalid credential
/// - 403 Forbidden: credential is for another room
/// - 404 Not Found: unknown or Ended room
#[instrument(skip_all, name = "cc.ws.connect")]
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, CcError> {
    let code = parse_code(&code)?;
    let token = query
        .token
        .ok_or_else(|| CcError::InvalidToken("Missing token".to_string()))?;

    let claims = state.issuer.verify(&token)?;
    authorize_room(&claims, &code)?;
    if !claims.has_capability(Capability::PublishData) {
        return Err(CcError::PermissionDenied(
            "Credential cannot use the room bus".to_string(),
        ));
    }

    let participant = Participant {
        identity: claims.sub,
        role: claims.role,
    };
    let membership = state.directory.join(code.clone(), participant).await?;

    Ok(ws.on_upgrade(move |socket| run_session(socket, state, code, membership)))
}

async fn run_session(
    socket: WebSocket,
    state: Arc<AppState>,
    code: RoomCode,
    membership: Membership,
) {
    let Membership {
        participant,
        mut subscription,
        publisher,
    } = membership;

    info!(
        target: "cc.ws",
        room = %code,
        identity = publisher.sender(),
        role = participant.role.as_str(),
        member_id = %subscription.member_id(),
        "Bus connection opened"
    );

    let publisher: Arc<dyn DataPublisher> = Arc::new(publisher);
    let mut focus = (participant.role == ParticipantRole::Viewer).then(|| {
        FocusTracker::spawn(
            code.clone(),
            participant.identity.clone(),
            Arc::clone(&publisher),
            Arc::clone(&state.log),
            state.retry,
            state.directory.appends(),
        )
    });

    let (mut outbound, mut inbound) = socket.split();

    loop {
        tokio::select! {
            envelope = subscription.recv() => {
                let Some(envelope) = envelope else {
                    debug!(target: "cc.ws", room = %code, "Room closed the subscription");
                    break;
                };
                let text = match serde_json::to_string(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(target: "cc.ws", error = %e, "Failed to encode envelope");
                        continue;
                    }
                };
                if outbound.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    route_inbound(
                        text.as_bytes(),
                        &participant,
                        focus.as_mut().map(|(tracker, _)| tracker),
                        publisher.as_ref(),
                    )
                    .await;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    route_inbound(
                        &bytes,
                        &participant,
                        focus.as_mut().map(|(tracker, _)| tracker),
                        publisher.as_ref(),
                    )
                    .await;
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    if let Some((tracker, workers)) = focus {
        drain_focus(tracker, workers, &code).await;
    }
    close(subscription, &code).await;
}

/// Close the tracker's queues and wait for its workers to write what is
/// already queued.
async fn drain_focus(tracker: FocusTracker, workers: FocusWorkers, code: &RoomCode) {
    let participant = tracker.participant().to_owned();
    drop(tracker);

    let drained = tokio::time::timeout(FOCUS_DRAIN_TIMEOUT, async {
        let _ = workers.bus.await;
        let _ = workers.log.await;
    })
    .await;
    if drained.is_err() {
        // The workers keep running on the directory's tracker.
        warn!(target: "cc.ws", room = %code, participant = %participant, "Focus log still draining after disconnect");
    } else {
        debug!(target: "cc.ws", room = %code, participant = %participant, "Focus log drained");
    }
}

async fn close(subscription: Subscription, code: &RoomCode) {
    let member_id = subscription.member_id();
    if let Err(e) = subscription.unsubscribe().await {
        debug!(target: "cc.ws", room = %code, error = %e, "Room already gone on unsubscribe");
    }
    info!(target: "cc.ws", room = %code, member_id = %member_id, "Bus connection closed");
}

async fn route_inbound(
    payload: &[u8],
    participant: &Participant,
    tracker: Option<&mut FocusTracker>,
    publisher: &dyn DataPublisher,
) {
    let message = match BusMessage::decode(payload) {
        Ok(message) => message,
        Err(e) => {
            debug!(target: "cc.ws", sender = %participant.identity, error = %e, "Dropping malformed frame");
            return;
        }
    };

    let outgoing = match message {
        BusMessage::FocusLost { .. } | BusMessage::FocusGained { .. } => {
            if let Some(tracker) = tracker {
                let kind = if matches!(message, BusMessage::FocusLost { .. }) {
                    FocusKind::Lost
                } else {
                    FocusKind::Gained
                };
                tracker.observe(kind);
            }
            return;
        }
        BusMessage::HandRaise { status, .. } => BusMessage::HandRaise {
            user: participant.identity.clone(),
            status,
        },
        BusMessage::QuizStart { .. } if participant.role != ParticipantRole::Presenter => {
            debug!(target: "cc.ws", sender = %participant.identity, "Dropping QUIZ_START from viewer");
            return;
        }
        BusMessage::QuizStart { .. } => message,
    };

    if let Err(e) = publisher.publish(&outgoing).await {
        warn!(target: "cc.ws", kind = outgoing.kind(), error = %e, "Bus publish failed");
    }
}
