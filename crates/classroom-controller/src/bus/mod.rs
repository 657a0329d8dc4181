//! In-room event bus.
//!
//! Every room member holds a [`Subscription`] backed by an unbounded queue
//! filled by the room actor. Publishes go through the room mailbox, so one
//! sender's messages reach every receiver in the order they were sent.
//! Payloads travel as opaque bytes; receivers decode them and silently drop
//! anything they cannot parse.

use crate::actors::room::RoomActorHandle;
use crate::errors::CcError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Typed message carried on the bus. Field names are the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BusMessage {
    #[serde(rename = "QUIZ_START")]
    QuizStart {
        question: String,
        answer: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        options: Vec<String>,
        /// Unix milliseconds.
        timestamp: i64,
    },

    #[serde(rename = "FOCUS_LOST")]
    FocusLost {
        user: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    #[serde(rename = "FOCUS_GAINED")]
    FocusGained {
        user: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    #[serde(rename = "HAND_RAISE")]
    HandRaise { user: String, status: bool },
}

impl BusMessage {
    /// Wire name of the message type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            BusMessage::QuizStart { .. } => "QUIZ_START",
            BusMessage::FocusLost { .. } => "FOCUS_LOST",
            BusMessage::FocusGained { .. } => "FOCUS_GAINED",
            BusMessage::HandRaise { .. } => "HAND_RAISE",
        }
    }

    /// Serialize to the bytes handed to `publish_data`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if serialization fails.
    pub fn encode(&self) -> Result<Bytes, CcError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| CcError::Internal(format!("bus message encode failed: {e}")))
    }

    /// Parse bytes received from the bus.
    ///
    /// # Errors
    ///
    /// Returns `MalformedMessage` for non-JSON input or an unknown `type`.
    pub fn decode(payload: &[u8]) -> Result<Self, CcError> {
        serde_json::from_slice(payload).map_err(|e| CcError::MalformedMessage(e.to_string()))
    }
}

/// Raw frame queued to a member by the room actor.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sender: String,
    pub sent_at: DateTime<Utc>,
    pub payload: Bytes,
}

/// Decoded message with its transport metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// Identity of the publishing participant.
    pub sender: String,
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub message: BusMessage,
}

/// Receiving side of a room membership.
///
/// Dropping a subscription without calling [`Subscription::unsubscribe`]
/// is safe: the room prunes closed queues on its next fan-out.
#[derive(Debug)]
pub struct Subscription {
    member_id: Uuid,
    receiver: mpsc::UnboundedReceiver<Frame>,
    room: RoomActorHandle,
}

impl Subscription {
    pub(crate) fn new(
        member_id: Uuid,
        receiver: mpsc::UnboundedReceiver<Frame>,
        room: RoomActorHandle,
    ) -> Self {
        Self {
            member_id,
            receiver,
            room,
        }
    }

    #[must_use]
    pub fn member_id(&self) -> Uuid {
        self.member_id
    }

    /// Next decoded message. Returns `None` once the room has ended or
    /// removed this member.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let frame = self.receiver.recv().await?;
            match BusMessage::decode(&frame.payload) {
                Ok(message) => {
                    return Some(Envelope {
                        sender: frame.sender,
                        sent_at: frame.sent_at,
                        message,
                    });
                }
                Err(e) => {
                    debug!(
                        target: "cc.bus",
                        member_id = %self.member_id,
                        sender = %frame.sender,
                        error = %e,
                        "Dropping malformed bus payload"
                    );
                }
            }
        }
    }

    /// Leave the room explicitly.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the room actor is gone.
    pub async fn unsubscribe(self) -> Result<(), CcError> {
        self.room.leave(self.member_id).await
    }
}

/// Publish side of the transport.
#[async_trait]
pub trait DataPublisher: Send + Sync {
    /// Publish raw bytes reliably to every other room member.
    async fn publish_data(&self, payload: Bytes) -> Result<(), CcError>;

    /// Encode and publish a typed message.
    async fn publish(&self, message: &BusMessage) -> Result<(), CcError> {
        crate::observability::metrics::record_bus_message(message.kind());
        self.publish_data(message.encode()?).await
    }
}

/// Publishes into a room on behalf of one identity.
#[derive(Debug, Clone)]
pub struct RoomPublisher {
    room: RoomActorHandle,
    sender: String,
    /// Excluded from its own fan-out. `None` for server-side publishes.
    member_id: Option<Uuid>,
}

impl RoomPublisher {
    pub(crate) fn new(room: RoomActorHandle, sender: String, member_id: Option<Uuid>) -> Self {
        Self {
            room,
            sender,
            member_id,
        }
    }

    /// Identity stamped on published frames.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }
}

#[async_trait]
impl DataPublisher for RoomPublisher {
    async fn publish_data(&self, payload: Bytes) -> Result<(), CcError> {
        self.room
            .publish(self.member_id, self.sender.clone(), payload)
            .await
    }
}

/// Mock publisher for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Records every published payload.
    #[derive(Debug, Default)]
    pub struct RecordingPublisher {
        published: Mutex<Vec<Bytes>>,
        call_count: AtomicUsize,
        fail: bool,
    }

    impl RecordingPublisher {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Publisher whose every call fails with `Transport`.
        #[must_use]
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        #[must_use]
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Successfully published messages, decoded, in publish order.
        pub async fn messages(&self) -> Vec<BusMessage> {
            self.published
                .lock()
                .await
                .iter()
                .filter_map(|p| BusMessage::decode(p).ok())
                .collect()
        }
    }

    #[async_trait]
    impl DataPublisher for RecordingPublisher {
        async fn publish_data(&self, payload: Bytes) -> Result<(), CcError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CcError::Transport("mock publish failure".to_string()));
            }
            self.published.lock().await.push(payload);
            Ok(())
        }
    }
}
