//! Common data types for classroom components.

use crate::error::ClassroomError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of characters in a room code.
pub const ROOM_CODE_LENGTH: usize = 6;

/// Alphabet room codes are drawn from.
pub const ROOM_CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Short, human-typeable identifier for a live room.
///
/// Always six characters from `[0-9A-Z]`. Parsing upper-cases and trims the
/// input so codes read aloud or typed in lowercase still resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Borrow the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomCode {
    type Err = ClassroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        let valid = normalized.len() == ROOM_CODE_LENGTH
            && normalized.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b));

        if valid {
            Ok(Self(normalized))
        } else {
            Err(ClassroomError::InvalidRoomCode(s.to_string()))
        }
    }
}

impl TryFrom<String> for RoomCode {
    type Error = ClassroomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scoped permission carried by a room credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Join the room.
    Join,
    /// Publish audio/video tracks.
    PublishMedia,
    /// Subscribe to other participants' tracks.
    SubscribeMedia,
    /// Publish data-channel messages (quiz, focus, hand-raise).
    PublishData,
}

impl Capability {
    /// Returns the capability as it appears in a credential.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Capability::Join => "join",
            Capability::PublishMedia => "publish-media",
            Capability::SubscribeMedia => "subscribe-media",
            Capability::PublishData => "publish-data",
        }
    }
}

const PRESENTER_CAPABILITIES: &[Capability] = &[
    Capability::Join,
    Capability::PublishMedia,
    Capability::SubscribeMedia,
    Capability::PublishData,
];

// Viewers receive media only. They still emit focus and hand-raise data.
const VIEWER_CAPABILITIES: &[Capability] = &[
    Capability::Join,
    Capability::SubscribeMedia,
    Capability::PublishData,
];

/// Participant role within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// The teacher running the session. Exactly one per room.
    Presenter,
    /// A student watching the session.
    Viewer,
}

impl ParticipantRole {
    /// Returns the role as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Presenter => "presenter",
            ParticipantRole::Viewer => "viewer",
        }
    }

    /// Capabilities granted to this role.
    #[must_use]
    pub const fn capabilities(&self) -> &'static [Capability] {
        match self {
            ParticipantRole::Presenter => PRESENTER_CAPABILITIES,
            ParticipantRole::Viewer => VIEWER_CAPABILITIES,
        }
    }
}

impl FromStr for ParticipantRole {
    type Err = ClassroomError;

    /// Accepts `presenter`/`teacher` and `viewer`/`student`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "presenter" | "teacher" => Ok(ParticipantRole::Presenter),
            "viewer" | "student" => Ok(ParticipantRole::Viewer),
            _ => Err(ClassroomError::UnknownRole(s.to_string())),
        }
    }
}

/// Attention transition reported by a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FocusKind {
    /// The viewer switched away from the session.
    #[serde(rename = "FOCUS_LOST")]
    Lost,
    /// The viewer came back.
    #[serde(rename = "FOCUS_GAINED")]
    Gained,
}

impl FocusKind {
    /// Wire and storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            FocusKind::Lost => "FOCUS_LOST",
            FocusKind::Gained => "FOCUS_GAINED",
        }
    }
}

impl FromStr for FocusKind {
    type Err = ClassroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FOCUS_LOST" => Ok(FocusKind::Lost),
            "FOCUS_GAINED" => Ok(FocusKind::Gained),
            other => Err(ClassroomError::UnknownFocusKind(other.to_string())),
        }
    }
}
