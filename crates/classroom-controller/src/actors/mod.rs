//! Actor hierarchy for the Classroom Controller.
//!
//! ```text
//! RoomDirectoryActor (singleton)
//! └── supervises N RoomActors
//!     └── RoomActor (one per room)
//!         ├── owns membership and the bus fan-out
//!         ├── QuizActor (while Live)
//!         └── VoiceTrigger (while Live)
//! ```
//!
//! Parent actors hand child `CancellationToken`s to everything they spawn,
//! so cancelling the directory stops every room and every presenter task.
//!
//! # Modules
//!
//! - [`directory`] - `RoomDirectoryActor`, code generation, eviction
//! - [`room`] - `RoomActor`, membership and publish fan-out
//! - [`messages`] - Message and value types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod directory;
pub mod messages;
pub mod metrics;
pub mod room;

pub use directory::{DirectorySettings, RoomDirectoryActor, RoomDirectoryActorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, MailboxMonitor};
pub use room::{RoomActor, RoomActorHandle};
