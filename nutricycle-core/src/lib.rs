pub mod error;
pub mod detection;
pub mod event;
pub mod command;
pub mod announce;
pub mod queue;

pub use error::{Error, Result};
pub use detection::{BoundingBox, ClassTable, Detection};
pub use event::{unix_seconds, AlertMessage, DetectionEvent, EventMessage};
pub use command::{CommandKind, ControlCommand, ControlRequest};
pub use announce::AnnouncePayload;
pub use queue::{EnqueueOutcome, EventQueue, DEFAULT_QUEUE_CAPACITY};
