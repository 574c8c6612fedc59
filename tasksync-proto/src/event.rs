//! Push events delivered over the streaming connection.
//!
//! Each frame is a JSON object with a `type` tag and a `data` payload:
//!
//! ```json
//! {"type": "task_updated", "data": {"id": 7, "title": "...", ...}}
//! {"type": "task_deleted", "data": {"id": 7}}
//! ```
//!
//! [`decode`] separates frames that cannot be read at all from frames that
//! are well formed but carry a type this client does not know, so callers
//! can log the two cases differently.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{Task, TaskId};

/// Event type tags understood by [`decode`].
pub const KNOWN_EVENT_TYPES: [&str; 3] = ["task_created", "task_updated", "task_deleted"];

/// A server-side task change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushEvent {
    /// A task was created.
    #[serde(rename = "task_created")]
    Created(Task),
    /// A task changed; carries the full new record.
    #[serde(rename = "task_updated")]
    Updated(Task),
    /// A task was deleted.
    #[serde(rename = "task_deleted")]
    Deleted {
        /// Identifier of the removed task.
        id: TaskId,
    },
}

impl PushEvent {
    /// Identifier of the task this event is about.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        match self {
            Self::Created(task) | Self::Updated(task) => task.id,
            Self::Deleted { id } => *id,
        }
    }

    /// The wire tag of this event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "task_created",
            Self::Updated(_) => "task_updated",
            Self::Deleted { .. } => "task_deleted",
        }
    }
}

/// Why an inbound frame could not be turned into a [`PushEvent`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not valid JSON, has no `type` tag, or its payload does
    /// not fit the tagged type.
    #[error("malformed push event: {0}")]
    Malformed(String),
    /// The frame is well formed but its `type` is not one we handle.
    #[error("unknown push event type: {0}")]
    UnknownType(String),
}

/// Decodes one inbound frame.
///
/// # Errors
///
/// Returns [`DecodeError::UnknownType`] for an unrecognized `type` tag and
/// [`DecodeError::Malformed`] for everything else that fails.
pub fn decode(frame: &[u8]) -> Result<PushEvent, DecodeError> {
    let value: Value =
        serde_json::from_slice(frame).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::Malformed("missing string field `type`".to_string()))?;
    if !KNOWN_EVENT_TYPES.contains(&kind) {
        return Err(DecodeError::UnknownType(kind.to_string()));
    }
    serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Encodes an event as a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &PushEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
