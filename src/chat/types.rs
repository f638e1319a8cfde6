use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ws::StreamError;

/// Author of a [`Message`].
#[non_exhaustive]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// An entry in a conversation's message log.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Time-ordered unique id
    pub id: Uuid,
    pub conversation_id: String,
    /// Strictly increasing within one session controller, starting at 1
    #[serde(rename = "conversation_sequence")]
    pub sequence: u64,
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub(crate) fn new(
        conversation_id: String,
        sequence: u64,
        content: String,
        sender: Sender,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            conversation_id,
            sequence,
            content,
            sender,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_from_user(&self) -> bool {
        self.sender == Sender::User
    }
}

/// The assistant response currently being streamed. At most one exists per session.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingMessage {
    pub conversation_id: String,
    /// Concatenation of every chunk received so far, in arrival order
    pub content: String,
    pub is_complete: bool,
}

impl StreamingMessage {
    pub(crate) fn new(conversation_id: String) -> Self {
        Self {
            conversation_id,
            content: String::new(),
            is_complete: false,
        }
    }
}

/// Connection status as seen by a session.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Retrying after an unexpected disconnect
    Reconnecting { attempt: u32 },
    /// Reconnection gave up; only an explicit `connect` starts over
    Failed,
}

/// What changed after folding one event into the session.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Streaming buffer after appending a chunk
    Streaming { content: String },
    /// The streamed response was appended to the log
    Finalized(Message),
    /// Completion arrived with nothing worth keeping
    Discarded,
    /// Status reported by the server
    Status(String),
    /// The in-progress response (if any) was dropped
    Error(StreamError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_round_trips_lowercase() {
        assert_eq!(Sender::Assistant.to_string(), "assistant");
        assert_eq!("user".parse::<Sender>().unwrap(), Sender::User);
    }

    #[test]
    fn message_serializes_with_wire_names() {
        let message = Message::new("c1".to_owned(), 1, "Hi".to_owned(), Sender::User);
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["conversation_sequence"], 1);
        assert_eq!(value["sender"], "user");
        assert_eq!(value["conversation_id"], "c1");
        assert!(message.is_from_user());
    }
}
