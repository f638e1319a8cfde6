//! Wire codec for the chat socket.
//!
//! Every frame is a JSON text message carrying a `type` discriminator. Inbound
//! payloads are decoded against a closed set of kinds; anything else is a
//! [`DecodeError`], never a new variant.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Message reported when the server sends an `error` frame without one.
pub const DEFAULT_SERVER_ERROR_MESSAGE: &str = "Server error";

/// A decoded inbound frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Incremental piece of the assistant response
    Content {
        /// Text to append to the streaming buffer
        text: String,
    },
    /// The current assistant response is finished
    Complete,
    /// Server-side connection status (e.g. `connected`)
    ConnectionStatus {
        /// Raw status string reported by the server
        status: String,
    },
    /// Reply to an outgoing heartbeat
    HeartbeatAck {
        /// Echo of the heartbeat timestamp, when the server includes it
        timestamp: Option<i64>,
    },
    /// Failure reported by the backend
    Error {
        /// Human-readable description
        message: String,
        /// Machine-readable code such as `rate_limit`
        code: Option<String>,
        /// Seconds the server asks the client to wait before retrying
        retry_after: Option<u64>,
    },
}

/// An outgoing frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingFrame<'text> {
    /// User chat message
    Message {
        /// Message body
        message: &'text str,
    },
    /// Liveness ping
    Heartbeat {
        /// Unix timestamp in milliseconds
        timestamp: i64,
    },
}

/// Inbound payload that does not match any known frame kind.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub reason: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed frame: {}", self.reason)
    }
}

impl std::error::Error for DecodeError {}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireFrame {
    Content {
        #[serde(default)]
        data: Option<String>,
    },
    Complete,
    ConnectionStatus {
        data: String,
    },
    HeartbeatAck {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Error {
        #[serde(default)]
        data: Option<WireErrorData>,
    },
}

#[derive(Deserialize)]
struct WireErrorData {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    retry_after: Option<u64>,
}

impl From<WireFrame> for Frame {
    fn from(frame: WireFrame) -> Self {
        match frame {
            WireFrame::Content { data } => Frame::Content {
                text: data.unwrap_or_default(),
            },
            WireFrame::Complete => Frame::Complete,
            WireFrame::ConnectionStatus { data } => Frame::ConnectionStatus { status: data },
            WireFrame::HeartbeatAck { timestamp } => Frame::HeartbeatAck { timestamp },
            WireFrame::Error { data } => {
                let data = data.unwrap_or(WireErrorData {
                    message: None,
                    code: None,
                    retry_after: None,
                });
                Frame::Error {
                    message: data
                        .message
                        .unwrap_or_else(|| DEFAULT_SERVER_ERROR_MESSAGE.to_owned()),
                    code: data.code,
                    retry_after: data.retry_after,
                }
            }
        }
    }
}

/// Decode one inbound text payload.
pub fn decode(raw: &str) -> std::result::Result<Frame, DecodeError> {
    serde_json::from_str::<WireFrame>(raw)
        .map(Frame::from)
        .map_err(|e| DecodeError {
            reason: e.to_string(),
        })
}

/// Serialize an outgoing frame to its text form.
pub fn encode(frame: &OutgoingFrame<'_>) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Encode a user chat message: `{"type":"message","message":<text>}`.
pub fn encode_chat(text: &str) -> Result<String> {
    encode(&OutgoingFrame::Message { message: text })
}

/// Encode a heartbeat: `{"type":"heartbeat","timestamp":<epoch-ms>}`.
pub fn encode_heartbeat(timestamp: i64) -> Result<String> {
    encode(&OutgoingFrame::Heartbeat { timestamp })
}
