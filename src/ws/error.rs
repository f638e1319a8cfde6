#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use super::codec::DecodeError;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// No `open` event within the connect timeout
    ConnectTimeout(Duration),
    /// Connection attempt failed before the socket opened
    ConnectFailed {
        /// Transport or handshake failure description
        reason: String,
    },
    /// Socket closed with anything other than a clean normal closure
    AbnormalClosure {
        /// Close code, if the peer sent one
        code: Option<u16>,
    },
    /// Received a frame that does not match the protocol
    Decode(DecodeError),
    /// The backend reported a failure
    Server {
        /// Human-readable description
        message: String,
        /// Machine-readable code, if any
        code: Option<String>,
    },
    /// Reconnection gave up after the configured number of attempts
    MaxRetriesExceeded {
        /// Number of reconnection attempts made
        attempts: u32,
    },
    /// Operation requires an open connection
    NotConnected,
    /// WebSocket connection was closed
    ConnectionClosed,
    /// Subscription stream lagged and missed messages
    Lagged {
        /// Number of messages that were missed
        count: u64,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::ConnectTimeout(after) => write!(f, "Connection timeout after {after:?}"),
            Self::ConnectFailed { reason } => write!(f, "Unable to connect: {reason}"),
            Self::AbnormalClosure { code: Some(code) } => {
                write!(f, "Connection closed abnormally: {code}")
            }
            Self::AbnormalClosure { code: None } => {
                write!(f, "Connection closed abnormally without a close frame")
            }
            Self::Decode(e) => write!(f, "Failed to parse WebSocket message: {e}"),
            Self::Server { message, .. } => write!(f, "Server error: {message}"),
            Self::MaxRetriesExceeded { attempts } => {
                write!(f, "Connection lost - max retries reached ({attempts})")
            }
            Self::NotConnected => write!(f, "Not connected - call connect() first"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Lagged { count } => write!(f, "Subscription lagged, missed {count} messages"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

/// Failure published on the event feed.
///
/// Unlike [`WsError`] this is cheap to clone, so every subscriber receives its own copy.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Inbound frame could not be decoded; the connection stays open
    Decode(DecodeError),
    /// The backend reported a failure
    Server {
        message: String,
        code: Option<String>,
        retry_after: Option<u64>,
    },
    /// Reconnection is exhausted; only an explicit `connect` starts over
    MaxRetriesExceeded { attempts: u32 },
    /// This subscriber fell behind and events were dropped
    Lagged { count: u64 },
}

impl StreamError {
    /// Whether the connection has terminally failed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::MaxRetriesExceeded { .. })
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "{e}"),
            Self::Server { message, .. } => write!(f, "{message}"),
            Self::MaxRetriesExceeded { attempts } => {
                write!(f, "Connection lost - max retries reached ({attempts})")
            }
            Self::Lagged { count } => write!(f, "Event feed lagged, missed {count} events"),
        }
    }
}

impl StdError for StreamError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StreamError> for WsError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Decode(e) => Self::Decode(e),
            StreamError::Server { message, code, .. } => Self::Server { message, code },
            StreamError::MaxRetriesExceeded { attempts } => Self::MaxRetriesExceeded { attempts },
            StreamError::Lagged { count } => Self::Lagged { count },
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<StreamError> for crate::error::Error {
    fn from(e: StreamError) -> Self {
        WsError::from(e).into()
    }
}

impl From<DecodeError> for crate::error::Error {
    fn from(e: DecodeError) -> Self {
        WsError::Decode(e).into()
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}
