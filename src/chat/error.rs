#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// Misuse of a [`SessionController`](super::SessionController).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// Message text is empty after trimming
    EmptyMessage,
    /// The connection for this session's conversation is not open
    NotConnected,
    /// No conversation has been bound with `connect`
    NoConversation,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "Message must not be empty"),
            Self::NotConnected => write!(f, "Not connected to the chat server"),
            Self::NoConversation => write!(f, "No conversation selected"),
        }
    }
}

impl StdError for SessionError {}

impl From<SessionError> for crate::error::Error {
    fn from(e: SessionError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Session, e)
    }
}
