//! Conversation state on top of a [`ConnectionManager`](crate::ws::ConnectionManager).
//!
//! [`SessionController`] binds one conversation to a shared connection, keeps the ordered
//! message log, accumulates streamed chunks into a single in-progress assistant message and
//! finalizes it on completion.

pub mod error;
pub mod session;
pub mod types;

pub use error::SessionError;
pub use session::SessionController;
pub use types::{Message, Sender, SessionStatus, SessionUpdate, StreamingMessage};
