#![expect(
    clippy::module_name_repetitions,
    reason = "The controller is named after the session it drives"
)]

use std::time::Instant;

use futures::StreamExt as _;
use futures::stream::BoxStream;
use tokio::sync::watch;

use super::error::SessionError;
use super::types::{Message, Sender, SessionStatus, SessionUpdate, StreamingMessage};
use crate::Result;
use crate::ws::{ConnectionManager, ConnectionState, Envelope, Event, StreamError};

/// Conversation state for one chat screen.
///
/// The controller does not own the connection: it is handed a [`ConnectionManager`] and only
/// reads from it through its event feed. Events are pulled with [`Self::next_update`], or
/// pushed in by the caller with [`Self::apply`], and folded into an ordered message log plus at
/// most one in-progress assistant message.
///
/// # Example
///
/// ```no_run
/// use chat_stream_client::chat::{SessionController, SessionUpdate};
/// use chat_stream_client::ws::{Config, ConnectionManager};
///
/// # async fn example() -> chat_stream_client::Result<()> {
/// let connection = ConnectionManager::new("ws://localhost:8000/ws/chat", Config::default())?;
/// let mut session = SessionController::new(connection);
///
/// session.connect("c1").await?;
/// session.send_message("Hello")?;
///
/// while let Some(update) = session.next_update().await {
///     if let SessionUpdate::Finalized(message) = update {
///         println!("{}", message.content);
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct SessionController {
    connection: ConnectionManager,
    conversation_id: Option<String>,
    events: Option<BoxStream<'static, Envelope>>,
    state: Option<watch::Receiver<ConnectionState>>,
    /// Open time of the socket the current response streams over
    connected_since: Option<Instant>,
    messages: Vec<Message>,
    streaming: Option<StreamingMessage>,
    /// Last sequence number handed out; never reset
    sequence: u64,
    server_status: Option<String>,
    last_error: Option<StreamError>,
}

impl SessionController {
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            conversation_id: None,
            events: None,
            state: None,
            connected_since: None,
            messages: Vec::new(),
            streaming: None,
            sequence: 0,
            server_status: None,
            last_error: None,
        }
    }

    /// Bind the session to `conversation_id` and ask the manager to connect.
    ///
    /// Any previous subscription is dropped before a new one is taken, so the session never
    /// holds two. The new subscription is taken before connecting so nothing published on open
    /// is missed.
    pub async fn connect(&mut self, conversation_id: &str) -> Result<()> {
        if conversation_id.trim().is_empty() {
            return Err(SessionError::NoConversation.into());
        }

        if self.conversation_id.as_deref() != Some(conversation_id) {
            self.streaming = None;
            self.server_status = None;
        }

        self.events = None;
        self.events = Some(self.connection.events().boxed());
        let state = self.connection.state_receiver();
        self.connected_since = match *state.borrow() {
            ConnectionState::Connected { since } => Some(since),
            _ => None,
        };
        self.state = Some(state);
        self.conversation_id = Some(conversation_id.to_owned());
        self.last_error = None;

        #[cfg(feature = "tracing")]
        tracing::debug!(conversation_id, "Session subscribed, connecting");

        self.connection
            .connect(conversation_id)
            .await
            .inspect_err(|e| {
                #[cfg(feature = "tracing")]
                tracing::warn!(conversation_id, error = %e, "Session connect failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            })
    }

    /// Detach from the event feed and close the connection.
    ///
    /// The message log and conversation binding are kept.
    pub fn disconnect(&mut self) {
        self.events = None;
        self.state = None;
        self.connected_since = None;
        self.streaming = None;
        self.server_status = None;
        self.connection.disconnect();
    }

    /// Record a user message and forward it to the server.
    ///
    /// The text is trimmed. Once the checks pass the message is in the log, even if forwarding
    /// then fails.
    pub fn send_message(&mut self, text: &str) -> Result<&Message> {
        let content = text.trim();
        if content.is_empty() {
            return Err(SessionError::EmptyMessage.into());
        }

        if !self.connection.is_connected() {
            return Err(SessionError::NotConnected.into());
        }

        let Some(conversation_id) = self.conversation_id.clone() else {
            return Err(SessionError::NoConversation.into());
        };

        if self.connection.conversation_id().as_deref() != Some(conversation_id.as_str()) {
            return Err(SessionError::NotConnected.into());
        }

        let index = self.messages.len();
        self.append(conversation_id, content.to_owned(), Sender::User);

        self.connection.send(content)?;
        self.last_error = None;

        Ok(&self.messages[index])
    }

    /// Wait for the next event that changes this session and return what changed.
    ///
    /// Returns `None` when the session has no subscription (never connected, or disconnected).
    ///
    /// A partial response is dropped, reported as [`SessionUpdate::Discarded`], once the
    /// connection is seen leaving `Connected` or reopening. Queued events are drained before
    /// state changes.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let events = self.events.as_mut()?;

            let envelope = match self.state.as_mut() {
                Some(state) => tokio::select! {
                    biased;

                    envelope = events.next() => envelope,
                    Ok(()) = state.changed() => {
                        let current = *state.borrow_and_update();
                        if !self.socket_replaced(current) {
                            continue;
                        }

                        if self.streaming.take().is_some() {
                            #[cfg(feature = "tracing")]
                            tracing::debug!("Connection interrupted, dropping partial response");
                            return Some(SessionUpdate::Discarded);
                        }
                        continue;
                    }
                },
                None => events.next().await,
            }?;

            if let Some(update) = self.apply(envelope) {
                return Some(update);
            }
        }
    }

    /// Fold one event into the session.
    ///
    /// Returns `None` for events belonging to another conversation, or when no conversation is
    /// bound.
    pub fn apply(&mut self, envelope: Envelope) -> Option<SessionUpdate> {
        let conversation_id = self.conversation_id.as_deref()?;

        if !envelope.is_for(conversation_id) {
            #[cfg(feature = "tracing")]
            tracing::trace!(
                active = conversation_id,
                stale = ?envelope.conversation_id,
                "Ignoring event for another conversation"
            );
            return None;
        }

        let update = match envelope.event {
            Event::Content(chunk) => {
                let buffer = self
                    .streaming
                    .get_or_insert_with(|| StreamingMessage::new(conversation_id.to_owned()));
                buffer.content.push_str(&chunk);

                SessionUpdate::Streaming {
                    content: buffer.content.clone(),
                }
            }
            Event::Complete => match self.streaming.take() {
                Some(buffer) if !buffer.content.trim().is_empty() => {
                    let message =
                        self.append(buffer.conversation_id, buffer.content, Sender::Assistant);
                    SessionUpdate::Finalized(message.clone())
                }
                _ => SessionUpdate::Discarded,
            },
            Event::ConnectionStatus(status) => {
                self.server_status = Some(status.clone());
                SessionUpdate::Status(status)
            }
            Event::Error(error) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%error, "Dropping in-progress response");

                self.streaming = None;
                self.last_error = Some(error.clone());
                SessionUpdate::Error(error)
            }
        };

        Some(update)
    }

    /// The finalized message log, in append order.
    ///
    /// The log spans every conversation this controller has been connected to; switching
    /// conversations does not clear it. See [`Self::conversation_messages`] for the current one.
    #[must_use]
    pub fn load_messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages of the bound conversation, in append order.
    pub fn conversation_messages(&self) -> impl Iterator<Item = &Message> {
        let conversation_id = self.conversation_id.as_deref();
        self.messages
            .iter()
            .filter(move |message| Some(message.conversation_id.as_str()) == conversation_id)
    }

    /// Empty the log and any in-progress response. Sequence numbering continues.
    pub fn clear_messages(&mut self) {
        self.messages.clear();
        self.streaming = None;
        self.last_error = None;
    }

    #[must_use]
    pub fn streaming_message(&self) -> Option<&StreamingMessage> {
        self.streaming.as_ref()
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    #[must_use]
    pub fn has_messages(&self) -> bool {
        !self.messages.is_empty()
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Most recent error from the event feed, cleared by the next successful send.
    #[must_use]
    pub fn last_error(&self) -> Option<&StreamError> {
        self.last_error.as_ref()
    }

    /// Last status string reported by the server.
    #[must_use]
    pub fn server_status(&self) -> Option<&str> {
        self.server_status.as_deref()
    }

    /// Connection status for this session's conversation.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let bound = self.conversation_id.is_some()
            && self.connection.conversation_id() == self.conversation_id;

        if !bound {
            return SessionStatus::Disconnected;
        }

        if self.connection.has_failed() {
            return SessionStatus::Failed;
        }

        match self.connection.state() {
            ConnectionState::Disconnected => SessionStatus::Disconnected,
            ConnectionState::Connecting => SessionStatus::Connecting,
            ConnectionState::Connected { .. } => SessionStatus::Connected,
            ConnectionState::Reconnecting { attempt } => SessionStatus::Reconnecting { attempt },
        }
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Track the socket behind `state`; true once the one seen before is gone.
    fn socket_replaced(&mut self, state: ConnectionState) -> bool {
        match state {
            ConnectionState::Connected { since } => self
                .connected_since
                .replace(since)
                .is_some_and(|previous| previous != since),
            _ => {
                self.connected_since = None;
                true
            }
        }
    }

    fn append(&mut self, conversation_id: String, content: String, sender: Sender) -> &Message {
        self.sequence += 1;

        #[cfg(feature = "tracing")]
        tracing::debug!(%conversation_id, sequence = self.sequence, %sender, "Appending message");

        let index = self.messages.len();
        self.messages
            .push(Message::new(conversation_id, self.sequence, content, sender));
        &self.messages[index]
    }
}
