#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_stream::stream;
use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, Stream, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::{CancellationToken, DropGuard};
use url::Url;

use super::codec::{self, Frame};
use super::config::Config;
use super::error::{StreamError, WsError};
use super::heartbeat::HeartbeatMonitor;
use super::reconnect::ReconnectionPolicy;
use crate::error::Error;
use crate::{Environment, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Broadcast channel capacity for published events.
const BROADCAST_CAPACITY: usize = 1024;

/// Query parameter carrying the conversation the socket is scoped to.
pub const CONVERSATION_QUERY_KEY: &str = "conversation_id";

/// Close code sent by [`ConnectionManager::disconnect`] and treated as a clean shutdown.
pub const NORMAL_CLOSURE_CODE: u16 = 1000;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Initial attempt after an explicit `connect`
    Connecting,
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Retrying after an unexpected disconnect
    Reconnecting {
        /// Current reconnection attempt number, starting at 1
        attempt: u32,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub const fn is_reconnecting(self) -> bool {
        matches!(self, Self::Reconnecting { .. })
    }
}

/// Event published to subscribers of a [`ConnectionManager`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Piece of streamed assistant content
    Content(String),
    /// The streamed response is finished
    Complete,
    /// Status string reported by the server
    ConnectionStatus(String),
    /// Decode, server, lag or terminal connection failure
    Error(StreamError),
}

/// An [`Event`] tagged with the conversation whose socket produced it.
///
/// `conversation_id` is `None` for events local to one subscriber, such as lag.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub conversation_id: Option<String>,
    pub event: Event,
}

impl Envelope {
    #[must_use]
    pub fn new<S: Into<String>>(conversation_id: S, event: Event) -> Self {
        Self {
            conversation_id: Some(conversation_id.into()),
            event,
        }
    }

    #[must_use]
    pub const fn unscoped(event: Event) -> Self {
        Self {
            conversation_id: None,
            event,
        }
    }

    /// Whether this envelope may be folded into the session for `conversation_id`.
    #[must_use]
    pub fn is_for(&self, conversation_id: &str) -> bool {
        self.conversation_id
            .as_deref()
            .is_none_or(|id| id == conversation_id)
    }
}

/// Outcome of one connection attempt, shared by every `connect` caller awaiting it.
#[derive(Debug, Clone)]
enum Attempt {
    Pending,
    Opened,
    Failed(AttemptFailure),
}

#[derive(Debug, Clone)]
enum AttemptFailure {
    Timeout(Duration),
    Transport(String),
    Cancelled,
}

impl From<AttemptFailure> for Error {
    fn from(failure: AttemptFailure) -> Self {
        match failure {
            AttemptFailure::Timeout(after) => WsError::ConnectTimeout(after),
            AttemptFailure::Transport(reason) => WsError::ConnectFailed { reason },
            AttemptFailure::Cancelled => WsError::ConnectionClosed,
        }
        .into()
    }
}

/// How an open connection ended.
enum Closure {
    /// Peer closed with the normal-closure code
    Normal,
    /// Local `disconnect` or manager teardown
    Cancelled,
    /// Anything else; handed to the reconnection policy
    Abnormal(WsError),
}

/// Mutable connection bookkeeping. Only touched under [`Inner::control`].
#[derive(Default)]
struct Control {
    /// Bumped on every `connect` that starts a driver and on every `disconnect`.
    /// A driver may only write state or publish while its generation is current.
    generation: u64,
    conversation_id: Option<String>,
    token: Option<CancellationToken>,
    sender_tx: Option<mpsc::UnboundedSender<String>>,
    /// Attempt currently in flight, if any
    pending: Option<watch::Receiver<Attempt>>,
    /// Retries were exhausted and no explicit `connect` has happened since
    failed: bool,
}

struct Inner {
    endpoint: Url,
    config: Config,
    state_tx: watch::Sender<ConnectionState>,
    broadcast_tx: broadcast::Sender<Envelope>,
    /// Parent of every driver token; cancelled when the last manager handle drops
    shutdown: CancellationToken,
    control: Mutex<Control>,
}

impl Inner {
    // A poisoned lock is recovered because every write to Control is a plain field store.
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn if_current<T, F: FnOnce(&mut Control) -> T>(&self, generation: u64, f: F) -> Option<T> {
        let mut control = self.lock();
        (control.generation == generation).then(|| f(&mut control))
    }

    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        self.if_current(generation, |_| {
            #[cfg(feature = "tracing")]
            tracing::debug!(?state, "Connection state changed");
            self.state_tx.send_replace(state);
        })
        .is_some()
    }

    fn publish(&self, generation: u64, envelope: Envelope) -> bool {
        self.if_current(generation, |_| {
            // No subscribers is not an error
            _ = self.broadcast_tx.send(envelope);
        })
        .is_some()
    }

    fn begin_attempt(&self, generation: u64) -> Option<watch::Sender<Attempt>> {
        self.if_current(generation, |control| {
            let (attempt_tx, attempt_rx) = watch::channel(Attempt::Pending);
            control.pending = Some(attempt_rx);
            attempt_tx
        })
    }

    fn resolve_attempt(
        &self,
        generation: u64,
        attempt_tx: &watch::Sender<Attempt>,
        outcome: Attempt,
        state: Option<ConnectionState>,
    ) -> bool {
        self.if_current(generation, |control| {
            control.pending = None;
            if let Some(state) = state {
                #[cfg(feature = "tracing")]
                tracing::debug!(?state, "Connection state changed");
                self.state_tx.send_replace(state);
            }
            attempt_tx.send_replace(outcome);
        })
        .is_some()
    }

    fn close_normally(&self, generation: u64) {
        self.if_current(generation, |control| {
            control.token = None;
            control.sender_tx = None;
            control.pending = None;
            self.state_tx.send_replace(ConnectionState::Disconnected);
        });
    }

    fn give_up(&self, generation: u64, conversation_id: &str, attempts: u32) {
        self.if_current(generation, |control| {
            control.token = None;
            control.sender_tx = None;
            control.pending = None;
            control.failed = true;
            self.state_tx.send_replace(ConnectionState::Disconnected);
            _ = self.broadcast_tx.send(Envelope::new(
                conversation_id,
                Event::Error(StreamError::MaxRetriesExceeded { attempts }),
            ));
        });
    }

    /// Cancel any running driver and start a new one for `conversation_id`.
    fn start(
        self: &Arc<Self>,
        control: &mut Control,
        conversation_id: &str,
        url: Url,
    ) -> watch::Receiver<Attempt> {
        if let Some(token) = control.token.take() {
            token.cancel();
        }

        control.generation = control.generation.wrapping_add(1);

        let token = self.shutdown.child_token();
        let (sender_tx, sender_rx) = mpsc::unbounded_channel();
        let (attempt_tx, attempt_rx) = watch::channel(Attempt::Pending);

        control.conversation_id = Some(conversation_id.to_owned());
        control.token = Some(token.clone());
        control.sender_tx = Some(sender_tx.clone());
        control.pending = Some(attempt_rx.clone());
        control.failed = false;
        self.state_tx.send_replace(ConnectionState::Connecting);

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, "Establishing connection");

        let driver = Driver {
            inner: Arc::clone(self),
            generation: control.generation,
            conversation_id: conversation_id.to_owned(),
            url,
            token,
            sender_tx,
            sender_rx,
        };

        tokio::spawn(driver.run(attempt_tx));

        attempt_rx
    }
}

/// Owns one logical connection: the socket, the state machine, the heartbeat and the
/// reconnection policy, and fans decoded frames out to any number of subscribers.
///
/// Cloning is cheap and every clone drives the same connection. When the last clone is
/// dropped, any running connection is torn down.
///
/// # Example
///
/// ```no_run
/// use chat_stream_client::ws::ConnectionManager;
/// use chat_stream_client::ws::config::Config;
/// use futures::StreamExt as _;
///
/// # async fn example() -> chat_stream_client::Result<()> {
/// let connection = ConnectionManager::new("ws://localhost:8000/ws/chat", Config::default())?;
/// let mut events = Box::pin(connection.events());
///
/// connection.connect("c1").await?;
/// connection.send("How did revenue develop last quarter?")?;
///
/// while let Some(envelope) = events.next().await {
///     println!("{:?}", envelope.event);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
    _shutdown: Arc<DropGuard>,
}

impl ConnectionManager {
    /// Create a manager for the given base endpoint. No socket is opened until
    /// [`Self::connect`] is called.
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let shutdown = CancellationToken::new();

        Ok(Self {
            inner: Arc::new(Inner {
                endpoint: Url::parse(endpoint)?,
                config,
                state_tx,
                broadcast_tx,
                shutdown: shutdown.clone(),
                control: Mutex::new(Control::default()),
            }),
            _shutdown: Arc::new(shutdown.drop_guard()),
        })
    }

    /// Create a manager for the chat endpoint of `environment`.
    pub fn for_environment(environment: Environment, config: Config) -> Result<Self> {
        Self::new(environment.ws_endpoint(), config)
    }

    /// Base endpoint, without the conversation query.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Endpoint URL scoped to `conversation_id`.
    pub fn endpoint_for(&self, conversation_id: &str) -> Result<Url> {
        if conversation_id.trim().is_empty() {
            return Err(Error::validation("conversation id must not be blank"));
        }

        let mut url = self.inner.endpoint.clone();
        url.query_pairs_mut()
            .append_pair(CONVERSATION_QUERY_KEY, conversation_id);
        Ok(url)
    }

    /// Open a connection scoped to `conversation_id`.
    ///
    /// - If an attempt for the same conversation is already in flight, waits for that attempt
    ///   instead of opening a second socket.
    /// - If already connected to the same conversation, returns immediately.
    /// - Otherwise tears down whatever is running, resets the reconnection policy and opens a
    ///   new socket.
    ///
    /// Returns the outcome of the first attempt. When it fails, the reconnection policy keeps
    /// retrying in the background; watch [`Self::state_receiver`] or the event feed.
    pub async fn connect(&self, conversation_id: &str) -> Result<()> {
        let url = self.endpoint_for(conversation_id)?;

        let mut pending = {
            let mut control = self.inner.lock();
            let same_conversation = control.conversation_id.as_deref() == Some(conversation_id);

            match control.pending.clone() {
                Some(pending) if same_conversation => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(conversation_id, "Connection in progress, waiting...");
                    pending
                }
                None if same_conversation && self.is_connected() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(conversation_id, "Already connected");
                    return Ok(());
                }
                _ => self.inner.start(&mut control, conversation_id, url),
            }
        };

        let outcome = pending
            .wait_for(|attempt| !matches!(attempt, Attempt::Pending))
            .await
            .map(|attempt| attempt.clone());

        match outcome {
            Ok(Attempt::Opened) => Ok(()),
            Ok(Attempt::Failed(failure)) => Err(failure.into()),
            // The driver went away before the attempt resolved
            Ok(Attempt::Pending) | Err(_) => Err(WsError::ConnectionClosed.into()),
        }
    }

    /// Tear down the connection: cancels any pending reconnection, stops the heartbeat and
    /// closes the socket with the normal-closure code. Safe to call in any state.
    pub fn disconnect(&self) {
        let mut control = self.inner.lock();

        #[cfg(feature = "tracing")]
        tracing::debug!(conversation_id = ?control.conversation_id, "Disconnecting");

        if let Some(token) = control.token.take() {
            token.cancel();
        }

        control.generation = control.generation.wrapping_add(1);
        control.conversation_id = None;
        control.sender_tx = None;
        control.pending = None;
        control.failed = false;
        self.inner
            .state_tx
            .send_replace(ConnectionState::Disconnected);
    }

    /// Send a chat message over the open connection.
    pub fn send(&self, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(WsError::NotConnected.into());
        }

        let frame = codec::encode_chat(text)?;
        let control = self.inner.lock();
        let sender = control.sender_tx.as_ref().ok_or(WsError::NotConnected)?;
        sender
            .send(frame)
            .map_err(|_e| WsError::ConnectionClosed)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            conversation_id = ?control.conversation_id,
            len = text.len(),
            "Sent message"
        );

        Ok(())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Conversation the current (or most recent still-running) connection is scoped to.
    #[must_use]
    pub fn conversation_id(&self) -> Option<String> {
        self.inner.lock().conversation_id.clone()
    }

    /// Whether reconnection was exhausted. Cleared by the next `connect` or `disconnect`.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.inner.lock().failed
    }

    /// Subscribe to published events.
    ///
    /// Each call returns a new independent receiver. Dropping it detaches the subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Stream of published events. Lag is reported in-band as an unscoped
    /// [`StreamError::Lagged`] event. Dropping the stream detaches the subscriber.
    pub fn events(&self) -> impl Stream<Item = Envelope> + Send + 'static {
        let mut rx = self.subscribe();

        stream! {
            loop {
                match rx.recv().await {
                    Ok(envelope) => yield envelope,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Event subscriber lagged, missed {count} events");
                        yield Envelope::unscoped(Event::Error(StreamError::Lagged { count }));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Background task owning one socket at a time for a single `connect` call.
struct Driver {
    inner: Arc<Inner>,
    generation: u64,
    conversation_id: String,
    url: Url,
    token: CancellationToken,
    /// Kept for the heartbeat; `send` uses the clone stored in [`Control`]
    sender_tx: mpsc::UnboundedSender<String>,
    sender_rx: mpsc::UnboundedReceiver<String>,
}

impl Driver {
    /// Connection loop: attempt, serve, and retry according to the reconnection policy.
    async fn run(mut self, first_attempt: watch::Sender<Attempt>) {
        let mut policy = ReconnectionPolicy::new(&self.inner.config.reconnect);
        let mut next_attempt = Some(first_attempt);

        loop {
            let Some(attempt_tx) = next_attempt
                .take()
                .or_else(|| self.inner.begin_attempt(self.generation))
            else {
                return;
            };

            match self.attempt().await {
                Ok(ws_stream) => {
                    policy.reset();

                    let connected = ConnectionState::Connected {
                        since: Instant::now(),
                    };
                    if !self.inner.resolve_attempt(
                        self.generation,
                        &attempt_tx,
                        Attempt::Opened,
                        Some(connected),
                    ) {
                        return;
                    }

                    #[cfg(feature = "tracing")]
                    tracing::info!(conversation_id = %self.conversation_id, "Connected");

                    match self.handle_connection(ws_stream).await {
                        Closure::Normal => {
                            #[cfg(feature = "tracing")]
                            tracing::info!(
                                conversation_id = %self.conversation_id,
                                "Connection closed normally"
                            );
                            self.inner.close_normally(self.generation);
                            return;
                        }
                        Closure::Cancelled => return,
                        Closure::Abnormal(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(
                                conversation_id = %self.conversation_id,
                                error = %e,
                                "Connection lost"
                            );
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                        }
                    }
                }
                Err(AttemptFailure::Cancelled) => return,
                Err(failure) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        conversation_id = %self.conversation_id,
                        ?failure,
                        "Unable to connect"
                    );

                    if !self.inner.resolve_attempt(
                        self.generation,
                        &attempt_tx,
                        Attempt::Failed(failure),
                        None,
                    ) {
                        return;
                    }
                }
            }

            let Some(delay) = policy.next_backoff() else {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    conversation_id = %self.conversation_id,
                    attempts = policy.attempts(),
                    "Max reconnection attempts reached"
                );
                self.inner
                    .give_up(self.generation, &self.conversation_id, policy.attempts());
                return;
            };

            let reconnecting = ConnectionState::Reconnecting {
                attempt: policy.attempts(),
            };
            if !self.inner.transition(self.generation, reconnecting) {
                return;
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                ?delay,
                attempt = policy.attempts(),
                max_retries = policy.max_retries(),
                "Scheduling reconnect"
            );

            tokio::select! {
                () = self.token.cancelled() => return,
                () = sleep(delay) => {}
            }
        }
    }

    /// One connection attempt, bounded by the connect timeout.
    async fn attempt(&self) -> std::result::Result<WsStream, AttemptFailure> {
        let connect_timeout = self.inner.config.connect_timeout;

        tokio::select! {
            () = self.token.cancelled() => Err(AttemptFailure::Cancelled),
            result = timeout(connect_timeout, connect_async(self.url.as_str())) => match result {
                Ok(Ok((ws_stream, _))) => Ok(ws_stream),
                Ok(Err(e)) => Err(AttemptFailure::Transport(e.to_string())),
                Err(_) => Err(AttemptFailure::Timeout(connect_timeout)),
            },
        }
    }

    /// Serve an open socket until it closes or the driver is cancelled.
    async fn handle_connection(&mut self, ws_stream: WsStream) -> Closure {
        let (mut write, mut read) = ws_stream.split();

        let heartbeat =
            HeartbeatMonitor::start(self.sender_tx.clone(), self.inner.config.heartbeat_interval);

        let closure = loop {
            tokio::select! {
                () = self.token.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::from(NORMAL_CLOSURE_CODE),
                        reason: Utf8Bytes::from_static("Normal closure"),
                    };
                    // Best effort; the socket is dropped either way
                    _ = write.send(Message::Close(Some(frame))).await;
                    break Closure::Cancelled;
                }

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                    Some(Ok(Message::Close(Some(frame))))
                        if u16::from(frame.code) == NORMAL_CLOSURE_CODE =>
                    {
                        break Closure::Normal;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break Closure::Abnormal(WsError::AbnormalClosure {
                            code: frame.map(|f| u16::from(f.code)),
                        });
                    }
                    Some(Ok(_)) => {
                        // Binary frames are not part of the protocol; pings are answered by tungstenite
                    }
                    Some(Err(e)) => break Closure::Abnormal(WsError::Connection(e)),
                    None => break Closure::Abnormal(WsError::AbnormalClosure { code: None }),
                },

                Some(text) = self.sender_rx.recv() => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        break Closure::Abnormal(WsError::Connection(e));
                    }
                }
            }
        };

        heartbeat.stop();

        closure
    }

    /// Decode one text frame and publish the matching event.
    fn dispatch(&self, text: &str) {
        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Received WebSocket text message");

        let event = match codec::decode(text) {
            Ok(Frame::Content { text: chunk }) if chunk.is_empty() => return,
            Ok(Frame::Content { text: chunk }) => Event::Content(chunk),
            Ok(Frame::Complete) => Event::Complete,
            Ok(Frame::ConnectionStatus { status }) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%status, "Connection status");
                Event::ConnectionStatus(status)
            }
            Ok(Frame::HeartbeatAck { timestamp }) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?timestamp, "Heartbeat acknowledged");
                #[cfg(not(feature = "tracing"))]
                let _ = &timestamp;
                return;
            }
            Ok(Frame::Error {
                message,
                code,
                retry_after,
            }) => {
                #[cfg(feature = "tracing")]
                tracing::error!(%message, ?code, ?retry_after, "Server error");
                Event::Error(StreamError::Server {
                    message,
                    code,
                    retry_after,
                })
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%text, error = %e, "Failed to parse WebSocket message");
                Event::Error(StreamError::Decode(e))
            }
        };

        self.inner.publish(
            self.generation,
            Envelope::new(self.conversation_id.clone(), event),
        );
    }
}

/// Put `manager` in `Connected` for `conversation_id` with an outgoing channel whose socket
/// loop has already gone away.
#[cfg(test)]
pub(crate) fn connected_with_closed_socket(manager: &ConnectionManager, conversation_id: &str) {
    let (sender_tx, sender_rx) = mpsc::unbounded_channel();
    drop(sender_rx);

    let mut control = manager.inner.lock();
    control.conversation_id = Some(conversation_id.to_owned());
    control.sender_tx = Some(sender_tx);
    manager.inner.state_tx.send_replace(ConnectionState::Connected {
        since: Instant::now(),
    });
}
