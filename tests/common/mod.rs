#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of these helpers"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chat_stream_client::ws::{Config, ConnectionManager, ConnectionState, Envelope};
use futures_util::{SinkExt as _, Stream, StreamExt as _};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
enum Command {
    Send(String),
    Close(u16),
    Drop,
}

/// Mock chat backend.
///
/// Commands go to every open connection. Text frames from clients, and the code of any close
/// frame they send (as `close:<code>`), arrive on one channel. The query string of every
/// handshake arrives on another, so tests can count connections. Handshakes can be refused
/// with a 503 after their query is recorded.
pub struct MockChatServer {
    pub addr: SocketAddr,
    commands: broadcast::Sender<Command>,
    refusing: Arc<AtomicBool>,
    received_rx: mpsc::UnboundedReceiver<String>,
    query_rx: mpsc::UnboundedReceiver<String>,
}

impl MockChatServer {
    /// Start a mock server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (commands, _) = broadcast::channel::<Command>(100);
        let (received_tx, received_rx) = mpsc::unbounded_channel::<String>();
        let (query_tx, query_rx) = mpsc::unbounded_channel::<String>();

        let command_tx = commands.clone();
        let refusing = Arc::new(AtomicBool::new(false));
        let refusing_clone = Arc::clone(&refusing);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                // Subscribe before the handshake so commands sent right after the client
                // sees the connection open are not missed
                let mut command_rx = command_tx.subscribe();
                let received_tx = received_tx.clone();
                let query_tx = query_tx.clone();
                let refusing = Arc::clone(&refusing_clone);

                tokio::spawn(async move {
                    let callback = |request: &Request,
                                    response: Response|
                     -> Result<Response, ErrorResponse> {
                        let query = request.uri().query().unwrap_or_default().to_owned();
                        drop(query_tx.send(query));

                        if refusing.load(Ordering::SeqCst) {
                            let mut rejection = ErrorResponse::new(None);
                            *rejection.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                            return Err(rejection);
                        }
                        Ok(response)
                    };

                    let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                    else {
                        return;
                    };

                    let (mut write, mut read) = ws_stream.split();

                    loop {
                        tokio::select! {
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    drop(received_tx.send(text.to_string()));
                                }
                                Some(Ok(Message::Close(frame))) => {
                                    let code = frame.map_or(1005, |f| u16::from(f.code));
                                    drop(received_tx.send(format!("close:{code}")));
                                    break;
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            command = command_rx.recv() => match command {
                                Ok(Command::Send(text)) => {
                                    if write.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(Command::Close(code)) => {
                                    let frame = CloseFrame {
                                        code: CloseCode::from(code),
                                        reason: Utf8Bytes::from_static("bye"),
                                    };
                                    drop(write.send(Message::Close(Some(frame))).await);
                                    break;
                                }
                                // Dropping both halves resets the socket without a close frame
                                Ok(Command::Drop) | Err(_) => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            addr,
            commands,
            refusing,
            received_rx,
            query_rx,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws/chat", self.addr)
    }

    pub fn send(&self, frame: &Value) {
        self.send_raw(&frame.to_string());
    }

    pub fn send_raw(&self, text: &str) {
        self.commands.send(Command::Send(text.to_owned())).unwrap();
    }

    /// Send a close frame with `code` and hang up.
    pub fn close(&self, code: u16) {
        self.commands.send(Command::Close(code)).unwrap();
    }

    /// Hang up without a close frame.
    pub fn drop_connections(&self) {
        self.commands.send(Command::Drop).unwrap();
    }

    /// Answer every later handshake with 503 Service Unavailable.
    pub fn refuse_handshakes(&self) {
        self.refusing.store(true, Ordering::SeqCst);
    }

    /// Query string of the next handshake.
    pub async fn next_query(&mut self) -> String {
        timeout(WAIT, self.query_rx.recv()).await.unwrap().unwrap()
    }

    pub async fn assert_no_handshake_within(&mut self, window: Duration) {
        assert!(
            timeout(window, self.query_rx.recv()).await.is_err(),
            "unexpected connection attempt"
        );
    }

    /// Next text frame (or `close:<code>`) received from any client.
    pub async fn next_received(&mut self) -> String {
        timeout(WAIT, self.received_rx.recv()).await.unwrap().unwrap()
    }

    pub async fn next_received_json(&mut self) -> Value {
        serde_json::from_str(&self.next_received().await).unwrap()
    }
}

/// Timings short enough for tests; heartbeats stay out of the way unless a test opts in.
#[must_use]
pub fn fast_config(max_retries: u32) -> Config {
    let mut config = Config::default();
    config.connect_timeout = Duration::from_millis(300);
    config.heartbeat_interval = Duration::from_secs(60);
    config.reconnect.max_retries = max_retries;
    config.reconnect.delay = Duration::from_millis(50);
    config
}

/// Address nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Address that accepts TCP connections but never answers the WebSocket handshake.
pub async fn silent_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    addr
}

pub async fn wait_for_state<F: Fn(ConnectionState) -> bool>(
    manager: &ConnectionManager,
    predicate: F,
) {
    let mut rx = manager.state_receiver();
    timeout(WAIT, rx.wait_for(|state| predicate(*state)))
        .await
        .unwrap()
        .unwrap();
}

pub async fn next_event<S: Stream<Item = Envelope> + Unpin>(events: &mut S) -> Envelope {
    timeout(WAIT, events.next()).await.unwrap().unwrap()
}
