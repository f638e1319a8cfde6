//! Real-time connection layer.
//!
//! One [`ConnectionManager`] owns one logical WebSocket connection scoped to a conversation.
//! It drives the state machine, sends heartbeats while open, reconnects after unexpected
//! disconnects and publishes decoded frames to any number of subscribers.
//!
//! # Architecture
//!
//! - [`codec`]: JSON wire frames in both directions
//! - [`HeartbeatMonitor`]: periodic keep-alive frames while open
//! - [`ReconnectionPolicy`]: bounded, fixed-delay retries
//! - [`ConnectionManager`]: the driver tying them together
//!
//! # Example
//!
//! ```no_run
//! use chat_stream_client::Environment;
//! use chat_stream_client::ws::{Config, ConnectionManager, Event};
//! use futures::StreamExt as _;
//!
//! # async fn example() -> chat_stream_client::Result<()> {
//! let connection = ConnectionManager::for_environment(Environment::Local, Config::default())?;
//! let mut events = Box::pin(connection.events());
//!
//! connection.connect("c1").await?;
//! connection.send("Summarise the latest filing")?;
//!
//! while let Some(envelope) = events.next().await {
//!     match envelope.event {
//!         Event::Content(chunk) => print!("{chunk}"),
//!         Event::Complete => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod reconnect;

pub use config::{Config, ReconnectConfig};
pub use connection::{ConnectionManager, ConnectionState, Envelope, Event};
pub use heartbeat::HeartbeatMonitor;
pub use reconnect::ReconnectionPolicy;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::{StreamError, WsError};
