#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use chat_stream_client::chat::{
    Sender, SessionController, SessionError, SessionStatus, SessionUpdate,
};
use chat_stream_client::ws::{ConnectionManager, ConnectionState, StreamError};
use serde_json::json;
use tokio::time::timeout;

use crate::common::{MockChatServer, WAIT, fast_config, refused_addr, wait_for_state};

async fn next_update(session: &mut SessionController) -> SessionUpdate {
    timeout(WAIT, session.next_update()).await.unwrap().unwrap()
}

async fn connected_session(server: &mut MockChatServer) -> SessionController {
    let manager = ConnectionManager::new(&server.url(), fast_config(3)).unwrap();
    let mut session = SessionController::new(manager);

    session.connect("c1").await.unwrap();
    assert_eq!(server.next_query().await, "conversation_id=c1");

    session
}

#[tokio::test]
async fn streamed_reply_becomes_one_message() {
    let mut server = MockChatServer::start().await;
    let mut session = connected_session(&mut server).await;

    let sent = session.send_message("  Hi  ").unwrap();
    assert_eq!(sent.content, "Hi");
    assert_eq!(sent.sequence, 1);
    assert_eq!(
        server.next_received_json().await,
        json!({ "type": "message", "message": "Hi" })
    );

    server.send(&json!({ "type": "connection_status", "data": "connected" }));
    server.send(&json!({ "type": "content", "data": "Hel" }));
    server.send(&json!({ "type": "content", "data": "lo" }));
    server.send(&json!({ "type": "complete" }));

    assert_eq!(
        next_update(&mut session).await,
        SessionUpdate::Status("connected".to_owned())
    );
    assert_eq!(
        next_update(&mut session).await,
        SessionUpdate::Streaming {
            content: "Hel".to_owned()
        }
    );
    assert_eq!(
        session.streaming_message().map(|m| m.content.as_str()),
        Some("Hel")
    );
    assert_eq!(
        next_update(&mut session).await,
        SessionUpdate::Streaming {
            content: "Hello".to_owned()
        }
    );

    let SessionUpdate::Finalized(reply) = next_update(&mut session).await else {
        panic!("expected the streamed reply to be finalized");
    };
    assert_eq!(reply.content, "Hello");
    assert_eq!(reply.sender, Sender::Assistant);
    assert_eq!(reply.sequence, 2);

    let messages = session.load_messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, Sender::User);
    assert_eq!(messages[1], reply);
    assert!(!session.is_streaming());
}

#[tokio::test]
async fn server_error_discards_partial_reply() {
    let mut server = MockChatServer::start().await;
    let mut session = connected_session(&mut server).await;

    server.send(&json!({ "type": "content", "data": "par" }));
    server.send(&json!({ "type": "error", "data": { "message": "Empty message received" } }));

    assert!(matches!(
        next_update(&mut session).await,
        SessionUpdate::Streaming { .. }
    ));
    assert!(matches!(
        next_update(&mut session).await,
        SessionUpdate::Error(StreamError::Server { message, .. }) if message == "Empty message received"
    ));

    assert!(!session.is_streaming());
    assert!(!session.has_messages());
    assert!(session.last_error().is_some());
    assert_eq!(session.status(), SessionStatus::Connected);
}

#[tokio::test]
async fn repeated_connect_does_not_duplicate_events() {
    let mut server = MockChatServer::start().await;
    let mut session = connected_session(&mut server).await;

    session.connect("c1").await.unwrap();
    session.connect("c1").await.unwrap();

    server.send(&json!({ "type": "content", "data": "once" }));
    server.send(&json!({ "type": "complete" }));

    assert_eq!(
        next_update(&mut session).await,
        SessionUpdate::Streaming {
            content: "once".to_owned()
        }
    );
    assert!(matches!(
        next_update(&mut session).await,
        SessionUpdate::Finalized(_)
    ));
    assert_eq!(session.message_count(), 1);
}

#[tokio::test]
async fn error_after_reconnect_is_reported_once() {
    let mut server = MockChatServer::start().await;
    let mut session = connected_session(&mut server).await;

    session.disconnect();
    assert_eq!(server.next_received().await, "close:1000");
    session.connect("c1").await.unwrap();
    assert_eq!(server.next_query().await, "conversation_id=c1");

    server.send(&json!({ "type": "error", "data": { "message": "boom" } }));
    server.send(&json!({ "type": "complete" }));

    assert!(matches!(
        next_update(&mut session).await,
        SessionUpdate::Error(StreamError::Server { message, .. }) if message == "boom"
    ));
    assert_eq!(next_update(&mut session).await, SessionUpdate::Discarded);
}

#[tokio::test]
async fn interrupted_reply_is_not_joined_to_the_next() {
    let mut server = MockChatServer::start().await;
    let mut session = connected_session(&mut server).await;

    server.send(&json!({ "type": "content", "data": "stale-" }));
    assert_eq!(
        next_update(&mut session).await,
        SessionUpdate::Streaming {
            content: "stale-".to_owned()
        }
    );

    server.drop_connections();
    assert_eq!(next_update(&mut session).await, SessionUpdate::Discarded);
    assert!(!session.is_streaming());

    assert_eq!(server.next_query().await, "conversation_id=c1");
    wait_for_state(session.connection(), ConnectionState::is_connected).await;

    server.send(&json!({ "type": "content", "data": "fresh" }));
    server.send(&json!({ "type": "complete" }));

    assert_eq!(
        next_update(&mut session).await,
        SessionUpdate::Streaming {
            content: "fresh".to_owned()
        }
    );
    let SessionUpdate::Finalized(reply) = next_update(&mut session).await else {
        panic!("expected the fresh reply to be finalized");
    };
    assert_eq!(reply.content, "fresh");
}

#[tokio::test]
async fn switching_conversation_keeps_the_log() {
    let mut server = MockChatServer::start().await;
    let mut session = connected_session(&mut server).await;

    session.send_message("about c1").unwrap();
    server.next_received().await;

    session.connect("c2").await.unwrap();
    assert_eq!(server.next_query().await, "conversation_id=c2");

    let sent = session.send_message("about c2").unwrap();
    assert_eq!(sent.sequence, 2);

    assert_eq!(session.load_messages().len(), 2);
    let current: Vec<_> = session
        .conversation_messages()
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(current, vec!["about c2"]);
}

#[tokio::test]
async fn send_message_checks_in_order() {
    let server = MockChatServer::start().await;
    let manager = ConnectionManager::new(&server.url(), fast_config(3)).unwrap();
    let mut session = SessionController::new(manager.clone());

    let err = session.send_message("").unwrap_err();
    assert_eq!(
        err.downcast_ref::<SessionError>(),
        Some(&SessionError::EmptyMessage)
    );

    let err = session.send_message("Hi").unwrap_err();
    assert_eq!(
        err.downcast_ref::<SessionError>(),
        Some(&SessionError::NotConnected)
    );

    // Connected manager, but this session never bound a conversation
    manager.connect("c1").await.unwrap();
    let err = session.send_message("Hi").unwrap_err();
    assert_eq!(
        err.downcast_ref::<SessionError>(),
        Some(&SessionError::NoConversation)
    );

    assert!(!session.has_messages());
}

#[tokio::test]
async fn disconnect_detaches_and_closes() {
    let mut server = MockChatServer::start().await;
    let mut session = connected_session(&mut server).await;

    assert_eq!(session.status(), SessionStatus::Connected);

    session.disconnect();

    assert_eq!(session.status(), SessionStatus::Disconnected);
    assert_eq!(server.next_received().await, "close:1000");
    assert_eq!(session.next_update().await, None);
    assert_eq!(session.conversation_id(), Some("c1"));
}

#[tokio::test]
async fn exhausted_retries_surface_as_failure() {
    let addr = refused_addr().await;
    let manager =
        ConnectionManager::new(&format!("ws://{addr}/ws/chat"), fast_config(1)).unwrap();
    let mut session = SessionController::new(manager);

    session.connect("c1").await.unwrap_err();

    assert_eq!(
        next_update(&mut session).await,
        SessionUpdate::Error(StreamError::MaxRetriesExceeded { attempts: 1 })
    );
    assert_eq!(session.status(), SessionStatus::Failed);
    assert!(session.last_error().is_some_and(StreamError::is_terminal));
}
