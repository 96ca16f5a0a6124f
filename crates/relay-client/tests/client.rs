//! Integration tests for `ClientSession` against a real relay server.

use std::sync::Arc;
use std::time::Duration;

use relay::{DirectoryStore, MemoryDirectory, RelayServer};
use relay_client::{ClientConfig, ClientError, ClientEvent, ClientSession, Direction};
use relay_protocol::{MAX_FRAME_LEN, Response, recv_message, send_message};
use relay_transport::{Connection, TcpTransport, Transport};
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(2);

// =========================================================================
// Helpers
// =========================================================================

fn fast_config() -> ClientConfig {
    ClientConfig {
        connect_attempts: 2,
        retry_delay: Duration::from_millis(10),
        poll: Duration::from_millis(50),
        response_timeout: WAIT,
        exit_grace: Duration::from_millis(50),
    }
}

async fn start_server() -> (String, Arc<dyn DirectoryStore>) {
    let server = RelayServer::builder()
        .bind("127.0.0.1:0")
        .build(Arc::new(MemoryDirectory::new()))
        .await
        .expect("server should build");
    let addr = server.local_addr().unwrap().to_string();
    let directory = server.directory();
    tokio::spawn(server.run());
    (addr, directory)
}

async fn join(addr: &str, name: &str) -> (ClientSession, UnboundedReceiver<ClientEvent>) {
    ClientSession::connect(addr, name, fast_config())
        .await
        .expect("should log in")
}

async fn next_event(events: &mut UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("an event should arrive in time")
        .expect("event channel open")
}

/// A server that completes the login exchange and then hangs up.
async fn server_that_hangs_up() -> String {
    let mut transport = TcpTransport::bind("127.0.0.1:0", MAX_FRAME_LEN)
        .await
        .unwrap();
    let addr = transport.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let conn = transport.accept().await.unwrap();
        let replies = [
            Response::ok(),
            Response::accepted(vec!["alice".into()]),
            Response::accepted(vec![]),
        ];
        for reply in replies {
            let _ = recv_message(&conn, WAIT).await;
            send_message(&conn, &reply.into()).await.unwrap();
        }
        conn.close().await.unwrap();
    });

    addr
}

// =========================================================================
// Login
// =========================================================================

#[tokio::test]
async fn test_connect_loads_directory_caches() {
    let (addr, _directory) = start_server().await;
    let (_bob, _) = join(&addr, "bob").await;

    let (alice, _) = join(&addr, "alice").await;

    assert_eq!(alice.name(), "alice");
    assert!(alice.is_alive());
    assert_eq!(alice.known_users(), vec!["alice", "bob"]);
    assert!(alice.contacts().is_empty());
}

#[tokio::test]
async fn test_connect_duplicate_name_is_rejected() {
    let (addr, _directory) = start_server().await;
    let (_alice, _) = join(&addr, "alice").await;

    let result = ClientSession::connect(&addr, "alice", fast_config()).await;

    match result {
        Err(ClientError::Rejected(reason)) => assert!(reason.contains("alice")),
        Err(other) => panic!("expected a rejection, got {other}"),
        Ok(_) => panic!("duplicate login should fail"),
    }
}

#[tokio::test]
async fn test_connect_unreachable_server_gives_up_after_retries() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let result = ClientSession::connect(&addr, "alice", fast_config()).await;

    assert!(matches!(
        result,
        Err(ClientError::Unreachable { attempts: 2, .. })
    ));
}

// =========================================================================
// Chat
// =========================================================================

#[tokio::test]
async fn test_send_chat_reaches_peer_receiver() {
    let (addr, _directory) = start_server().await;
    let (alice, _) = join(&addr, "alice").await;
    let (bob, mut bob_events) = join(&addr, "bob").await;
    let _receiver = bob.spawn_receiver();

    // alice's cache predates bob; the miss triggers one refresh.
    alice.send_chat("bob", "hi").await.expect("send");

    assert_eq!(
        next_event(&mut bob_events).await,
        ClientEvent::Message {
            from: "alice".into(),
            text: "hi".into()
        }
    );

    let sent = alice.history(Some("bob"));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].direction, Direction::Outgoing);
    let received = bob.history(None);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].peer, "alice");
    assert_eq!(received[0].direction, Direction::Incoming);
}

#[tokio::test]
async fn test_send_chat_preserves_order() {
    let (addr, _directory) = start_server().await;
    let (bob, mut bob_events) = join(&addr, "bob").await;
    let (alice, _) = join(&addr, "alice").await;
    let _receiver = bob.spawn_receiver();

    for i in 0..5 {
        alice.send_chat("bob", &format!("msg {i}")).await.unwrap();
    }

    for i in 0..5 {
        match next_event(&mut bob_events).await {
            ClientEvent::Message { text, .. } => assert_eq!(text, format!("msg {i}")),
            other => panic!("expected a message, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_send_chat_to_unknown_user_fails_locally() {
    let (addr, _directory) = start_server().await;
    let (alice, _) = join(&addr, "alice").await;

    let result = alice.send_chat("nobody", "hello?").await;

    assert!(matches!(result, Err(ClientError::UnknownUser(name)) if name == "nobody"));
    assert!(alice.history(None).is_empty());
}

#[tokio::test]
async fn test_chat_arriving_during_request_goes_to_inbox() {
    let (addr, _directory) = start_server().await;
    let (bob, mut bob_events) = join(&addr, "bob").await;
    let (alice, _) = join(&addr, "alice").await;

    // No receiver on bob: the chat sits in the socket until bob's next
    // request reads past it.
    alice.send_chat("bob", "while you wait").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let users = bob.refresh_users().await.expect("users");
    assert_eq!(users, vec!["alice", "bob"]);
    assert_eq!(
        bob_events.try_recv().ok(),
        Some(ClientEvent::Message {
            from: "alice".into(),
            text: "while you wait".into()
        })
    );
}

// =========================================================================
// Contacts
// =========================================================================

#[tokio::test]
async fn test_contacts_add_and_remove() {
    let (addr, _directory) = start_server().await;
    let (_bob, _) = join(&addr, "bob").await;
    let (alice, _) = join(&addr, "alice").await;

    alice.add_contact("bob").await.expect("add");
    assert_eq!(alice.contacts(), vec!["bob"]);
    assert_eq!(alice.refresh_contacts().await.unwrap(), vec!["bob"]);

    alice.remove_contact("bob").await.expect("remove");
    assert!(alice.contacts().is_empty());
    assert!(alice.refresh_contacts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_add_unknown_contact_is_rejected() {
    let (addr, _directory) = start_server().await;
    let (alice, _) = join(&addr, "alice").await;

    let result = alice.add_contact("ghost").await;

    assert!(matches!(result, Err(ClientError::Rejected(_))));
    assert!(alice.contacts().is_empty());
}

// =========================================================================
// Shutdown and connection loss
// =========================================================================

#[tokio::test]
async fn test_shutdown_logs_out_on_server() {
    let (addr, directory) = start_server().await;
    let (alice, _) = join(&addr, "alice").await;
    let receiver = alice.spawn_receiver();

    alice.shutdown().await;
    tokio::time::timeout(WAIT, receiver)
        .await
        .expect("receiver should stop")
        .unwrap();

    assert!(!alice.is_alive());
    let deadline = tokio::time::Instant::now() + WAIT;
    while !directory.list_active_users().unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "alice still active");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The name is free again.
    let (_again, _) = join(&addr, "alice").await;
}

#[tokio::test]
async fn test_server_hangup_reports_connection_lost() {
    let addr = server_that_hangs_up().await;
    let (alice, mut events) = join(&addr, "alice").await;
    let _receiver = alice.spawn_receiver();

    assert_eq!(next_event(&mut events).await, ClientEvent::ConnectionLost);
    assert!(!alice.is_alive());
    assert!(matches!(
        alice.refresh_users().await,
        Err(ClientError::ConnectionLost)
    ));
}
