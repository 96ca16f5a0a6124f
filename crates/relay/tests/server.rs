//! Integration tests for the relay server: real sockets, full connection flow.

use std::sync::Arc;
use std::time::Duration;

use relay::{DirectoryStore, MemoryDirectory, RelayServer};
use relay_protocol::{
    MAX_FRAME_LEN, Message, Request, Response, recv_message, send_message,
};
use relay_transport::{Connection, TcpConnection};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const WAIT: Duration = Duration::from_secs(2);

// =========================================================================
// Helpers
// =========================================================================

/// Starts a server on a random port and returns its address and store.
async fn start_server() -> (String, Arc<dyn DirectoryStore>) {
    let server = RelayServer::builder()
        .bind("127.0.0.1:0")
        .build(Arc::new(MemoryDirectory::new()))
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let directory = server.directory();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    (addr, directory)
}

async fn connect(addr: &str) -> TcpConnection {
    TcpConnection::connect(addr, MAX_FRAME_LEN)
        .await
        .expect("should connect")
}

async fn send(conn: &TcpConnection, request: Request) {
    send_message(conn, &request.into())
        .await
        .expect("send should succeed");
}

/// Receives the next message, failing the test if none arrives.
async fn expect_message(conn: &TcpConnection) -> Message {
    recv_message(conn, WAIT)
        .await
        .expect("recv should succeed")
        .expect("a message should arrive in time")
}

async fn expect_response(conn: &TcpConnection) -> Response {
    match expect_message(conn).await {
        Message::Response(response) => response,
        other => panic!("expected a response, got {other:?}"),
    }
}

/// Asserts nothing arrives for a short while.
async fn expect_silence(conn: &TcpConnection) {
    let got = recv_message(conn, Duration::from_millis(300))
        .await
        .expect("connection should stay healthy");
    assert!(got.is_none(), "unexpected message: {got:?}");
}

/// Asserts the server closed the connection.
async fn expect_closed(conn: &TcpConnection) {
    let err = recv_message(conn, WAIT)
        .await
        .expect_err("connection should be closed");
    assert!(err.is_connection_lost(), "unexpected error: {err}");
}

/// Connects and completes the presence handshake.
async fn login(addr: &str, name: &str) -> TcpConnection {
    let conn = connect(addr).await;
    send(&conn, Request::presence(name)).await;
    assert_eq!(expect_response(&conn).await, Response::ok());
    conn
}

fn active_names(directory: &Arc<dyn DirectoryStore>) -> Vec<String> {
    directory
        .list_active_users()
        .unwrap()
        .into_iter()
        .map(|user| user.name)
        .collect()
}

/// Polls `check` until it holds or the wait runs out.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// =========================================================================
// Presence
// =========================================================================

#[tokio::test]
async fn test_presence_distinct_names_all_accepted() {
    let (addr, directory) = start_server().await;

    let _alice = login(&addr, "alice").await;
    let _bob = login(&addr, "bob").await;
    let _carol = login(&addr, "carol").await;

    assert_eq!(active_names(&directory), vec!["alice", "bob", "carol"]);
}

#[tokio::test]
async fn test_presence_duplicate_name_rejected_and_closed() {
    let (addr, _directory) = start_server().await;
    let alice = login(&addr, "alice").await;
    let bob = login(&addr, "bob").await;

    let imposter = connect(&addr).await;
    send(&imposter, Request::presence("alice")).await;

    let response = expect_response(&imposter).await;
    assert_eq!(response.code, Response::BAD_REQUEST);
    assert!(response.error.is_some());
    expect_closed(&imposter).await;

    // The original session is untouched and still reachable.
    send(&bob, Request::chat("bob", "alice", "still there?")).await;
    match expect_message(&alice).await {
        Message::Request(Request::Chat(chat)) => assert_eq!(chat.text, "still there?"),
        other => panic!("expected a chat, got {other:?}"),
    }
}

// =========================================================================
// Chat
// =========================================================================

#[tokio::test]
async fn test_chat_reaches_destination_exactly_once() {
    let (addr, _directory) = start_server().await;
    let alice = login(&addr, "alice").await;
    let bob = login(&addr, "bob").await;

    send(&alice, Request::chat("alice", "bob", "hi")).await;

    match expect_message(&bob).await {
        Message::Request(Request::Chat(chat)) => {
            assert_eq!(chat.from, "alice");
            assert_eq!(chat.to, "bob");
            assert_eq!(chat.text, "hi");
        }
        other => panic!("expected a chat, got {other:?}"),
    }
    expect_silence(&bob).await;
    expect_silence(&alice).await;
}

#[tokio::test]
async fn test_chat_successive_messages_keep_order() {
    let (addr, _directory) = start_server().await;
    let alice = login(&addr, "alice").await;
    let bob = login(&addr, "bob").await;

    for i in 0..20 {
        send(&alice, Request::chat("alice", "bob", format!("msg {i}"))).await;
    }

    for i in 0..20 {
        match expect_message(&bob).await {
            Message::Request(Request::Chat(chat)) => assert_eq!(chat.text, format!("msg {i}")),
            other => panic!("expected a chat, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_chat_to_unknown_user_dropped_server_survives() {
    let (addr, _directory) = start_server().await;
    let alice = login(&addr, "alice").await;
    let bob = login(&addr, "bob").await;

    send(&alice, Request::chat("alice", "nobody", "hello?")).await;
    expect_silence(&alice).await;

    send(&alice, Request::chat("alice", "bob", "after")).await;
    match expect_message(&bob).await {
        Message::Request(Request::Chat(chat)) => assert_eq!(chat.text, "after"),
        other => panic!("expected a chat, got {other:?}"),
    }
}

#[tokio::test]
async fn test_chat_growing_past_cap_when_forwarded_gets_400() {
    let (addr, directory) = start_server().await;
    let alice = login(&addr, "alice").await;
    let bob = login(&addr, "bob").await;

    // An integer `time` is forwarded as `1.0`, two bytes longer.
    let head = r#"{"action":"message","from":"alice","to":"bob","time":1,"message_text":""#;
    let tail = r#""}"#;
    let padding = "x".repeat(MAX_FRAME_LEN - head.len() - tail.len());
    let frame = format!("{head}{padding}{tail}");
    assert_eq!(frame.len(), MAX_FRAME_LEN);

    alice.send(frame.as_bytes()).await.unwrap();

    assert_eq!(expect_response(&alice).await.code, Response::BAD_REQUEST);
    expect_silence(&bob).await;
    let stats = directory.message_stats().unwrap();
    let sent = stats.iter().find(|s| s.name == "alice").map_or(0, |s| s.sent);
    assert_eq!(sent, 0);

    // The sender stays connected and can still chat.
    send(&alice, Request::chat("alice", "bob", "shorter")).await;
    match expect_message(&bob).await {
        Message::Request(Request::Chat(chat)) => assert_eq!(chat.text, "shorter"),
        other => panic!("expected a chat, got {other:?}"),
    }
}

// =========================================================================
// Exit
// =========================================================================

#[tokio::test]
async fn test_exit_removes_active_user_and_name_is_reusable() {
    let (addr, directory) = start_server().await;
    let alice = login(&addr, "alice").await;
    let bob = login(&addr, "bob").await;

    send(&alice, Request::exit("alice")).await;
    expect_closed(&alice).await;
    assert!(eventually(|| active_names(&directory) == vec!["bob"]).await);

    // Routing to the departed user is a logged failure, nothing more.
    send(&bob, Request::chat("bob", "alice", "gone?")).await;
    expect_silence(&bob).await;

    let _alice_again = login(&addr, "alice").await;
    assert_eq!(active_names(&directory), vec!["alice", "bob"]);
}

#[tokio::test]
async fn test_disconnect_without_exit_unregisters() {
    let (addr, directory) = start_server().await;
    let alice = login(&addr, "alice").await;

    alice.close().await.unwrap();
    drop(alice);

    assert!(eventually(|| active_names(&directory).is_empty()).await);
    let _alice_again = login(&addr, "alice").await;
}

// =========================================================================
// Bad input
// =========================================================================

#[tokio::test]
async fn test_garbage_frame_gets_400_and_connection_stays_open() {
    let (addr, _directory) = start_server().await;
    let conn = connect(&addr).await;

    conn.send(b"{not json").await.unwrap();
    let response = expect_response(&conn).await;
    assert_eq!(response.code, Response::BAD_REQUEST);
    assert_eq!(response.error.as_deref(), Some("Bad Request"));

    // Unknown action is also a bad request.
    conn.send(br#"{"action":"dance","time":1.0}"#).await.unwrap();
    assert_eq!(expect_response(&conn).await.code, Response::BAD_REQUEST);

    send(&conn, Request::presence("alice")).await;
    assert_eq!(expect_response(&conn).await, Response::ok());
}

#[tokio::test]
async fn test_oversized_frame_gets_400_then_close() {
    let (addr, _directory) = start_server().await;
    let mut raw = tokio::net::TcpStream::connect(&addr).await.unwrap();

    // Only the header: the server must refuse before reading a body.
    let len = (MAX_FRAME_LEN as u32) * 4;
    raw.write_all(&len.to_be_bytes()).await.unwrap();

    let mut header = [0u8; 4];
    tokio::time::timeout(WAIT, raw.read_exact(&mut header))
        .await
        .expect("reply in time")
        .expect("reply header");
    let mut body = vec![0u8; u32::from_be_bytes(header) as usize];
    raw.read_exact(&mut body).await.expect("reply body");
    let reply: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply["response"], 400);

    let mut rest = Vec::new();
    let read = tokio::time::timeout(WAIT, raw.read_to_end(&mut rest))
        .await
        .expect("server should close the connection");
    assert!(read.is_ok());
}

#[tokio::test]
async fn test_request_before_presence_rejected() {
    let (addr, _directory) = start_server().await;
    let conn = connect(&addr).await;

    send(&conn, Request::users_request("alice")).await;

    assert_eq!(expect_response(&conn).await.code, Response::BAD_REQUEST);
}

// =========================================================================
// Directory
// =========================================================================

#[tokio::test]
async fn test_users_and_contacts_round_trip() {
    let (addr, _directory) = start_server().await;
    let alice = login(&addr, "alice").await;
    let _bob = login(&addr, "bob").await;

    send(&alice, Request::users_request("alice")).await;
    let users = expect_response(&alice).await;
    assert_eq!(users.code, Response::ACCEPTED);
    assert_eq!(users.list_info, Some(vec!["alice".into(), "bob".into()]));

    send(&alice, Request::add_contact("alice", "bob")).await;
    assert_eq!(expect_response(&alice).await, Response::ok());

    send(&alice, Request::get_contacts("alice")).await;
    assert_eq!(
        expect_response(&alice).await,
        Response::accepted(vec!["bob".into()])
    );

    send(&alice, Request::remove_contact("alice", "bob")).await;
    assert_eq!(expect_response(&alice).await, Response::ok());

    send(&alice, Request::get_contacts("alice")).await;
    assert_eq!(expect_response(&alice).await, Response::accepted(vec![]));
}

#[tokio::test]
async fn test_membership_notifies_on_login_and_logout() {
    let server = RelayServer::builder()
        .bind("127.0.0.1:0")
        .build(Arc::new(MemoryDirectory::new()))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    let mut membership = server.membership();
    tokio::spawn(server.run());

    let alice = login(&addr, "alice").await;
    tokio::time::timeout(WAIT, membership.changed())
        .await
        .expect("login should notify")
        .unwrap();

    send(&alice, Request::exit("alice")).await;
    tokio::time::timeout(WAIT, membership.changed())
        .await
        .expect("logout should notify")
        .unwrap();
}
