//! Integration tests for message-level send/receive over real sockets.

use std::time::Duration;

use relay_protocol::{
    DecodeError, MAX_FRAME_LEN, Message, Request, Response, recv_message,
    send_message,
};
use relay_transport::{Connection, TcpConnection, TcpTransport, Transport};

const WAIT: Duration = Duration::from_millis(500);

async fn pair() -> (TcpConnection, TcpConnection) {
    let mut transport = TcpTransport::bind("127.0.0.1:0", MAX_FRAME_LEN)
        .await
        .expect("bind");
    let addr = transport.local_addr().unwrap().to_string();
    let server = tokio::spawn(async move { transport.accept().await.unwrap() });
    let client = TcpConnection::connect(&addr, MAX_FRAME_LEN).await.unwrap();
    (server.await.unwrap(), client)
}

#[tokio::test]
async fn test_send_then_recv_delivers_same_message() {
    let (server, client) = pair().await;

    let sent = Message::from(Request::chat("alice", "bob", "hi"));
    send_message(&client, &sent).await.expect("send");

    let got = recv_message(&server, WAIT).await.expect("recv");
    assert_eq!(got, Some(sent));
}

#[tokio::test]
async fn test_recv_with_nothing_sent_is_no_data_yet() {
    let (server, _client) = pair().await;

    let got = recv_message(&server, Duration::from_millis(50))
        .await
        .expect("an idle connection is not an error");
    assert!(got.is_none());
}

#[tokio::test]
async fn test_recv_after_peer_close_is_connection_lost() {
    let (server, client) = pair().await;
    client.close().await.unwrap();
    drop(client);

    let err = recv_message(&server, WAIT).await.unwrap_err();
    assert!(matches!(err, DecodeError::Closed));
    assert!(err.is_connection_lost());
}

#[tokio::test]
async fn test_recv_garbage_is_malformed_and_connection_survives() {
    let (server, client) = pair().await;

    client.send(b"definitely not json").await.unwrap();
    let err = recv_message(&server, WAIT).await.unwrap_err();
    assert!(matches!(err, DecodeError::Malformed(_)));
    assert!(!err.is_connection_lost());

    // The next well-formed frame still comes through.
    send_message(&client, &Response::ok().into()).await.unwrap();
    let got = recv_message(&server, WAIT).await.unwrap();
    assert_eq!(got, Some(Message::Response(Response::ok())));
}

#[tokio::test]
async fn test_send_oversized_message_fails_before_writing() {
    let (_server, client) = pair().await;

    let text = "y".repeat(MAX_FRAME_LEN * 2);
    let result = send_message(&client, &Request::chat("a", "b", text).into()).await;
    assert!(result.is_err());
}
