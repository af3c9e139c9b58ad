//! End-to-end tests over a loopback TCP socket.

#![allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use relaymail_smtp::{
    Address, AuthMethod, ClientState, ErrorKind, Message, Session, SessionConfig,
};

/// Accepts one client, answers each command line from `script` and returns
/// every line the client sent.
async fn serve(script: Vec<(&'static str, &'static str)>) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut received = Vec::new();

        write.write_all(b"220 loopback ESMTP\r\n").await.unwrap();
        for (expected_prefix, answer) in script {
            let Some(line) = lines.next_line().await.unwrap() else {
                break;
            };
            assert!(
                line.starts_with(expected_prefix),
                "expected {expected_prefix:?}, got {line:?}"
            );
            received.push(line);
            if !answer.is_empty() {
                write.write_all(answer.as_bytes()).await.unwrap();
            }
        }
        received
    });

    (port, handle)
}

fn config(port: u16) -> SessionConfig {
    SessionConfig::builder("127.0.0.1")
        .port(port)
        .client_name("client.test")
        .response_timeout(Duration::from_secs(2))
        .build()
}

#[tokio::test]
async fn send_over_loopback() {
    let (port, server) = serve(vec![
        ("EHLO client.test", "250-loopback\r\n250 AUTH LOGIN\r\n"),
        ("AUTH LOGIN", "334 VXNlcm5hbWU6\r\n"),
        ("dXNlcg==", "334 UGFzc3dvcmQ6\r\n"),
        ("cGFzcw==", "235 ok\r\n"),
        ("MAIL FROM:<me@client.test>", "250 ok\r\n"),
        ("RCPT TO:<you@loopback>", "250 ok\r\n"),
        ("DATA", "354 go ahead\r\n"),
        ("Subject: hi", ""),
        ("", ""),
        ("..leading dot", ""),
        (".", "250 queued\r\n"),
        ("QUIT", "221 bye\r\n"),
    ])
    .await;

    let mut session = Session::new(config(port));
    session.connect().await.unwrap();
    session.login("user", "pass", AuthMethod::Login).await.unwrap();

    let message = Message::new(
        Address::new("me@client.test").unwrap(),
        "Subject: hi\n\n.leading dot\n",
    )
    .to(Address::new("you@loopback").unwrap());
    let report = session.send_mail(&message).await.unwrap();
    assert_eq!(report.accepted.len(), 1);

    session.quit().await;
    assert_eq!(session.state(), ClientState::Unconnected);

    let received = server.await.unwrap();
    assert_eq!(received.len(), 12);
    assert_eq!(received[10], ".");
}

#[tokio::test]
async fn refused_connection_is_socket_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut session = Session::new(config(port));
    let err = session.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SocketError);
    assert_eq!(session.state(), ClientState::Unconnected);
}

#[tokio::test]
async fn server_drop_mid_session() {
    let (port, server) = serve(vec![("EHLO", "250 loopback\r\n"), ("MAIL FROM", "")]).await;

    let mut session = Session::new(config(port));
    session.connect().await.unwrap();

    let message = Message::new(Address::new("me@client.test").unwrap(), "body")
        .to(Address::new("you@loopback").unwrap());
    let err = session.send_mail(&message).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SocketError);
    assert_eq!(session.state(), ClientState::Unconnected);

    server.await.unwrap();
}
