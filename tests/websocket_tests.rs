//! Loopback tests for the WebSocket stack
//!
//! A client connection and a server connection talk over a real TCP socket
//! with permessage-deflate negotiated, exercising handshake, framing,
//! fragmentation and compression together.

use std::net::TcpListener;
use std::time::Duration;

use reqwest::Url;

use kernelbox::deadline::Deadline;
use kernelbox::ws::handshake::{server_handshake, server_handshake_blocking};
use kernelbox::ws::{
    AsyncClient, AsyncConnection, BlockingClient, BlockingConnection, ClientDeflateFactory,
    ConnectionConfig, Message, Role, ServerDeflateFactory, WsError,
};

fn small_frames() -> ConnectionConfig {
    ConnectionConfig {
        frame_size: 64,
        ..ConnectionConfig::default()
    }
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(5))
}

/// Test a compressed, fragmented echo over blocking connections
#[test]
fn test_blocking_echo_with_deflate() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let (stream, extensions) =
            server_handshake_blocking(stream, Some(&ServerDeflateFactory::default())).unwrap();
        let negotiated = extensions.len();
        let mut conn = BlockingConnection::new(stream, Role::Server, extensions, small_frames());
        let text = conn.recv(&deadline()).unwrap().into_text().unwrap();
        conn.send_text(&text.to_uppercase()).unwrap();
        conn.close().unwrap();
        negotiated
    });

    let url = Url::parse(&format!("ws://127.0.0.1:{port}/api/kernels/k/channels")).unwrap();
    let mut client =
        BlockingClient::connect(&url, Some(&ClientDeflateFactory::default()), small_frames())
            .unwrap();
    assert_eq!(client.extensions(), vec!["permessage-deflate"]);

    let payload = "print('hello world')\n".repeat(40);
    client.send_text(&payload).unwrap();
    let reply = client.recv(&deadline()).unwrap();
    assert_eq!(reply, Message::Text(payload.to_uppercase()));

    // the server closes after replying
    let err = client.recv(&deadline()).unwrap_err();
    assert!(err.is_connection_closed());
    assert!(client.is_closed());
    assert_eq!(server.join().unwrap(), 1);
}

/// Test that a silent peer trips the read deadline
#[test]
fn test_blocking_read_deadline() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let (_stream, _) = server_handshake_blocking(stream, None).unwrap();
        // hold the socket open without sending anything
        std::thread::sleep(Duration::from_millis(300));
    });

    let url = Url::parse(&format!("ws://127.0.0.1:{port}/")).unwrap();
    let mut client = BlockingClient::connect(&url, None, ConnectionConfig::default()).unwrap();
    assert!(client.extensions().is_empty());

    let err = client.recv(&Deadline::after(Duration::from_millis(50))).unwrap_err();
    assert!(matches!(err, WsError::Timeout(_)));
    server.join().unwrap();
}

/// Test a compressed echo over async connections
#[tokio::test]
async fn test_async_echo_with_deflate() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (stream, extensions) = server_handshake(stream, Some(&ServerDeflateFactory::default()))
            .await
            .unwrap();
        let mut conn = AsyncConnection::new(stream, Role::Server, extensions, small_frames());
        for _ in 0..2 {
            let text = conn.recv(&deadline()).await.unwrap().into_text().unwrap();
            conn.send_text(&format!("echo: {text}")).await.unwrap();
        }
    });

    let url = Url::parse(&format!("ws://127.0.0.1:{port}/api/kernels/k/channels")).unwrap();
    let mut client =
        AsyncClient::connect(&url, Some(&ClientDeflateFactory::default()), small_frames())
            .await
            .unwrap();

    // two messages: the second reuses the compression context
    for text in ["x = 1", "x = 1"] {
        client.send_text(text).await.unwrap();
        let reply = client.recv(&deadline()).await.unwrap();
        assert_eq!(reply, Message::Text(format!("echo: {text}")));
    }
    server.await.unwrap();
}
