//! End-to-end tests of the sync channel over a real socket.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lvs_server::{LiveServer, ServerConfig, SyncSettings};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TIMEOUT: Duration = Duration::from_secs(10);

async fn serve(root: &Path, sync: SyncSettings) -> (LiveServer, SocketAddr) {
    let config = ServerConfig {
        root: root.to_path_buf(),
        workers: 1,
        rate_limit: Duration::ZERO,
        debounce: Duration::from_millis(20),
        sync,
        ..ServerConfig::default()
    };
    let server = LiveServer::build(&config).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (server, addr)
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/__lvs/ws"))
        .await
        .unwrap();
    socket
}

async fn next_text(socket: &mut Socket) -> String {
    loop {
        let message = tokio::time::timeout(TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return text.as_str().to_owned();
        }
    }
}

/// Read until `expected` arrives, skipping anything else.
async fn expect_text(socket: &mut Socket, expected: &str) {
    loop {
        if next_text(socket).await == expected {
            return;
        }
    }
}

async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn test_greeting_and_remote_logs() {
    let dir = tempfile::tempdir().unwrap();
    let (server, addr) = serve(
        dir.path(),
        SyncSettings {
            remote_logs: true,
            ..SyncSettings::default()
        },
    )
    .await;

    let mut socket = connect(addr).await;
    assert_eq!(next_text(&mut socket).await, "connected");
    assert_eq!(next_text(&mut socket).await, "initRemoteLogs");

    wait_for(|| server.clients().len() == 1).await;

    // Malformed messages leave the channel open.
    socket.send(Message::text("not json")).await.unwrap();
    socket
        .send(Message::text(r#"{"console":{"type":"warn","message":["careful"]}}"#))
        .await
        .unwrap();
    socket
        .send(Message::text(r#"{"file":"/index.html"}"#))
        .await
        .unwrap();
    wait_for(|| server.clients().is_displayed("index.html")).await;

    socket.close(None).await.unwrap();
    wait_for(|| server.clients().is_empty()).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_stylesheet_burst_refreshes_once() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.css"), "body {}").unwrap();
    let (server, addr) = serve(dir.path(), SyncSettings::default()).await;

    let mut socket = connect(addr).await;
    assert_eq!(next_text(&mut socket).await, "connected");
    wait_for(|| server.clients().len() == 1).await;

    for n in 0..5 {
        std::fs::write(dir.path().join("main.css"), format!("body {{ margin: {n}px }}")).unwrap();
    }
    assert_eq!(next_text(&mut socket).await, "refreshcss");

    let extra = tokio::time::timeout(Duration::from_millis(500), socket.next()).await;
    assert!(extra.is_err(), "unexpected second message: {extra:?}");
    server.shutdown().await;
}

#[tokio::test]
async fn test_markup_edit_hot_patches_displaying_client() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("index.html"),
        "<html><body><p>old</p></body></html>",
    )
    .unwrap();
    let (server, addr) = serve(dir.path(), SyncSettings::default()).await;

    let mut socket = connect(addr).await;
    assert_eq!(next_text(&mut socket).await, "connected");
    socket
        .send(Message::text(r#"{"file":"/index.html"}"#))
        .await
        .unwrap();
    wait_for(|| server.clients().is_displayed("index.html")).await;

    std::fs::write(
        dir.path().join("index.html"),
        "<html><body><p>new</p></body></html>",
    )
    .unwrap();
    expect_text(&mut socket, r#"{"body":"<p>new</p>","hot":true}"#).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_status_counts_clients() {
    let dir = tempfile::tempdir().unwrap();
    let (server, addr) = serve(dir.path(), SyncSettings::default()).await;

    let _a = connect(addr).await;
    let _b = connect(addr).await;
    wait_for(|| server.clients().len() == 2).await;

    let body = reqwest::get(format!("http://{addr}/__lvs/status"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let status: lvs_protocol::StatusResponse = serde_json::from_str(&body).unwrap();
    assert!(status.ready);
    assert_eq!(status.clients, 2);
    server.shutdown().await;
}
