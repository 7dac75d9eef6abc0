//! WebSocket server integration tests.
//!
//! A real listener on a loopback port, driven by tungstenite clients, with
//! the in-memory store behind the engine.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::{sessions, status, FakeStore};
use futures_util::{SinkExt, StreamExt};
use protocol::{Command, CommandAction, Message};
use relay::{EngineHandle, RelayEngine, RelaySettings, WebSocketServer};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    engine: EngineHandle,
    shutdown: CancellationToken,
}

async fn start_server(store: FakeStore) -> TestServer {
    let (engine, _task) = RelayEngine::new(store, RelaySettings::default()).spawn();
    let server = WebSocketServer::bind("127.0.0.1:0", engine.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.serve(shutdown.clone()));
    TestServer {
        addr,
        engine,
        shutdown,
    }
}

async fn connect(server: &TestServer) -> Client {
    let (ws, _) = connect_async(format!("ws://{}", server.addr)).await.unwrap();
    ws
}

/// Reads frames until the next relay message.
async fn next_message(ws: &mut Client) -> Message {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("read error");
        if let WsMessage::Text(text) = frame {
            return Message::from_json(&text).unwrap();
        }
    }
}

/// Connects and consumes the initial sessions and status messages.
async fn connect_ready(server: &TestServer) -> Client {
    let mut ws = connect(server).await;
    next_message(&mut ws).await;
    next_message(&mut ws).await;
    ws
}

async fn send(ws: &mut Client, msg: &Message) {
    ws.send(WsMessage::Text(msg.to_json().unwrap())).await.unwrap();
}

async fn assert_silent(ws: &mut Client) {
    let result = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "unexpected frame: {:?}", result);
}

fn ping() -> Message {
    Message::Command(Command::new(CommandAction::Ping))
}

#[tokio::test]
async fn test_new_client_receives_listing_and_status() {
    let server = start_server(FakeStore::with_sessions(&["main", "work"])).await;
    let mut ws = connect(&server).await;

    assert_eq!(next_message(&mut ws).await, sessions(&["main", "work"], None));
    assert_eq!(next_message(&mut ws).await, status(None, false));
}

#[tokio::test]
async fn test_ping_is_answered_to_sender_only() {
    let server = start_server(FakeStore::default()).await;
    let mut a = connect_ready(&server).await;
    let mut b = connect_ready(&server).await;

    send(&mut a, &ping()).await;

    assert_eq!(next_message(&mut a).await, Message::Pong);
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn test_undecodable_messages_keep_connection_open() {
    let server = start_server(FakeStore::default()).await;
    let mut ws = connect_ready(&server).await;

    ws.send(WsMessage::Text("not json".to_string())).await.unwrap();
    ws.send(WsMessage::Text(r#"{"type":"bogus"}"#.to_string()))
        .await
        .unwrap();
    ws.send(WsMessage::Text(r#"{"content":"no tag"}"#.to_string()))
        .await
        .unwrap();
    send(&mut ws, &ping()).await;

    assert_eq!(next_message(&mut ws).await, Message::Pong);
}

#[tokio::test]
async fn test_binary_frame_is_decoded_as_text() {
    let server = start_server(FakeStore::default()).await;
    let mut ws = connect_ready(&server).await;

    ws.send(WsMessage::Binary(vec![0xff, 0x00])).await.unwrap();
    let json = ping().to_json().unwrap();
    ws.send(WsMessage::Binary(json.into_bytes())).await.unwrap();

    assert_eq!(next_message(&mut ws).await, Message::Pong);
}

#[tokio::test]
async fn test_attach_is_broadcast_to_every_client() {
    let store = FakeStore::with_sessions(&["work"]);
    store.set_screen("work", "$ whoami\nrelay\n");
    let server = start_server(store).await;
    let mut a = connect_ready(&server).await;
    let mut b = connect_ready(&server).await;

    let attach = Message::Command(Command::new(CommandAction::Attach).with_session("work"));
    send(&mut a, &attach).await;

    for ws in [&mut a, &mut b] {
        assert_eq!(next_message(ws).await, Message::output("$ whoami\nrelay"));
        assert_eq!(next_message(ws).await, sessions(&["work"], Some("work")));
        assert_eq!(next_message(ws).await, status(Some("work"), false));
    }
}

#[tokio::test]
async fn test_input_reaches_the_store() {
    let store = FakeStore::with_sessions(&["work"]);
    let server = start_server(store.clone()).await;
    let mut ws = connect_ready(&server).await;

    let attach = Message::Command(Command::new(CommandAction::Attach).with_session("work"));
    send(&mut ws, &attach).await;
    for _ in 0..3 {
        next_message(&mut ws).await;
    }

    send(&mut ws, &Message::input("", Some("C-c".to_string()))).await;
    send(&mut ws, &ping()).await;
    assert_eq!(next_message(&mut ws).await, Message::Pong);

    assert!(store.sends().contains(&common::Call::SendKey {
        session: "work".to_string(),
        key: "C-c".to_string(),
    }));
}

#[tokio::test]
async fn test_disconnect_unregisters_client() {
    let server = start_server(FakeStore::default()).await;
    let mut a = connect_ready(&server).await;
    let b = connect_ready(&server).await;
    drop(b);

    tokio::time::sleep(Duration::from_millis(100)).await;
    send(&mut a, &Message::Command(Command::new(CommandAction::List))).await;
    assert_eq!(next_message(&mut a).await, sessions(&[], None));
    assert!(!server.engine.is_closed());
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let server = start_server(FakeStore::default()).await;
    let mut ws = connect_ready(&server).await;

    server.shutdown.cancel();

    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
