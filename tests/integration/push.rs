mod common;

use common::{message_json, tokens};
use futures_util::{SinkExt, StreamExt};
use operator_console::config::{PushConfig, SessionConfig};
use operator_console::push::{run_push_connection, ConnectionEnd, EventBus, PushClient, PushCommand, PushEvent};
use operator_console::session::SessionManager;
use operator_console::storage::MemoryStore;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    (listener, url)
}

fn frame(event: &str, data: Value) -> WsMessage {
    WsMessage::Text(json!({"event": event, "data": data}).to_string())
}

#[tokio::test]
async fn test_connection_joins_rooms_and_relays_frames() {
    let (listener, url) = listener().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut received = Vec::new();
        if let Some(Ok(WsMessage::Text(text))) = ws.next().await {
            received.push(serde_json::from_str::<Value>(&text).unwrap());
        }
        ws.send(frame("bogus:event", json!({}))).await.unwrap();
        ws.send(frame(
            "message:new",
            message_json("m1", "c1", "2024-05-01T09:00:00Z", "INBOUND", "hi"),
        ))
        .await
        .unwrap();
        while let Some(Ok(message)) = ws.next().await {
            match message {
                WsMessage::Text(text) => received.push(serde_json::from_str::<Value>(&text).unwrap()),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
        received
    });

    let bus = EventBus::new(16);
    let mut events = bus.stream();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut rooms: HashSet<String> = ["c1".to_string()].into_iter().collect();
    let connected = AtomicBool::new(false);

    let driver = async move {
        let event = events.recv().await.unwrap();
        match event {
            PushEvent::MessageNew(payload) => assert_eq!(payload.id, "m1"),
            other => panic!("unexpected event {other:?}"),
        }
        tx.send(PushCommand::join("c2")).unwrap();
        tx.send(PushCommand::leave("c1")).unwrap();
        tx.send(PushCommand::typing_start("c2")).unwrap();
    };
    let (end, ()) = tokio::join!(
        run_push_connection(&url, &bus, &mut rx, &mut rooms, &connected),
        driver
    );

    assert_eq!(end.unwrap(), ConnectionEnd::Shutdown);
    assert_eq!(rooms, ["c2".to_string()].into_iter().collect());
    assert!(!connected.load(std::sync::atomic::Ordering::SeqCst));

    let received = server.await.unwrap();
    assert_eq!(
        received,
        vec![
            json!({"event": "conversation:join", "data": {"conversationId": "c1"}}),
            json!({"event": "conversation:join", "data": {"conversationId": "c2"}}),
            json!({"event": "conversation:leave", "data": {"conversationId": "c1"}}),
            json!({"event": "typing:start", "data": {"conversationId": "c2"}}),
        ]
    );
}

#[tokio::test]
async fn test_server_close_ends_connection() {
    let (listener, url) = listener().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();
    });

    let bus = EventBus::new(4);
    let (_tx, mut rx) = mpsc::unbounded_channel();
    let mut rooms = HashSet::new();
    let connected = AtomicBool::new(false);

    let end = run_push_connection(&url, &bus, &mut rx, &mut rooms, &connected)
        .await
        .unwrap();
    assert_eq!(end, ConnectionEnd::Closed);
}

#[tokio::test]
async fn test_client_reconnects_with_current_token() {
    let (listener, url) = listener().await;
    let queries = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = queries.clone();
    tokio::spawn(async move {
        for attempt in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let seen = seen.clone();
            let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                let query = request.uri().query().unwrap_or_default().to_string();
                seen.lock().unwrap().push(query);
                Ok(response)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
            if attempt == 0 {
                ws.close(None).await.unwrap();
                continue;
            }
            ws.send(frame("user:online", json!({"userId": "u7"}))).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        }
    });

    let session = Arc::new(SessionManager::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryStore::new()),
        SessionConfig::default(),
    ));
    session.persist_session(&tokens("first", "refresh", "15m")).unwrap();
    let bus = Arc::new(EventBus::new(16));
    let mut events = bus.stream();
    let (tx, rx) = mpsc::unbounded_channel();
    let config = PushConfig {
        url,
        ..PushConfig::default()
    };
    let client = PushClient::spawn(&config, session.clone(), bus.clone(), rx);

    tokio::time::sleep(Duration::from_millis(200)).await;
    session.persist_session(&tokens("second", "refresh", "15m")).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        PushEvent::UserOnline(presence) => assert_eq!(presence.user_id, "u7"),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(client.is_connected());
    assert_eq!(
        *queries.lock().unwrap(),
        vec!["token=first".to_string(), "token=second".to_string()]
    );

    client.disconnect();
    drop(tx);
}
