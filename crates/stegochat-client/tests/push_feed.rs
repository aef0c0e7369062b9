mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::sync::mpsc;
use tokio::time::timeout;

use stegochat_client::config::ClientConfig;
use stegochat_client::error::ClientError;
use stegochat_client::push::{FeedEvent, PushFeed};
use stegochat_types::events::PushEvent;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct WsServer {
    frames: mpsc::UnboundedSender<String>,
    connections: Arc<AtomicUsize>,
    /// Close the socket right away for the first N connections.
    drop_first: usize,
}

async fn ws_route(
    ws: WebSocketUpgrade,
    Path(user_id): Path<i64>,
    Query(q): Query<HashMap<String, String>>,
    State(server): State<WsServer>,
) -> impl IntoResponse {
    assert_eq!(user_id, common::ME);
    assert_eq!(q.get("token").map(String::as_str), Some("test-token"));
    ws.on_upgrade(move |socket| serve_socket(socket, server))
}

async fn serve_socket(mut socket: WebSocket, server: WsServer) {
    let n = server.connections.fetch_add(1, Ordering::SeqCst);
    if n < server.drop_first {
        let _ = socket.send(WsMessage::Close(None)).await;
        return;
    }

    let frame = serde_json::json!({
        "type": "message.created",
        "message": {
            "id": 11, "sender_id": 2, "receiver_id": common::ME,
            "content": "hi", "message_type": "text",
            "created_at": "2024-05-01T08:00:00"
        }
    });
    let _ = socket.send(WsMessage::Text("{not json".into())).await;
    let _ = socket.send(WsMessage::Text(r#"{"type":"typing"}"#.into())).await;
    let _ = socket.send(WsMessage::Text(frame.to_string().into())).await;

    // Wait for one keep-alive, then hang up.
    while let Some(Ok(msg)) = socket.recv().await {
        if let WsMessage::Text(text) = msg {
            let _ = server.frames.send(text.as_str().to_string());
            break;
        }
    }
    let _ = socket.send(WsMessage::Close(None)).await;
}

async fn start(drop_first: usize) -> (ClientConfig, mpsc::UnboundedReceiver<String>, Arc<AtomicUsize>) {
    let (frames, rx) = mpsc::unbounded_channel();
    let connections = Arc::new(AtomicUsize::new(0));
    let server = WsServer {
        frames,
        connections: connections.clone(),
        drop_first,
    };
    let router = Router::new()
        .route("/ws/{user_id}", get(ws_route))
        .with_state(server);
    let addr = common::serve(router).await;

    let mut config = ClientConfig::new(&format!("http://{}", addr)).unwrap();
    config.keepalive_interval = Duration::from_millis(50);
    config.reconnect.initial_delay = Duration::from_millis(10);
    config.reconnect.max_delay = Duration::from_millis(50);
    (config, rx, connections)
}

async fn next(feed: &mut PushFeed) -> Option<FeedEvent> {
    timeout(WAIT, feed.next()).await.expect("feed stalled")
}

#[tokio::test]
async fn delivers_events_and_sends_keepalive() {
    let (mut config, mut frames, _) = start(0).await;
    config.reconnect.enabled = false;
    let mut feed = PushFeed::connect(&config, &common::session()).unwrap();

    assert!(matches!(next(&mut feed).await, Some(FeedEvent::Connected { .. })));

    // Malformed and unknown frames never reach the consumer.
    match next(&mut feed).await {
        Some(FeedEvent::Event(PushEvent::MessageCreated { message })) => {
            assert_eq!(message.id, 11);
        }
        other => panic!("expected message event, got {:?}", other),
    }

    let keepalive = timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(keepalive, "ping");

    assert!(matches!(
        next(&mut feed).await,
        Some(FeedEvent::Disconnected { error: ClientError::PushChannel(_) })
    ));
    // No reconnect: the feed ends.
    assert!(next(&mut feed).await.is_none());
}

#[tokio::test]
async fn reconnects_after_server_hangup() {
    let (config, _frames, connections) = start(1).await;
    let mut feed = PushFeed::connect(&config, &common::session()).unwrap();

    assert!(matches!(next(&mut feed).await, Some(FeedEvent::Connected { .. })));
    assert!(matches!(next(&mut feed).await, Some(FeedEvent::Disconnected { .. })));
    assert!(matches!(next(&mut feed).await, Some(FeedEvent::Connected { .. })));
    assert!(connections.load(Ordering::SeqCst) >= 2);

    feed.close().await;
}

#[tokio::test]
async fn close_stops_the_feed() {
    let (config, _frames, _) = start(0).await;
    let mut feed = PushFeed::connect(&config, &common::session()).unwrap();
    assert!(matches!(next(&mut feed).await, Some(FeedEvent::Connected { .. })));
    timeout(WAIT, feed.close()).await.expect("close hung");
}

#[tokio::test]
async fn unreachable_server_reports_push_channel_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = ClientConfig::new(&format!("http://{}", addr)).unwrap();
    config.reconnect.enabled = false;
    let mut feed = PushFeed::connect(&config, &common::session()).unwrap();

    match next(&mut feed).await {
        Some(FeedEvent::Disconnected { error: ClientError::PushChannel(_) }) => {}
        other => panic!("expected push channel error, got {:?}", other),
    }
    assert!(next(&mut feed).await.is_none());
}
