#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use taskchat_server::AppState;
use tokio_tungstenite::tungstenite::Message;

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start the test app on a random TCP port and return the base URL.
pub async fn start_server() -> (String, sqlx::SqlitePool, Arc<AppState>) {
    let pool = super::setup_test_db().await;
    let state = super::create_test_state(pool.clone());
    let app = taskchat_server::routes::build_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://127.0.0.1:{}", addr.port());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (base, pool, state)
}

/// Connect a WebSocket with a session token and extra query parameters.
pub async fn ws_connect_with(base: &str, token: &str, extra_query: &str) -> WsStream {
    let ws_url = format!(
        "{}/gateway?token={}{}",
        base.replace("http://", "ws://"),
        token,
        extra_query
    );
    let (ws, _) = tokio_tungstenite::connect_async(&ws_url).await.unwrap();
    ws
}

/// Connect a WebSocket with a session token.
pub async fn ws_connect(base: &str, token: &str) -> WsStream {
    ws_connect_with(base, token, "").await
}

/// Connect and consume frames up to and including `sync_complete`.
/// Returns the catch-up frames.
pub async fn ws_connect_synced(base: &str, token: &str) -> (WsStream, Vec<Value>) {
    let mut ws = ws_connect(base, token).await;
    let frames = recv_until(&mut ws, "sync_complete").await;
    (ws, frames)
}

/// Read next text message parsed as JSON, with timeout.
pub async fn recv_json(ws: &mut WsStream) -> Option<Value> {
    let timeout = tokio::time::timeout(std::time::Duration::from_secs(3), ws.next()).await;
    match timeout {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str(&text).ok(),
        _ => None,
    }
}

/// Read frames until one of the given type arrives (inclusive).
pub async fn recv_until(ws: &mut WsStream, frame_type: &str) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Some(frame) = recv_json(ws).await {
        let done = frame["type"] == frame_type;
        frames.push(frame);
        if done {
            break;
        }
    }
    frames
}

/// Drain all pending messages until timeout.
pub async fn drain_messages(ws: &mut WsStream) -> Vec<Value> {
    let mut messages = Vec::new();
    loop {
        let timeout =
            tokio::time::timeout(std::time::Duration::from_millis(200), ws.next()).await;
        match timeout {
            Ok(Some(Ok(Message::Text(text)))) => {
                if let Ok(v) = serde_json::from_str::<Value>(&text) {
                    messages.push(v);
                }
            }
            _ => break,
        }
    }
    messages
}

/// Send a JSON message over WebSocket.
pub async fn send_json(ws: &mut WsStream, value: &Value) {
    ws.send(Message::Text(serde_json::to_string(value).unwrap().into()))
        .await
        .unwrap();
}
