mod chat;
mod lifecycle;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::middleware::auth::{bearer_token, cookie_token};
use crate::models::AuthUser;
use crate::ws::events::{ClientEvent, Destination, ServerEvent};
use crate::ws::gateway::ClientId;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayQuery {
    pub token: Option<String>,
    pub last_seen_message_id: Option<i64>,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// One live connection as seen by the frame handlers.
pub(crate) struct Session {
    pub client_id: ClientId,
    pub session_id: String,
    pub user: AuthUser,
}

impl Session {
    fn reply_destination(&self) -> Destination<'_> {
        Destination::Session(&self.session_id)
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(user) = extract_session(&state, &headers, query.token.as_deref()).await else {
        return (StatusCode::UNAUTHORIZED, "Not authenticated").into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, user, query))
}

async fn extract_session(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Option<AuthUser> {
    let token = query_token
        .map(str::to_string)
        .or_else(|| bearer_token(headers))
        .or_else(|| cookie_token(headers))?;

    if token.is_empty() {
        return None;
    }

    match crate::db::users::user_for_token(&state.db, &token).await {
        Ok(user) => user,
        Err(e) => {
            tracing::error!("session lookup failed: {e}");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user: AuthUser, query: GatewayQuery) {
    let client_id = state.gateway.next_client_id().await;
    let session = Session {
        client_id,
        session_id: uuid::Uuid::new_v4().to_string(),
        user,
    };
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    state
        .gateway
        .register(
            client_id,
            session.user.id.clone(),
            session.session_id.clone(),
            tx,
        )
        .await;

    // Task to forward messages from mpsc to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    lifecycle::on_connect(&state, &session, &query).await;

    // Receive loop
    let state_clone = state.clone();
    let session = Arc::new(session);
    let session_clone = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => {
                    let text_str: &str = &text;
                    match serde_json::from_str::<ClientEvent>(text_str) {
                        Ok(event) => handle_client_event(&state_clone, &session_clone, event).await,
                        Err(e) => {
                            tracing::debug!("unparseable client frame: {e}");
                            chat::reply_error(&state_clone, &session_clone, "BAD_FRAME", &e.to_string())
                                .await;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // The surviving task is stopped before disconnect runs: no client frame
    // may be handled after it
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => {
            send_task.abort();
            let _ = send_task.await;
        }
    }

    lifecycle::on_disconnect(&state, &session).await;
}

async fn handle_client_event(state: &AppState, session: &Session, event: ClientEvent) {
    match event {
        ClientEvent::JoinConversation { conversation_id } => {
            chat::handle_join(state, session, conversation_id).await;
        }
        ClientEvent::LeaveConversation { conversation_id } => {
            state
                .gateway
                .unsubscribe_conversation(session.client_id, &conversation_id)
                .await;
        }
        ClientEvent::SendMessage {
            conversation_id,
            content,
            message_type,
            reply_to_id,
            file_key,
        } => {
            let request = crate::models::SendMessageRequest {
                content,
                message_type,
                reply_to_id,
                file_key,
            };
            chat::handle_send_message(state, session, conversation_id, request).await;
        }
        ClientEvent::MarkRead { message_id } => {
            chat::handle_mark_read(state, session, message_id).await;
        }
        ClientEvent::AckDelivered { message_ids } => {
            chat::handle_ack_delivered(state, session, message_ids).await;
        }
        ClientEvent::TypingStart { conversation_id } => {
            chat::handle_typing(state, session, &conversation_id, true).await;
        }
        ClientEvent::TypingStop { conversation_id } => {
            chat::handle_typing(state, session, &conversation_id, false).await;
        }
        ClientEvent::ToggleReaction {
            message_id,
            reaction_type,
        } => {
            chat::handle_toggle_reaction(state, session, message_id, &reaction_type).await;
        }
        ClientEvent::Heartbeat => {
            lifecycle::on_heartbeat(state, session).await;
        }
        ClientEvent::Ping => {
            state
                .gateway
                .send_to(session.client_id, session.reply_destination(), &ServerEvent::Pong)
                .await;
        }
    }
}
