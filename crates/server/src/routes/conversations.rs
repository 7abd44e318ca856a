use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::error::ChatError;
use crate::models::{
    AddMemberRequest, AuthUser, CreateGroupRequest, MessageQuery, OpenDirectRequest,
    SendMessageRequest,
};
use crate::AppState;

/// GET /api/conversations
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ChatError> {
    let conversations = state.coordinator.list_conversations(&user.id).await?;
    Ok(Json(conversations))
}

/// POST /api/conversations/direct
pub async fn open_direct(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<OpenDirectRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let conversation = state.coordinator.open_direct(&user.id, &body.user_id).await?;
    Ok(Json(conversation))
}

/// POST /api/conversations/group
pub async fn create_group(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let conversation = state.coordinator.create_group(&user.id, body).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// POST /api/conversations/:conversationId/members
pub async fn add_member(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(conversation_id): Path<String>,
    Json(body): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let member = state
        .coordinator
        .add_member(&user.id, &conversation_id, &body.user_id)
        .await?;
    Ok(Json(member))
}

/// DELETE /api/conversations/:conversationId/members/:userId
pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((conversation_id, member_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ChatError> {
    state
        .coordinator
        .remove_member(&user.id, &conversation_id, &member_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/conversations/:conversationId/messages
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(conversation_id): Path<String>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ChatError> {
    let page = state
        .coordinator
        .list_messages(&user.id, &conversation_id, query.before, query.limit)
        .await?;
    Ok(Json(page))
}

/// POST /api/conversations/:conversationId/messages
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(conversation_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let message = state
        .coordinator
        .send(&user.id, &conversation_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /api/users/:userId/messages
pub async fn send_direct(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(recipient_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let message = state
        .coordinator
        .send_direct(&user.id, &recipient_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /api/conversations/:conversationId/read-all
pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ChatError> {
    let message_ids = state
        .coordinator
        .mark_all_read_on_join(&user.id, &conversation_id)
        .await?;
    Ok(Json(serde_json::json!({ "messageIds": message_ids })))
}
