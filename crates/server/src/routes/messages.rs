use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ChatError;
use crate::models::{AuthUser, EditMessageRequest, ToggleReactionRequest};
use crate::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredRequest {
    pub message_ids: Vec<i64>,
}

/// PATCH /api/messages/:messageId
pub async fn edit_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(message_id): Path<i64>,
    Json(body): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let message = state
        .coordinator
        .edit_message(&user.id, message_id, &body.content)
        .await?;
    Ok(Json(message))
}

/// DELETE /api/messages/:messageId
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse, ChatError> {
    state.coordinator.delete_message(&user.id, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/messages/:messageId/read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse, ChatError> {
    let changed = state.coordinator.mark_read(&user.id, message_id).await?;
    Ok(Json(serde_json::json!({ "changed": changed })))
}

/// POST /api/messages/delivered
pub async fn mark_delivered(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<DeliveredRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let advanced = state
        .coordinator
        .mark_delivered(&user.id, &body.message_ids)
        .await?;
    Ok(Json(serde_json::json!({ "messageIds": advanced })))
}

/// POST /api/messages/:messageId/reactions
pub async fn toggle_reaction(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(message_id): Path<i64>,
    Json(body): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let event = state
        .coordinator
        .toggle_reaction(&user.id, message_id, &body.reaction_type)
        .await?;
    Ok(Json(event))
}
