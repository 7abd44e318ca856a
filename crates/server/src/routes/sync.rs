use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::error::ChatError;
use crate::models::{AuthUser, PresenceResponse, SyncQuery};
use crate::AppState;

/// GET /api/sync
///
/// Same catch-up the gateway runs on connect, for clients that poll.
pub async fn offline_sync(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<SyncQuery>,
) -> Result<impl IntoResponse, ChatError> {
    let result = state
        .coordinator
        .get_offline_sync(&user.id, query.last_seen_message_id, query.last_sync_time)
        .await?;
    Ok(Json(result))
}

/// GET /api/users/:userId/presence
pub async fn presence(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let online = state.presence.is_online(&user_id).await;
    Json(PresenceResponse { user_id, online })
}
