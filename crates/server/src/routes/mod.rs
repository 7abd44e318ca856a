pub mod conversations;
pub mod messages;
pub mod sync;

use crate::ws;
use crate::AppState;
use axum::{routing::{delete, get, patch, post}, Router};
use std::sync::Arc;

pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Conversations
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/direct", post(conversations::open_direct))
        .route("/conversations/group", post(conversations::create_group))
        .route("/conversations/{conversationId}/members", post(conversations::add_member))
        .route(
            "/conversations/{conversationId}/members/{userId}",
            delete(conversations::remove_member),
        )
        .route("/conversations/{conversationId}/messages", get(conversations::list_messages))
        .route("/conversations/{conversationId}/messages", post(conversations::send_message))
        .route("/conversations/{conversationId}/read-all", post(conversations::mark_all_read))
        // Messages
        .route("/messages/delivered", post(messages::mark_delivered))
        .route("/messages/{messageId}", patch(messages::edit_message))
        .route("/messages/{messageId}", delete(messages::delete_message))
        .route("/messages/{messageId}/read", post(messages::mark_read))
        .route("/messages/{messageId}/reactions", post(messages::toggle_reaction))
        // Users
        .route("/users/{userId}/messages", post(conversations::send_direct))
        .route("/users/{userId}/presence", get(sync::presence))
        // Sync
        .route("/sync", get(sync::offline_sync));

    Router::new()
        .nest("/api", api_routes)
        .route("/gateway", get(ws::handler::ws_handler))
        .with_state(state)
}
