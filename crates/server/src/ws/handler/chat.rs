use super::Session;
use crate::error::ChatError;
use crate::models::SendMessageRequest;
use crate::ws::events::ServerEvent;
use crate::AppState;

pub async fn reply_error(state: &AppState, session: &Session, code: &str, message: &str) {
    state
        .gateway
        .send_to(
            session.client_id,
            session.reply_destination(),
            &ServerEvent::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        )
        .await;
}

async fn reply_chat_error(state: &AppState, session: &Session, error: ChatError) {
    if let ChatError::Database(e) = &error {
        tracing::error!("gateway operation failed: {e}");
    }
    reply_error(state, session, error.kind(), &error.to_string()).await;
}

async fn reply(state: &AppState, session: &Session, event: ServerEvent) {
    state
        .gateway
        .send_to(session.client_id, session.reply_destination(), &event)
        .await;
}

/// Subscribe to a conversation's broadcast channel and mark everything in it
/// read. Membership is checked by the bulk read before subscribing.
pub async fn handle_join(state: &AppState, session: &Session, conversation_id: String) {
    match state
        .coordinator
        .mark_all_read_on_join(&session.user.id, &conversation_id)
        .await
    {
        Ok(marked_read) => {
            if !state
                .gateway
                .subscribe_conversation(session.client_id, &conversation_id)
                .await
            {
                // Connection is already closing
                return;
            }
            reply(
                state,
                session,
                ServerEvent::Joined {
                    conversation_id,
                    marked_read,
                },
            )
            .await;
        }
        Err(e) => reply_chat_error(state, session, e).await,
    }
}

pub async fn handle_send_message(
    state: &AppState,
    session: &Session,
    conversation_id: String,
    request: SendMessageRequest,
) {
    match state
        .coordinator
        .send(&session.user.id, &conversation_id, request)
        .await
    {
        Ok(message) => {
            reply(
                state,
                session,
                ServerEvent::MessageAck {
                    conversation_id,
                    message_id: message.id,
                },
            )
            .await;
        }
        Err(e) => reply_chat_error(state, session, e).await,
    }
}

pub async fn handle_mark_read(state: &AppState, session: &Session, message_id: i64) {
    match state.coordinator.mark_read(&session.user.id, message_id).await {
        Ok(changed) => reply(state, session, ServerEvent::ReadAck { message_id, changed }).await,
        Err(e) => reply_chat_error(state, session, e).await,
    }
}

pub async fn handle_ack_delivered(state: &AppState, session: &Session, message_ids: Vec<i64>) {
    match state
        .coordinator
        .mark_delivered(&session.user.id, &message_ids)
        .await
    {
        Ok(advanced) => {
            reply(
                state,
                session,
                ServerEvent::DeliveredAck {
                    message_ids: advanced,
                },
            )
            .await
        }
        Err(e) => reply_chat_error(state, session, e).await,
    }
}

pub async fn handle_typing(state: &AppState, session: &Session, conversation_id: &str, active: bool) {
    if let Err(e) = state
        .coordinator
        .typing(&session.user.id, conversation_id, active)
        .await
    {
        reply_chat_error(state, session, e).await;
    }
}

pub async fn handle_toggle_reaction(
    state: &AppState,
    session: &Session,
    message_id: i64,
    reaction_type: &str,
) {
    if let Err(e) = state
        .coordinator
        .toggle_reaction(&session.user.id, message_id, reaction_type)
        .await
    {
        reply_chat_error(state, session, e).await;
    }
}
