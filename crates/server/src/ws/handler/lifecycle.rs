use super::{GatewayQuery, Session};
use crate::ws::events::{Destination, ServerEvent};
use crate::AppState;

/// Register presence, then run the catch-up: `offline_sync`, the
/// `sync_complete` marker, and only then whatever live traffic arrived in
/// the meantime.
pub async fn on_connect(state: &AppState, session: &Session, query: &GatewayQuery) {
    let user_id = &session.user.id;

    state
        .gateway
        .send_to(
            session.client_id,
            session.reply_destination(),
            &ServerEvent::Ready {
                user_id: user_id.clone(),
                session_id: session.session_id.clone(),
            },
        )
        .await;

    match state.presence.connect(user_id, &session.session_id).await {
        Ok(true) => state.coordinator.presence_changed(user_id, true).await,
        Ok(false) => {}
        Err(e) => tracing::warn!(user_id = %user_id, "presence connect failed: {e}"),
    }

    let sync = state
        .coordinator
        .get_offline_sync(user_id, query.last_seen_message_id, query.last_sync_time)
        .await;

    let complete = match sync {
        Ok(result) => {
            let complete = ServerEvent::SyncComplete {
                message_count: result.total_messages,
                has_more: result.has_more,
                next_cursor: result.next_cursor,
            };
            state
                .gateway
                .send_to(
                    session.client_id,
                    Destination::UserOfflineSync(user_id),
                    &ServerEvent::OfflineSync { result },
                )
                .await;
            complete
        }
        Err(e) => {
            // Store stays authoritative; the next connect retries the sync
            tracing::warn!(user_id = %user_id, "offline sync failed: {e}");
            state
                .gateway
                .send_to(
                    session.client_id,
                    Destination::UserOfflineSync(user_id),
                    &ServerEvent::Error {
                        code: e.kind().to_string(),
                        message: e.to_string(),
                    },
                )
                .await;
            ServerEvent::SyncComplete {
                message_count: 0,
                has_more: false,
                next_cursor: None,
            }
        }
    };

    state
        .gateway
        .send_to(
            session.client_id,
            Destination::UserOfflineSync(user_id),
            &complete,
        )
        .await;

    let flushed = state.gateway.complete_sync(session.client_id).await;
    tracing::info!(user_id = %user_id, flushed, "client connected");
}

pub async fn on_heartbeat(state: &AppState, session: &Session) {
    let live = match state.presence.heartbeat(&session.session_id).await {
        Ok(Some(_)) => true,
        Ok(None) => {
            // Swept while the socket stayed open; register again unless the
            // socket is already closing
            if !state.gateway.is_registered(session.client_id).await {
                return;
            }
            if let Ok(true) = state
                .presence
                .connect(&session.user.id, &session.session_id)
                .await
            {
                state
                    .coordinator
                    .presence_changed(&session.user.id, true)
                    .await;
            }
            false
        }
        Err(e) => {
            tracing::warn!("presence heartbeat failed: {e}");
            false
        }
    };

    state
        .gateway
        .send_to(
            session.client_id,
            session.reply_destination(),
            &ServerEvent::HeartbeatAck { live },
        )
        .await;
}

pub async fn on_disconnect(state: &AppState, session: &Session) {
    state.gateway.unregister(session.client_id).await;

    let user_id = &session.user.id;
    match state.presence.disconnect(user_id, &session.session_id).await {
        Ok(true) => state.coordinator.presence_changed(user_id, false).await,
        Ok(false) => {}
        Err(e) => tracing::warn!(user_id = %user_id, "presence disconnect failed: {e}"),
    }
    tracing::info!(user_id = %user_id, "client disconnected");
}
