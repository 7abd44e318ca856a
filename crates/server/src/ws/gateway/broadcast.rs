use super::{ClientId, GatewayState};
use crate::ws::events::{encode_frame, Destination, ServerEvent};

impl GatewayState {
    /// Push to every connection subscribed to a conversation, optionally
    /// skipping all connections of one user.
    pub async fn broadcast_conversation(
        &self,
        conversation_id: &str,
        destination: Destination<'_>,
        event: &ServerEvent,
        exclude_user: Option<&str>,
    ) {
        let Some(frame) = encode_frame(destination, event) else {
            return;
        };

        let subs = self.conversation_subs.read().await;
        let mut clients = self.clients.write().await;

        if let Some(subscriber_ids) = subs.get(conversation_id) {
            for cid in subscriber_ids {
                if let Some(client) = clients.get_mut(cid) {
                    if exclude_user == Some(client.user_id.as_str()) {
                        continue;
                    }
                    client.deliver(frame.clone());
                }
            }
        }
    }

    /// Push to a user's private channel on every live connection. When
    /// `skip_viewers_of` is set, connections already subscribed to that
    /// conversation are skipped; they get the conversation broadcast instead.
    pub async fn push_to_user(
        &self,
        user_id: &str,
        destination: Destination<'_>,
        event: &ServerEvent,
        skip_viewers_of: Option<&str>,
    ) {
        let Some(frame) = encode_frame(destination, event) else {
            return;
        };

        let mut clients = self.clients.write().await;
        for client in clients.values_mut() {
            if client.user_id != user_id {
                continue;
            }
            if let Some(conversation_id) = skip_viewers_of {
                if client.subscribed_conversations.contains(conversation_id) {
                    continue;
                }
            }
            client.deliver(frame.clone());
        }
    }

    pub async fn broadcast_all(&self, destination: Destination<'_>, event: &ServerEvent) {
        let Some(frame) = encode_frame(destination, event) else {
            return;
        };

        let mut clients = self.clients.write().await;
        for client in clients.values_mut() {
            client.deliver(frame.clone());
        }
    }

    /// Direct reply to one connection. Never buffered: catch-up frames and
    /// acks go through here.
    pub async fn send_to(&self, client_id: ClientId, destination: Destination<'_>, event: &ServerEvent) {
        let Some(frame) = encode_frame(destination, event) else {
            return;
        };

        let clients = self.clients.read().await;
        if let Some(client) = clients.get(&client_id) {
            let _ = client.tx.send(frame);
        }
    }
}
