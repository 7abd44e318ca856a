//! Bus consumer that turns delivery-bus events into gateway pushes.
//!
//! Forwarding is idempotent from the client's point of view: a redelivered
//! record produces the same frames again and clients de-duplicate on ids.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::{BusEvent, Envelope, EventHandler, MembershipAction};
use crate::error::ChatResult;
use crate::models::{DeliveryStatus, Message};
use crate::presence::PresenceCache;
use crate::ws::events::{Destination, ServerEvent};
use crate::ws::gateway::GatewayState;

pub struct GatewayForwarder {
    gateway: Arc<GatewayState>,
    presence: Arc<PresenceCache>,
}

impl GatewayForwarder {
    pub fn new(gateway: Arc<GatewayState>, presence: Arc<PresenceCache>) -> Self {
        Self { gateway, presence }
    }

    async fn message_sent(&self, message: Message, recipient_ids: Vec<String>) {
        let conversation_id = message.conversation_id.clone();
        let event = ServerEvent::Message { message };

        self.gateway
            .broadcast_conversation(
                &conversation_id,
                Destination::ConversationMessages(&conversation_id),
                &event,
                None,
            )
            .await;

        for user_id in &recipient_ids {
            if !self.presence.is_online(user_id).await {
                continue;
            }
            self.gateway
                .push_to_user(
                    user_id,
                    Destination::UserMessages(user_id),
                    &event,
                    Some(&conversation_id),
                )
                .await;
            self.push_unread(user_id, &conversation_id).await;
        }
    }

    async fn push_unread(&self, user_id: &str, conversation_id: &str) {
        let Some(count) = self.presence.unread(user_id, conversation_id).await else {
            return;
        };
        self.gateway
            .push_to_user(
                user_id,
                Destination::UserUnreadCounts(user_id),
                &ServerEvent::UnreadCount {
                    conversation_id: conversation_id.to_string(),
                    count,
                },
                None,
            )
            .await;
    }

    async fn status_changed(
        &self,
        conversation_id: String,
        user_id: String,
        status: DeliveryStatus,
        message_ids: Vec<i64>,
        at: String,
        notify_sender: Option<String>,
    ) {
        let event = ServerEvent::ReadStatus {
            conversation_id: conversation_id.clone(),
            user_id: user_id.clone(),
            status,
            message_ids,
            at,
        };

        self.gateway
            .broadcast_conversation(
                &conversation_id,
                Destination::ConversationMessages(&conversation_id),
                &event,
                None,
            )
            .await;

        if let Some(sender_id) = notify_sender.filter(|s| *s != user_id) {
            self.gateway
                .push_to_user(
                    &sender_id,
                    Destination::UserMessages(&sender_id),
                    &event,
                    Some(&conversation_id),
                )
                .await;
        }

        if status == DeliveryStatus::Read {
            self.push_unread(&user_id, &conversation_id).await;
        }
    }
}

#[async_trait]
impl EventHandler for GatewayForwarder {
    async fn handle(&self, envelope: &Envelope) -> ChatResult<()> {
        tracing::trace!(
            event = envelope.event.name(),
            key = %envelope.key,
            event_id = %envelope.event_id,
            "forwarding"
        );

        match envelope.event.clone() {
            BusEvent::MessageSent {
                message,
                recipient_ids,
                ..
            } => self.message_sent(message, recipient_ids).await,
            BusEvent::MessageUpdated { message } => {
                let conversation_id = message.conversation_id.clone();
                self.gateway
                    .broadcast_conversation(
                        &conversation_id,
                        Destination::ConversationMessages(&conversation_id),
                        &ServerEvent::MessageUpdated { message },
                        None,
                    )
                    .await;
            }
            BusEvent::MessageDeleted {
                conversation_id,
                message_id,
            } => {
                self.gateway
                    .broadcast_conversation(
                        &conversation_id,
                        Destination::ConversationMessages(&conversation_id),
                        &ServerEvent::MessageDeleted {
                            conversation_id: conversation_id.clone(),
                            message_id,
                        },
                        None,
                    )
                    .await;
            }
            BusEvent::ReadStatusChanged {
                conversation_id,
                message_id,
                sender_id,
                user_id,
                status,
                at,
            } => {
                self.status_changed(
                    conversation_id,
                    user_id,
                    status,
                    vec![message_id],
                    at,
                    Some(sender_id),
                )
                .await;
            }
            BusEvent::BulkReadStatusChanged {
                conversation_id,
                user_id,
                status,
                message_ids,
                at,
            } => {
                self.status_changed(conversation_id, user_id, status, message_ids, at, None)
                    .await;
            }
            BusEvent::MembershipChanged {
                conversation_id,
                user_id,
                action,
                ..
            } => {
                if action == MembershipAction::Removed {
                    self.gateway
                        .unsubscribe_user(&user_id, &conversation_id)
                        .await;
                }
                let event = ServerEvent::MembershipChanged {
                    conversation_id: conversation_id.clone(),
                    user_id: user_id.clone(),
                    action,
                };
                self.gateway
                    .push_to_user(&user_id, Destination::UserMessages(&user_id), &event, None)
                    .await;
                self.gateway
                    .broadcast_conversation(
                        &conversation_id,
                        Destination::ConversationMessages(&conversation_id),
                        &event,
                        Some(&user_id),
                    )
                    .await;
            }
            BusEvent::Typing {
                conversation_id,
                user_id,
                active,
            } => {
                self.gateway
                    .broadcast_conversation(
                        &conversation_id,
                        Destination::ConversationTyping(&conversation_id),
                        &ServerEvent::Typing {
                            conversation_id: conversation_id.clone(),
                            user_id: user_id.clone(),
                            active,
                        },
                        Some(&user_id),
                    )
                    .await;
            }
            BusEvent::Presence { user_id, online } => {
                self.gateway
                    .broadcast_all(
                        Destination::UserPresence(&user_id),
                        &ServerEvent::Presence {
                            user_id: user_id.clone(),
                            online,
                        },
                    )
                    .await;
            }
            BusEvent::Reaction { reaction } => {
                let conversation_id = reaction.conversation_id.clone();
                let author_id = reaction.message_author_id.clone();
                let notify_author = author_id != reaction.user_id;
                let event = ServerEvent::Reaction { reaction };

                self.gateway
                    .broadcast_conversation(
                        &conversation_id,
                        Destination::ConversationReaction(&conversation_id),
                        &event,
                        None,
                    )
                    .await;
                if notify_author {
                    self.gateway
                        .push_to_user(
                            &author_id,
                            Destination::UserReaction(&author_id),
                            &event,
                            Some(&conversation_id),
                        )
                        .await;
                }
            }
        }
        Ok(())
    }
}
