use std::collections::BTreeMap;

use super::ChatCoordinator;
use crate::bus::{BusEvent, Topic};
use crate::db;
use crate::error::{ChatError, ChatResult};
use crate::models::DeliveryStatus;

impl ChatCoordinator {
    /// Advance one read-status row to READ. Returns false when the row was
    /// already READ, in which case nothing is published. Only active members
    /// may advance their rows.
    #[tracing::instrument(skip(self))]
    pub async fn mark_read(&self, user_id: &str, message_id: i64) -> ChatResult<bool> {
        let message = self.require_message(message_id).await?;
        self.require_active_member(&message.conversation_id, user_id)
            .await?;
        let Some(current) = db::read_status::find(&self.db, message_id, user_id).await? else {
            return Err(ChatError::NotMember);
        };
        if current.status == DeliveryStatus::Read {
            return Ok(false);
        }

        let at = db::now_ts();
        if !db::read_status::set_read(&self.db, message_id, user_id, &at).await? {
            return Ok(false);
        }

        match db::read_status::unread_count(&self.db, &message.conversation_id, user_id).await {
            Ok(count) => {
                self.presence
                    .set_unread(user_id, &message.conversation_id, count)
                    .await
            }
            Err(e) => tracing::warn!("unread recount failed: {e}"),
        }

        self.notify(
            Topic::MessageStatus,
            &message.conversation_id,
            BusEvent::ReadStatusChanged {
                conversation_id: message.conversation_id.clone(),
                message_id,
                sender_id: message.sender_id.clone(),
                user_id: user_id.to_string(),
                status: DeliveryStatus::Read,
                at,
            },
        )
        .await;
        Ok(true)
    }

    /// Bulk READ for a conversation the user just opened. One aggregated
    /// event is published, and only when something changed.
    #[tracing::instrument(skip(self))]
    pub async fn mark_all_read_on_join(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> ChatResult<Vec<i64>> {
        self.require_active_member(conversation_id, user_id).await?;

        let at = db::now_ts();
        let mut tx = self.begin_write().await?;
        let message_ids =
            db::read_status::set_all_read(&mut *tx, conversation_id, user_id, &at).await?;
        tx.commit().await?;

        self.presence.set_unread(user_id, conversation_id, 0).await;

        if !message_ids.is_empty() {
            tracing::debug!(count = message_ids.len(), "marked conversation read");
            self.notify(
                Topic::MessageStatus,
                conversation_id,
                BusEvent::BulkReadStatusChanged {
                    conversation_id: conversation_id.to_string(),
                    user_id: user_id.to_string(),
                    status: DeliveryStatus::Read,
                    message_ids: message_ids.clone(),
                    at,
                },
            )
            .await;
        }
        Ok(message_ids)
    }

    /// Delivery acknowledgment from a client. Only SENT rows move; returns
    /// the ids that did. The caller must be an active member of every
    /// conversation the ids belong to.
    #[tracing::instrument(skip(self, message_ids), fields(count = message_ids.len()))]
    pub async fn mark_delivered(&self, user_id: &str, message_ids: &[i64]) -> ChatResult<Vec<i64>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        // Rows left behind by a removal must not advance
        for conversation_id in db::messages::conversation_ids(&self.db, message_ids).await? {
            self.require_active_member(&conversation_id, user_id).await?;
        }

        let at = db::now_ts();
        let mut tx = self.begin_write().await?;
        let advanced = db::read_status::set_delivered(&mut *tx, message_ids, user_id, &at).await?;
        tx.commit().await?;

        let mut by_conversation: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for (conversation_id, message_id) in &advanced {
            by_conversation
                .entry(conversation_id.clone())
                .or_default()
                .push(*message_id);
        }

        for (conversation_id, ids) in by_conversation {
            self.notify(
                Topic::MessageStatus,
                &conversation_id,
                BusEvent::BulkReadStatusChanged {
                    conversation_id: conversation_id.clone(),
                    user_id: user_id.to_string(),
                    status: DeliveryStatus::Delivered,
                    message_ids: ids,
                    at: at.clone(),
                },
            )
            .await;
        }

        Ok(advanced.into_iter().map(|(_, id)| id).collect())
    }
}
