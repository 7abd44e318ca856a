use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::ChatCoordinator;
use crate::db;
use crate::db::messages::SyncFilter;
use crate::error::{ChatError, ChatResult};
use crate::models::{ConversationMessages, SyncResult, SyncStrategy};

impl ChatCoordinator {
    /// Catch-up for a reconnecting client. Strategy priority: message id
    /// cursor, then wall-clock time, then every message still SENT.
    ///
    /// Results are capped at the configured page size; when `has_more` is set
    /// the client continues from `next_cursor`.
    #[tracing::instrument(skip(self))]
    pub async fn get_offline_sync(
        &self,
        user_id: &str,
        last_seen_message_id: Option<i64>,
        last_sync_time: Option<DateTime<Utc>>,
    ) -> ChatResult<SyncResult> {
        let since = last_sync_time.map(db::fmt_ts);
        let (strategy, filter) = match (last_seen_message_id, since.as_deref()) {
            (Some(cursor), _) => (SyncStrategy::MessageIdBased, SyncFilter::AfterId(cursor)),
            (None, Some(since)) => (SyncStrategy::TimeBased, SyncFilter::CreatedAfter(since)),
            (None, None) => (SyncStrategy::FullRescan, SyncFilter::Unsent),
        };

        let limit = self.sync_page_limit;
        let query = db::messages::for_sync(&self.db, user_id, filter, limit + 1);
        let mut messages = match tokio::time::timeout(self.sync_timeout, query).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(?strategy, "offline sync query timed out");
                return Err(ChatError::Infrastructure("offline sync timed out".into()));
            }
        };

        let has_more = messages.len() as i64 > limit;
        messages.truncate(limit as usize);
        let next_cursor = messages.last().map(|m| m.id);
        let total_messages = messages.len();

        let mut conversations: Vec<ConversationMessages> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for message in messages {
            let message = self.materialize(message).await;
            let slot = *index
                .entry(message.conversation_id.clone())
                .or_insert_with(|| {
                    conversations.push(ConversationMessages {
                        conversation_id: message.conversation_id.clone(),
                        messages: Vec::new(),
                    });
                    conversations.len() - 1
                });
            conversations[slot].messages.push(message);
        }

        tracing::info!(
            ?strategy,
            total_messages,
            conversations = conversations.len(),
            has_more,
            "offline sync resolved"
        );

        Ok(SyncResult {
            strategy,
            conversations,
            total_messages,
            has_more,
            next_cursor,
        })
    }
}
