//! ChatCoordinator: every chat operation enters here. Invariants are checked
//! before anything is written, the MessageStore write happens in one
//! transaction, and only then is the DeliveryBus notified.
//!
//! Bus and presence failures are logged and swallowed: once the store has
//! committed, the operation has succeeded.

mod members;
mod reactions;
mod read;
mod send;
mod sync;

use std::sync::Arc;
use std::time::Duration;

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::bus::{BusEvent, Envelope, EventPublisher, Topic};
use crate::collab::{BlobStorage, CachedUserDirectory, UserDirectory};
use crate::config::Config;
use crate::db;
use crate::error::{ChatError, ChatResult};
use crate::models::{Conversation, Member, Message, MessageType};
use crate::presence::PresenceCache;

pub struct ChatCoordinator {
    db: SqlitePool,
    presence: Arc<PresenceCache>,
    publisher: Arc<dyn EventPublisher>,
    blobs: Arc<dyn BlobStorage>,
    directory: CachedUserDirectory,
    publish_timeout: Duration,
    sync_timeout: Duration,
    sync_page_limit: i64,
}

impl ChatCoordinator {
    pub fn new(
        db: SqlitePool,
        presence: Arc<PresenceCache>,
        publisher: Arc<dyn EventPublisher>,
        blobs: Arc<dyn BlobStorage>,
        directory: Arc<dyn UserDirectory>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            presence,
            publisher,
            blobs,
            directory: CachedUserDirectory::new(directory),
            publish_timeout: config.publish_timeout(),
            sync_timeout: config.sync_timeout(),
            sync_page_limit: config.sync_page_limit,
        }
    }

    /// Write transaction. `BEGIN IMMEDIATE` takes the database write lock on
    /// the first statement, so a read-then-write body never has to upgrade
    /// its lock while another connection is writing.
    async fn begin_write(&self) -> ChatResult<Transaction<'static, Sqlite>> {
        Ok(self.db.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Publish an event without letting the outcome reach the caller.
    async fn notify(&self, topic: Topic, key: &str, event: BusEvent) {
        let name = event.name();
        let envelope = Envelope::new(topic, key, event);
        match tokio::time::timeout(self.publish_timeout, self.publisher.publish(envelope)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(topic = topic.name(), key, event = name, "bus publish failed: {e}");
            }
            Err(_) => {
                tracing::warn!(topic = topic.name(), key, event = name, "bus publish timed out");
            }
        }
    }

    /// Typing indicators go straight to the bus; nothing is stored.
    pub async fn typing(&self, user_id: &str, conversation_id: &str, active: bool) -> ChatResult<()> {
        self.require_active_member(conversation_id, user_id).await?;
        self.notify(
            Topic::TypingStatus,
            conversation_id,
            BusEvent::Typing {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
                active,
            },
        )
        .await;
        Ok(())
    }

    pub async fn presence_changed(&self, user_id: &str, online: bool) {
        self.notify(
            Topic::OnlineStatus,
            user_id,
            BusEvent::Presence {
                user_id: user_id.to_string(),
                online,
            },
        )
        .await;
    }

    async fn require_conversation(&self, conversation_id: &str) -> ChatResult<Conversation> {
        db::conversations::find_conversation(&self.db, conversation_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("conversation {conversation_id}")))
    }

    async fn require_active_member(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> ChatResult<Member> {
        match db::conversations::find_member(&self.db, conversation_id, user_id).await? {
            None => Err(ChatError::NotMember),
            Some(member) if !member.is_active => Err(ChatError::InactiveMember),
            Some(member) => Ok(member),
        }
    }

    async fn require_message(&self, message_id: i64) -> ChatResult<Message> {
        db::messages::find_message(&self.db, message_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("message {message_id}")))
    }

    /// Fill in read-time fields: deleted messages lose their content and file
    /// reference, FILE messages get a fresh download link.
    async fn materialize(&self, mut message: Message) -> Message {
        if message.is_deleted {
            message.content.clear();
            message.file_key = None;
            message.file_url = None;
            return message;
        }
        if message.message_type != MessageType::File {
            return message;
        }
        let Some(key) = message.file_key.as_deref() else {
            return message;
        };
        match self.blobs.generate_download_url(key).await {
            Ok(url) => {
                if message.file_url.as_deref() != Some(url.as_str()) {
                    if let Err(e) = db::messages::cache_file_url(&self.db, message.id, &url).await {
                        tracing::warn!(message_id = message.id, "failed to cache file url: {e}");
                    }
                }
                message.file_url = Some(url);
            }
            Err(e) => {
                tracing::warn!(
                    message_id = message.id,
                    cached = message.file_url.is_some(),
                    "download link generation failed: {e}"
                );
            }
        }
        message
    }

    async fn materialize_all(&self, messages: Vec<Message>) -> Vec<Message> {
        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            out.push(self.materialize(message).await);
        }
        out
    }
}
