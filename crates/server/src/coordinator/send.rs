use sqlx::SqliteConnection;
use taskchat_shared::constants::{MAX_MESSAGE_PAGE_SIZE, MESSAGE_PAGE_SIZE};
use taskchat_shared::validation::{validate_file_key, validate_message_content};

use super::ChatCoordinator;
use crate::bus::{BusEvent, Topic};
use crate::db;
use crate::db::messages::NewMessage;
use crate::error::{ChatError, ChatResult};
use crate::models::{
    Conversation, Message, MessageType, PaginatedResponse, SendMessageRequest,
};

impl ChatCoordinator {
    /// Persist a message with one read-status row per active member and
    /// publish `MessageSent` keyed by the conversation.
    #[tracing::instrument(skip(self, request))]
    pub async fn send(
        &self,
        sender_id: &str,
        conversation_id: &str,
        request: SendMessageRequest,
    ) -> ChatResult<Message> {
        validate_outgoing(&request)?;

        let conversation = self.require_conversation(conversation_id).await?;
        self.require_active_member(conversation_id, sender_id).await?;

        if let Some(reply_to_id) = request.reply_to_id {
            let target = db::messages::find_message(&self.db, reply_to_id).await?;
            match target {
                Some(t) if t.conversation_id == conversation_id && !t.is_deleted => {}
                Some(t) if t.is_deleted => {
                    return Err(ChatError::InvalidReply(format!(
                        "message {reply_to_id} was deleted"
                    )))
                }
                Some(_) => {
                    return Err(ChatError::InvalidReply(format!(
                        "message {reply_to_id} belongs to another conversation"
                    )))
                }
                None => {
                    return Err(ChatError::InvalidReply(format!(
                        "message {reply_to_id} does not exist"
                    )))
                }
            }
        }

        let now = db::now_ts();
        let mut tx = self.begin_write().await?;
        let recipients = db::conversations::active_member_ids(&mut *tx, conversation_id).await?;
        let message = db::messages::insert_with_status(
            &mut *tx,
            &NewMessage {
                conversation_id,
                sender_id,
                message_type: request.message_type,
                content: &request.content,
                file_key: request.file_key.as_deref(),
                file_url: None,
                reply_to_id: request.reply_to_id,
                created_at: &now,
            },
            &recipients,
        )
        .await?;
        tx.commit().await?;

        tracing::debug!(message_id = message.id, recipients = recipients.len(), "message stored");

        let message = self.materialize(message).await;
        self.announce(&conversation, &message, recipients).await;
        Ok(message)
    }

    /// First message between two users opens their DIRECT conversation.
    pub async fn send_direct(
        &self,
        sender_id: &str,
        recipient_id: &str,
        request: SendMessageRequest,
    ) -> ChatResult<Message> {
        let conversation = self.open_direct(sender_id, recipient_id).await?;
        self.send(sender_id, &conversation.id, request).await
    }

    #[tracing::instrument(skip(self, content))]
    pub async fn edit_message(
        &self,
        sender_id: &str,
        message_id: i64,
        content: &str,
    ) -> ChatResult<Message> {
        validate_message_content(content).map_err(ChatError::Validation)?;

        let message = self.require_own_message(sender_id, message_id).await?;
        if message.is_deleted {
            return Err(ChatError::NotFound(format!("message {message_id}")));
        }
        if message.message_type != MessageType::Text {
            return Err(ChatError::PermissionDenied(
                "only text messages can be edited".into(),
            ));
        }

        db::messages::update_content(&self.db, message_id, content, &db::now_ts()).await?;
        let updated = self.require_message(message_id).await?;
        let updated = self.materialize(updated).await;

        let conversation = self.require_conversation(&updated.conversation_id).await?;
        self.notify(
            Topic::for_conversation(conversation.conversation_type),
            &conversation.id,
            BusEvent::MessageUpdated {
                message: updated.clone(),
            },
        )
        .await;
        Ok(updated)
    }

    /// Soft delete. Deleting twice is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn delete_message(&self, sender_id: &str, message_id: i64) -> ChatResult<()> {
        let message = self.require_own_message(sender_id, message_id).await?;
        if message.is_deleted {
            return Ok(());
        }

        db::messages::mark_deleted(&self.db, message_id, &db::now_ts()).await?;

        let conversation = self.require_conversation(&message.conversation_id).await?;
        self.notify(
            Topic::for_conversation(conversation.conversation_type),
            &conversation.id,
            BusEvent::MessageDeleted {
                conversation_id: conversation.id.clone(),
                message_id,
            },
        )
        .await;
        Ok(())
    }

    /// One page of history, oldest first within the page. `before` is an
    /// exclusive message id cursor; the returned cursor continues backwards.
    pub async fn list_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        before: Option<i64>,
        limit: Option<i64>,
    ) -> ChatResult<PaginatedResponse<Message>> {
        self.require_active_member(conversation_id, user_id).await?;

        let limit = limit
            .unwrap_or(MESSAGE_PAGE_SIZE)
            .clamp(1, MAX_MESSAGE_PAGE_SIZE);
        let mut page = db::messages::page(&self.db, conversation_id, before, limit + 1).await?;
        let has_more = page.len() as i64 > limit;
        page.truncate(limit as usize);
        page.reverse();

        let cursor = if has_more { page.first().map(|m| m.id) } else { None };
        Ok(PaginatedResponse {
            items: self.materialize_all(page).await,
            cursor,
            has_more,
        })
    }

    async fn require_own_message(&self, sender_id: &str, message_id: i64) -> ChatResult<Message> {
        let message = self.require_message(message_id).await?;
        self.require_active_member(&message.conversation_id, sender_id)
            .await?;
        if message.sender_id != sender_id {
            return Err(ChatError::PermissionDenied(
                "only the sender can change a message".into(),
            ));
        }
        Ok(message)
    }

    /// Store a SYSTEM message inside the caller's transaction. `recipients`
    /// are the members who get a read-status row.
    pub(super) async fn insert_system_message(
        conn: &mut SqliteConnection,
        conversation_id: &str,
        actor_id: &str,
        text: &str,
        recipients: &[String],
        at: &str,
    ) -> ChatResult<Message> {
        let message = db::messages::insert_with_status(
            conn,
            &NewMessage {
                conversation_id,
                sender_id: actor_id,
                message_type: MessageType::System,
                content: text,
                file_key: None,
                file_url: None,
                reply_to_id: None,
                created_at: at,
            },
            recipients,
        )
        .await?;
        Ok(message)
    }

    /// Post-commit side effects of a new message: unread counters, then the
    /// `MessageSent` event.
    pub(super) async fn announce(
        &self,
        conversation: &Conversation,
        message: &Message,
        recipients: Vec<String>,
    ) {
        let recipient_ids: Vec<String> = recipients
            .into_iter()
            .filter(|id| *id != message.sender_id)
            .collect();

        for user_id in &recipient_ids {
            self.presence.bump_unread(user_id, &conversation.id).await;
        }

        self.notify(
            Topic::for_conversation(conversation.conversation_type),
            &conversation.id,
            BusEvent::MessageSent {
                conversation_type: conversation.conversation_type,
                message: message.clone(),
                recipient_ids,
            },
        )
        .await;
    }
}

fn validate_outgoing(request: &SendMessageRequest) -> ChatResult<()> {
    match request.message_type {
        MessageType::Text => {
            validate_message_content(&request.content).map_err(ChatError::Validation)
        }
        MessageType::File => {
            let key = request.file_key.as_deref().unwrap_or_default();
            validate_file_key(key).map_err(ChatError::Validation)?;
            if request.content.chars().count() > taskchat_shared::constants::MAX_MESSAGE_LENGTH {
                return Err(ChatError::Validation("File caption too long".into()));
            }
            Ok(())
        }
        MessageType::System => Err(ChatError::Validation(
            "System messages cannot be sent by users".into(),
        )),
    }
}
