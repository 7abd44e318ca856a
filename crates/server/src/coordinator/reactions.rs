use taskchat_shared::validation::validate_reaction_type;

use super::ChatCoordinator;
use crate::bus::{BusEvent, Topic};
use crate::db;
use crate::error::{ChatError, ChatResult};
use crate::models::{ReactionAction, ReactionEvent};

impl ChatCoordinator {
    /// Toggle a reaction. Same type again removes it; a different type
    /// replaces the user's existing one, so each user has at most one
    /// reaction per message.
    #[tracing::instrument(skip(self))]
    pub async fn toggle_reaction(
        &self,
        user_id: &str,
        message_id: i64,
        reaction_type: &str,
    ) -> ChatResult<ReactionEvent> {
        validate_reaction_type(reaction_type).map_err(ChatError::Validation)?;

        let message = self.require_message(message_id).await?;
        if message.is_deleted {
            return Err(ChatError::NotFound(format!("message {message_id}")));
        }
        self.require_active_member(&message.conversation_id, user_id)
            .await?;

        let mut tx = self.begin_write().await?;
        let existing = db::reactions::find(&mut *tx, message_id, user_id).await?;
        let action = match existing {
            Some(current) if current.reaction_type == reaction_type => {
                db::reactions::delete(&mut *tx, message_id, user_id).await?;
                ReactionAction::ReactionRemoved
            }
            Some(_) => {
                db::reactions::delete(&mut *tx, message_id, user_id).await?;
                db::reactions::insert(&mut *tx, message_id, user_id, reaction_type, &db::now_ts())
                    .await?;
                ReactionAction::ReactionAdded
            }
            None => {
                db::reactions::insert(&mut *tx, message_id, user_id, reaction_type, &db::now_ts())
                    .await?;
                ReactionAction::ReactionAdded
            }
        };
        let summary = db::reactions::summary(&mut *tx, message_id).await?;
        tx.commit().await?;

        let event = ReactionEvent {
            action,
            message_id,
            conversation_id: message.conversation_id.clone(),
            message_author_id: message.sender_id,
            user_id: user_id.to_string(),
            reaction_type: reaction_type.to_string(),
            summary,
        };

        self.notify(
            Topic::Reaction,
            &message.conversation_id,
            BusEvent::Reaction {
                reaction: event.clone(),
            },
        )
        .await;
        Ok(event)
    }
}
