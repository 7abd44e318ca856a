use std::collections::BTreeSet;

use taskchat_shared::validation::{validate_group_description, validate_group_name};

use super::ChatCoordinator;
use crate::bus::{BusEvent, MembershipAction, Topic};
use crate::db;
use crate::db::conversations::NewConversation;
use crate::error::{ChatError, ChatResult};
use crate::models::{
    Conversation, ConversationSummary, ConversationType, CreateGroupRequest, Member, MemberRole,
};

impl ChatCoordinator {
    /// Get or create the DIRECT conversation for an unordered user pair.
    #[tracing::instrument(skip(self))]
    pub async fn open_direct(&self, user_id: &str, other_id: &str) -> ChatResult<Conversation> {
        if user_id == other_id {
            return Err(ChatError::Validation(
                "Cannot open a direct conversation with yourself".into(),
            ));
        }
        if !db::users::exists(&self.db, other_id).await? {
            return Err(ChatError::NotFound(format!("user {other_id}")));
        }

        let key = db::conversations::direct_key(user_id, other_id);
        if let Some(existing) = db::conversations::find_direct(&self.db, &key).await? {
            return Ok(existing);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = db::now_ts();
        let mut tx = self.begin_write().await?;
        let inserted = db::conversations::insert_conversation(
            &mut *tx,
            &NewConversation {
                id: &id,
                conversation_type: ConversationType::Direct,
                name: None,
                description: None,
                avatar: None,
                direct_key: Some(&key),
                created_by: user_id,
                created_at: &now,
            },
        )
        .await;

        let conversation = match inserted {
            Ok(conversation) => conversation,
            // Lost a race with the other user opening the same pair
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                drop(tx);
                return db::conversations::find_direct(&self.db, &key)
                    .await?
                    .ok_or_else(|| ChatError::NotFound(format!("direct conversation {key}")));
            }
            Err(e) => return Err(e.into()),
        };

        for member in [user_id, other_id] {
            db::conversations::upsert_member(&mut *tx, &id, member, MemberRole::Member, &now)
                .await?;
        }
        tx.commit().await?;

        tracing::info!(conversation_id = %conversation.id, "direct conversation opened");
        Ok(conversation)
    }

    /// Create a GROUP with the creator as ADMIN and everyone else as MEMBER.
    #[tracing::instrument(skip(self, request))]
    pub async fn create_group(
        &self,
        creator_id: &str,
        request: CreateGroupRequest,
    ) -> ChatResult<Conversation> {
        validate_group_name(&request.name).map_err(ChatError::Validation)?;
        if let Some(description) = request.description.as_deref() {
            validate_group_description(description).map_err(ChatError::Validation)?;
        }

        let member_ids: BTreeSet<String> = request
            .member_ids
            .into_iter()
            .filter(|id| id != creator_id)
            .collect();
        for member_id in &member_ids {
            if !db::users::exists(&self.db, member_id).await? {
                return Err(ChatError::NotFound(format!("user {member_id}")));
            }
        }

        let creator_name = self.directory.display_name(creator_id).await;
        let id = uuid::Uuid::new_v4().to_string();
        let now = db::now_ts();

        let mut tx = self.begin_write().await?;
        let conversation = db::conversations::insert_conversation(
            &mut *tx,
            &NewConversation {
                id: &id,
                conversation_type: ConversationType::Group,
                name: Some(request.name.trim()),
                description: request.description.as_deref(),
                avatar: request.avatar.as_deref(),
                direct_key: None,
                created_by: creator_id,
                created_at: &now,
            },
        )
        .await?;
        db::conversations::upsert_member(&mut *tx, &id, creator_id, MemberRole::Admin, &now)
            .await?;
        for member_id in &member_ids {
            db::conversations::upsert_member(&mut *tx, &id, member_id, MemberRole::Member, &now)
                .await?;
        }
        let recipients = db::conversations::active_member_ids(&mut *tx, &id).await?;
        let notice = Self::insert_system_message(
            &mut *tx,
            &id,
            creator_id,
            &format!("{creator_name} created the group"),
            &recipients,
            &now,
        )
        .await?;
        tx.commit().await?;

        tracing::info!(conversation_id = %id, members = recipients.len(), "group created");

        self.announce(&conversation, &notice, recipients).await;
        // The notice bumped updated_at past the creation stamp
        self.require_conversation(&id).await
    }

    /// Add (or re-activate) a group member. Only ADMINs may add.
    #[tracing::instrument(skip(self))]
    pub async fn add_member(
        &self,
        caller_id: &str,
        conversation_id: &str,
        user_id: &str,
    ) -> ChatResult<Member> {
        let conversation = self.require_conversation(conversation_id).await?;
        if conversation.conversation_type != ConversationType::Group {
            return Err(ChatError::PermissionDenied(
                "members can only be added to group conversations".into(),
            ));
        }
        let caller = self.require_active_member(conversation_id, caller_id).await?;
        if !caller.role.is_elevated() {
            return Err(ChatError::PermissionDenied(
                "only group admins can add members".into(),
            ));
        }
        if !db::users::exists(&self.db, user_id).await? {
            return Err(ChatError::NotFound(format!("user {user_id}")));
        }
        if let Some(existing) = db::conversations::find_member(&self.db, conversation_id, user_id).await? {
            if existing.is_active {
                return Ok(existing);
            }
        }

        let name = self.directory.display_name(user_id).await;
        let now = db::now_ts();

        let mut tx = self.begin_write().await?;
        db::conversations::upsert_member(&mut *tx, conversation_id, user_id, MemberRole::Member, &now)
            .await?;
        let recipients = db::conversations::active_member_ids(&mut *tx, conversation_id).await?;
        let notice = Self::insert_system_message(
            &mut *tx,
            conversation_id,
            caller_id,
            &format!("{name} joined the group"),
            &recipients,
            &now,
        )
        .await?;
        tx.commit().await?;

        self.announce(&conversation, &notice, recipients).await;
        self.publish_membership(conversation_id, user_id, caller_id, MembershipAction::Added)
            .await;

        db::conversations::find_member(&self.db, conversation_id, user_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("member {user_id}")))
    }

    /// Soft-remove a member. Anyone may leave; removing someone else needs an
    /// ADMIN. A group never loses its last ADMIN.
    #[tracing::instrument(skip(self))]
    pub async fn remove_member(
        &self,
        caller_id: &str,
        conversation_id: &str,
        user_id: &str,
    ) -> ChatResult<()> {
        let conversation = self.require_conversation(conversation_id).await?;
        if conversation.conversation_type != ConversationType::Group {
            return Err(ChatError::PermissionDenied(
                "members cannot be removed from a direct conversation".into(),
            ));
        }
        let caller = self.require_active_member(conversation_id, caller_id).await?;
        if caller_id != user_id && !caller.role.is_elevated() {
            return Err(ChatError::PermissionDenied(
                "only group admins can remove other members".into(),
            ));
        }
        let target = match db::conversations::find_member(&self.db, conversation_id, user_id).await? {
            None => return Err(ChatError::NotFound(format!("member {user_id}"))),
            Some(member) if !member.is_active => return Err(ChatError::InactiveMember),
            Some(member) => member,
        };

        let name = self.directory.display_name(user_id).await;
        let now = db::now_ts();

        let mut tx = self.begin_write().await?;
        if target.role.is_elevated()
            && db::conversations::count_active_elevated(&mut *tx, conversation_id).await? <= 1
        {
            return Err(ChatError::LastElevatedMember);
        }
        db::conversations::deactivate_member(&mut *tx, conversation_id, user_id).await?;
        let recipients = db::conversations::active_member_ids(&mut *tx, conversation_id).await?;
        let notice = Self::insert_system_message(
            &mut *tx,
            conversation_id,
            caller_id,
            &format!("{name} left the group"),
            &recipients,
            &now,
        )
        .await?;
        tx.commit().await?;

        self.presence.set_unread(user_id, conversation_id, 0).await;
        self.announce(&conversation, &notice, recipients).await;
        self.publish_membership(conversation_id, user_id, caller_id, MembershipAction::Removed)
            .await;
        Ok(())
    }

    /// Active conversations, most recently updated first, with unread counts.
    pub async fn list_conversations(&self, user_id: &str) -> ChatResult<Vec<ConversationSummary>> {
        let rows = db::conversations::list_for_user(&self.db, user_id).await?;
        let unread = db::read_status::unread_counts(&self.db, user_id).await?;
        Ok(rows
            .into_iter()
            .map(|(conversation, role)| {
                let unread_count = unread.get(&conversation.id).copied().unwrap_or(0);
                ConversationSummary {
                    conversation,
                    role,
                    unread_count,
                }
            })
            .collect())
    }

    async fn publish_membership(
        &self,
        conversation_id: &str,
        user_id: &str,
        actor_id: &str,
        action: MembershipAction,
    ) {
        self.notify(
            Topic::Group,
            conversation_id,
            BusEvent::MembershipChanged {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
                actor_id: actor_id.to_string(),
                action,
            },
        )
        .await;
    }
}
