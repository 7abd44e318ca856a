//! DeliveryBus: versioned event envelopes, topics, and the publish / consume
//! seams. `local` holds the in-process partitioned implementation.

mod local;

pub use local::{BusStats, DeadLetter, LocalBus, RetryPolicy};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskchat_shared::constants::ENVELOPE_VERSION;

use crate::error::ChatResult;
use crate::models::{ConversationType, DeliveryStatus, Message, ReactionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "chat.direct")]
    Direct,
    #[serde(rename = "chat.group")]
    Group,
    #[serde(rename = "chat.message.status")]
    MessageStatus,
    #[serde(rename = "chat.typing.status")]
    TypingStatus,
    #[serde(rename = "chat.online.status")]
    OnlineStatus,
    #[serde(rename = "chat.reaction")]
    Reaction,
}

impl Topic {
    pub fn name(self) -> &'static str {
        match self {
            Topic::Direct => "chat.direct",
            Topic::Group => "chat.group",
            Topic::MessageStatus => "chat.message.status",
            Topic::TypingStatus => "chat.typing.status",
            Topic::OnlineStatus => "chat.online.status",
            Topic::Reaction => "chat.reaction",
        }
    }

    /// Message-carrying topic for a conversation.
    pub fn for_conversation(conversation_type: ConversationType) -> Self {
        match conversation_type {
            ConversationType::Direct => Topic::Direct,
            ConversationType::Group => Topic::Group,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipAction {
    Added,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "eventType",
    content = "data",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum BusEvent {
    MessageSent {
        conversation_type: ConversationType,
        message: Message,
        /// Active members at send time, sender excluded.
        recipient_ids: Vec<String>,
    },
    MessageUpdated {
        message: Message,
    },
    MessageDeleted {
        conversation_id: String,
        message_id: i64,
    },
    ReadStatusChanged {
        conversation_id: String,
        message_id: i64,
        sender_id: String,
        user_id: String,
        status: DeliveryStatus,
        at: String,
    },
    BulkReadStatusChanged {
        conversation_id: String,
        user_id: String,
        status: DeliveryStatus,
        message_ids: Vec<i64>,
        at: String,
    },
    MembershipChanged {
        conversation_id: String,
        user_id: String,
        actor_id: String,
        action: MembershipAction,
    },
    Typing {
        conversation_id: String,
        user_id: String,
        active: bool,
    },
    Presence {
        user_id: String,
        online: bool,
    },
    Reaction {
        reaction: ReactionEvent,
    },
}

impl BusEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BusEvent::MessageSent { .. } => "MESSAGE_SENT",
            BusEvent::MessageUpdated { .. } => "MESSAGE_UPDATED",
            BusEvent::MessageDeleted { .. } => "MESSAGE_DELETED",
            BusEvent::ReadStatusChanged { .. } => "READ_STATUS_CHANGED",
            BusEvent::BulkReadStatusChanged { .. } => "BULK_READ_STATUS_CHANGED",
            BusEvent::MembershipChanged { .. } => "MEMBERSHIP_CHANGED",
            BusEvent::Typing { .. } => "TYPING",
            BusEvent::Presence { .. } => "PRESENCE",
            BusEvent::Reaction { .. } => "REACTION",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub version: u16,
    pub event_id: String,
    pub topic: Topic,
    /// Partition key: conversation id, or user id for presence.
    pub key: String,
    pub timestamp: String,
    pub event: BusEvent,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u16),
}

impl Envelope {
    pub fn new(topic: Topic, key: impl Into<String>, event: BusEvent) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            event_id: uuid::Uuid::new_v4().to_string(),
            topic,
            key: key.into(),
            timestamp: crate::db::now_ts(),
            event,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(DecodeError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }
}

/// Producer side of the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: Envelope) -> ChatResult<()>;
}

/// Consumer side of the bus. Returning `Err` asks for a retry; the bus
/// decides when to give up.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> ChatResult<()>;
}
