use serde::Serialize;

use crate::bus::MembershipAction;
use crate::models::{DeliveryStatus, Message, ReactionEvent, SyncResult};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Ready {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    OfflineSync {
        result: SyncResult,
    },
    SyncComplete {
        #[serde(rename = "messageCount")]
        message_count: usize,
        #[serde(rename = "hasMore")]
        has_more: bool,
        #[serde(rename = "nextCursor")]
        next_cursor: Option<i64>,
    },
    Message {
        message: Message,
    },
    MessageUpdated {
        message: Message,
    },
    MessageDeleted {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "messageId")]
        message_id: i64,
    },
    UnreadCount {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        count: i64,
    },
    ReadStatus {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        status: DeliveryStatus,
        #[serde(rename = "messageIds")]
        message_ids: Vec<i64>,
        at: String,
    },
    Typing {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        active: bool,
    },
    Presence {
        #[serde(rename = "userId")]
        user_id: String,
        online: bool,
    },
    Reaction {
        reaction: ReactionEvent,
    },
    MembershipChanged {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        action: MembershipAction,
    },
    Joined {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "markedRead")]
        marked_read: Vec<i64>,
    },
    MessageAck {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "messageId")]
        message_id: i64,
    },
    ReadAck {
        #[serde(rename = "messageId")]
        message_id: i64,
        changed: bool,
    },
    DeliveredAck {
        #[serde(rename = "messageIds")]
        message_ids: Vec<i64>,
    },
    HeartbeatAck {
        /// False when the session had already expired and was re-registered.
        live: bool,
    },
    Error {
        code: String,
        message: String,
    },
    Pong,
}
