mod server_event;

pub use server_event::ServerEvent;

use std::fmt;

use serde::Deserialize;

use crate::models::MessageType;

// ── Client → Server Events ──

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversation {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    LeaveConversation {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    SendMessage {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        content: String,
        #[serde(default = "default_message_type", rename = "messageType")]
        message_type: MessageType,
        #[serde(default, rename = "replyToId")]
        reply_to_id: Option<i64>,
        #[serde(default, rename = "fileKey")]
        file_key: Option<String>,
    },
    MarkRead {
        #[serde(rename = "messageId")]
        message_id: i64,
    },
    AckDelivered {
        #[serde(rename = "messageIds")]
        message_ids: Vec<i64>,
    },
    TypingStart {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    TypingStop {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    ToggleReaction {
        #[serde(rename = "messageId")]
        message_id: i64,
        #[serde(rename = "reactionType")]
        reaction_type: String,
    },
    Heartbeat,
    Ping,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

/// Logical delivery channel a server frame is addressed to. Rendered into
/// every frame as `destination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination<'a> {
    UserMessages(&'a str),
    UserUnreadCounts(&'a str),
    UserOfflineSync(&'a str),
    UserReaction(&'a str),
    UserPresence(&'a str),
    ConversationMessages(&'a str),
    ConversationTyping(&'a str),
    ConversationReaction(&'a str),
    /// Replies to one connection's own frames (acks, errors, pong).
    Session(&'a str),
}

impl fmt::Display for Destination<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::UserMessages(id) => write!(f, "user/{id}/messages"),
            Destination::UserUnreadCounts(id) => write!(f, "user/{id}/unread-counts"),
            Destination::UserOfflineSync(id) => write!(f, "user/{id}/offline-sync"),
            Destination::UserReaction(id) => write!(f, "user/{id}/reaction"),
            Destination::UserPresence(id) => write!(f, "user/{id}/presence"),
            Destination::ConversationMessages(id) => write!(f, "conversation/{id}/messages"),
            Destination::ConversationTyping(id) => write!(f, "conversation/{id}/typing"),
            Destination::ConversationReaction(id) => write!(f, "conversation/{id}/reaction"),
            Destination::Session(id) => write!(f, "session/{id}"),
        }
    }
}

/// Serialize an event into a wire frame carrying its destination.
pub fn encode_frame(destination: Destination<'_>, event: &ServerEvent) -> Option<String> {
    let mut value = match serde_json::to_value(event) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("failed to encode server event: {e}");
            return None;
        }
    };
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "destination".into(),
            serde_json::Value::String(destination.to_string()),
        );
    }
    Some(value.to_string())
}
