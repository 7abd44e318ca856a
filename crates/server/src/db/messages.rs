use sqlx::sqlite::{SqliteConnection, SqliteExecutor};

use crate::models::{DeliveryStatus, Message, MessageType};

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, m.type, m.content, \
     m.file_key, m.file_url, m.reply_to_id, m.is_edited, m.is_deleted, m.created_at, m.updated_at";

pub struct NewMessage<'a> {
    pub conversation_id: &'a str,
    pub sender_id: &'a str,
    pub message_type: MessageType,
    pub content: &'a str,
    pub file_key: Option<&'a str>,
    pub file_url: Option<&'a str>,
    pub reply_to_id: Option<i64>,
    pub created_at: &'a str,
}

/// Insert a message together with one read-status row per recipient and bump
/// the conversation. The sender's row starts at READ, everyone else at SENT.
///
/// Must run inside the caller's transaction: either every row lands or none.
pub async fn insert_with_status(
    conn: &mut SqliteConnection,
    new: &NewMessage<'_>,
    recipients: &[String],
) -> Result<Message, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO messages
           (conversation_id, sender_id, type, content, file_key, file_url, reply_to_id,
            is_edited, is_deleted, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)"#,
    )
    .bind(new.conversation_id)
    .bind(new.sender_id)
    .bind(new.message_type)
    .bind(new.content)
    .bind(new.file_key)
    .bind(new.file_url)
    .bind(new.reply_to_id)
    .bind(new.created_at)
    .bind(new.created_at)
    .execute(&mut *conn)
    .await?;

    let id = result.last_insert_rowid();

    for user_id in recipients {
        let is_sender = user_id == new.sender_id;
        let (status, stamp) = if is_sender {
            (DeliveryStatus::Read, Some(new.created_at))
        } else {
            (DeliveryStatus::Sent, None)
        };
        sqlx::query(
            r#"INSERT INTO read_status (message_id, user_id, status, delivered_at, read_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(id)
        .bind(user_id)
        .bind(status)
        .bind(stamp)
        .bind(stamp)
        .execute(&mut *conn)
        .await?;
    }

    super::conversations::touch(&mut *conn, new.conversation_id, new.created_at).await?;

    Ok(Message {
        id,
        conversation_id: new.conversation_id.to_string(),
        sender_id: new.sender_id.to_string(),
        message_type: new.message_type,
        content: new.content.to_string(),
        file_key: new.file_key.map(str::to_string),
        file_url: new.file_url.map(str::to_string),
        reply_to_id: new.reply_to_id,
        is_edited: false,
        is_deleted: false,
        created_at: new.created_at.to_string(),
        updated_at: new.created_at.to_string(),
    })
}

pub async fn find_message<'e, E: SqliteExecutor<'e>>(
    db: E,
    message_id: i64,
) -> Result<Option<Message>, sqlx::Error> {
    let sql = format!("SELECT {} FROM messages m WHERE m.id = ?", MESSAGE_COLUMNS);
    sqlx::query_as::<_, Message>(&sql)
        .bind(message_id)
        .fetch_optional(db)
        .await
}

/// Distinct conversations the given messages belong to. Unknown ids are
/// skipped.
pub async fn conversation_ids<'e, E: SqliteExecutor<'e>>(
    db: E,
    message_ids: &[i64],
) -> Result<Vec<String>, sqlx::Error> {
    if message_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; message_ids.len()].join(", ");
    let sql = format!(
        "SELECT DISTINCT conversation_id FROM messages WHERE id IN ({placeholders}) ORDER BY conversation_id"
    );
    let mut query = sqlx::query_scalar::<_, String>(&sql);
    for &message_id in message_ids {
        query = query.bind(message_id);
    }
    query.fetch_all(db).await
}

/// One page of a conversation, newest first. `before` is an exclusive id
/// cursor.
pub async fn page<'e, E: SqliteExecutor<'e>>(
    db: E,
    conversation_id: &str,
    before: Option<i64>,
    limit: i64,
) -> Result<Vec<Message>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM messages m WHERE m.conversation_id = ? AND m.id < ? \
         ORDER BY m.id DESC LIMIT ?",
        MESSAGE_COLUMNS
    );
    sqlx::query_as::<_, Message>(&sql)
        .bind(conversation_id)
        .bind(before.unwrap_or(i64::MAX))
        .bind(limit)
        .fetch_all(db)
        .await
}

pub async fn update_content<'e, E: SqliteExecutor<'e>>(
    db: E,
    message_id: i64,
    content: &str,
    at: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE messages SET content = ?, is_edited = 1, updated_at = ? WHERE id = ?")
        .bind(content)
        .bind(at)
        .bind(message_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn mark_deleted<'e, E: SqliteExecutor<'e>>(
    db: E,
    message_id: i64,
    at: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE messages SET is_deleted = 1, updated_at = ? WHERE id = ?")
        .bind(at)
        .bind(message_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Remember the last download link handed out for a file message.
pub async fn cache_file_url<'e, E: SqliteExecutor<'e>>(
    db: E,
    message_id: i64,
    url: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE messages SET file_url = ? WHERE id = ?")
        .bind(url)
        .bind(message_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Selection for offline sync. Every variant is restricted to messages the
/// user holds a read-status row for, in conversations where they are still an
/// active member.
#[derive(Debug, Clone, Copy)]
pub enum SyncFilter<'a> {
    AfterId(i64),
    CreatedAfter(&'a str),
    Unsent,
}

pub async fn for_sync<'e, E: SqliteExecutor<'e>>(
    db: E,
    user_id: &str,
    filter: SyncFilter<'_>,
    limit: i64,
) -> Result<Vec<Message>, sqlx::Error> {
    let condition = match filter {
        SyncFilter::AfterId(_) => "m.id > ?",
        SyncFilter::CreatedAfter(_) => "m.created_at > ?",
        SyncFilter::Unsent => "rs.status = ?",
    };
    let sql = format!(
        r#"SELECT {}
           FROM messages m
           JOIN read_status rs ON rs.message_id = m.id AND rs.user_id = ?
           JOIN conversation_members cm
             ON cm.conversation_id = m.conversation_id AND cm.user_id = rs.user_id
           WHERE cm.is_active = 1 AND {}
           ORDER BY m.id ASC
           LIMIT ?"#,
        MESSAGE_COLUMNS, condition
    );

    let query = sqlx::query_as::<_, Message>(&sql).bind(user_id);
    let query = match filter {
        SyncFilter::AfterId(cursor) => query.bind(cursor),
        SyncFilter::CreatedAfter(since) => query.bind(since.to_string()),
        SyncFilter::Unsent => query.bind(DeliveryStatus::Sent),
    };
    query.bind(limit).fetch_all(db).await
}
