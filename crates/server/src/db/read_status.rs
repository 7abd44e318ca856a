use std::collections::HashMap;

use sqlx::sqlite::{SqliteConnection, SqliteExecutor};

use crate::models::{DeliveryStatus, ReadStatus};

pub async fn find<'e, E: SqliteExecutor<'e>>(
    db: E,
    message_id: i64,
    user_id: &str,
) -> Result<Option<ReadStatus>, sqlx::Error> {
    sqlx::query_as::<_, ReadStatus>(
        r#"SELECT message_id, user_id, status, delivered_at, read_at
           FROM read_status WHERE message_id = ? AND user_id = ?"#,
    )
    .bind(message_id)
    .bind(user_id)
    .fetch_optional(db)
    .await
}

/// Move one row to READ. The `status != 'READ'` guard keeps the transition
/// monotonic even if two writers race.
pub async fn set_read<'e, E: SqliteExecutor<'e>>(
    db: E,
    message_id: i64,
    user_id: &str,
    at: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE read_status
           SET status = 'READ', read_at = ?, delivered_at = COALESCE(delivered_at, ?)
           WHERE message_id = ? AND user_id = ? AND status != 'READ'"#,
    )
    .bind(at)
    .bind(at)
    .bind(message_id)
    .bind(user_id)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Advance every unread row the user has in a conversation to READ and
/// return the affected message ids in ascending order.
pub async fn set_all_read(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    user_id: &str,
    at: &str,
) -> Result<Vec<i64>, sqlx::Error> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"SELECT rs.message_id
           FROM read_status rs
           JOIN messages m ON m.id = rs.message_id
           WHERE m.conversation_id = ? AND rs.user_id = ? AND rs.status != 'READ'
           ORDER BY rs.message_id"#,
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    if ids.is_empty() {
        return Ok(ids);
    }

    sqlx::query(
        r#"UPDATE read_status
           SET status = 'READ', read_at = ?, delivered_at = COALESCE(delivered_at, ?)
           WHERE user_id = ? AND status != 'READ'
             AND message_id IN (SELECT id FROM messages WHERE conversation_id = ?)"#,
    )
    .bind(at)
    .bind(at)
    .bind(user_id)
    .bind(conversation_id)
    .execute(&mut *conn)
    .await?;

    Ok(ids)
}

/// Advance SENT rows to DELIVERED. Rows already DELIVERED or READ are left
/// alone. Returns `(conversation_id, message_id)` for every row that moved.
pub async fn set_delivered(
    conn: &mut SqliteConnection,
    message_ids: &[i64],
    user_id: &str,
    at: &str,
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    let mut advanced = Vec::new();
    for &message_id in message_ids {
        let moved = sqlx::query(
            r#"UPDATE read_status SET status = 'DELIVERED', delivered_at = ?
               WHERE message_id = ? AND user_id = ? AND status = 'SENT'"#,
        )
        .bind(at)
        .bind(message_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?
        .rows_affected()
            > 0;

        if moved {
            let conversation_id =
                sqlx::query_scalar::<_, String>("SELECT conversation_id FROM messages WHERE id = ?")
                    .bind(message_id)
                    .fetch_one(&mut *conn)
                    .await?;
            advanced.push((conversation_id, message_id));
        }
    }
    Ok(advanced)
}

pub async fn unread_count<'e, E: SqliteExecutor<'e>>(
    db: E,
    conversation_id: &str,
    user_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*)
           FROM read_status rs
           JOIN messages m ON m.id = rs.message_id
           WHERE m.conversation_id = ? AND rs.user_id = ? AND rs.status != ?
             AND m.is_deleted = 0"#,
    )
    .bind(conversation_id)
    .bind(user_id)
    .bind(DeliveryStatus::Read)
    .fetch_one(db)
    .await
}

/// Unread counts for every conversation the user has unread rows in.
pub async fn unread_counts<'e, E: SqliteExecutor<'e>>(
    db: E,
    user_id: &str,
) -> Result<HashMap<String, i64>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"SELECT m.conversation_id, COUNT(*)
           FROM read_status rs
           JOIN messages m ON m.id = rs.message_id
           WHERE rs.user_id = ? AND rs.status != 'READ' AND m.is_deleted = 0
           GROUP BY m.conversation_id"#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(rows.into_iter().collect())
}
