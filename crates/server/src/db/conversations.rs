use sqlx::sqlite::{SqliteConnection, SqliteExecutor};

use crate::models::{Conversation, ConversationType, Member, MemberRole};

const CONVERSATION_COLUMNS: &str =
    "id, type, name, description, avatar, created_by, created_at, updated_at";

pub struct NewConversation<'a> {
    pub id: &'a str,
    pub conversation_type: ConversationType,
    pub name: Option<&'a str>,
    pub description: Option<&'a str>,
    pub avatar: Option<&'a str>,
    pub direct_key: Option<&'a str>,
    pub created_by: &'a str,
    pub created_at: &'a str,
}

/// Order-independent key for a user pair, unique per DIRECT conversation.
pub fn direct_key(user_a: &str, user_b: &str) -> String {
    if user_a <= user_b {
        format!("{}:{}", user_a, user_b)
    } else {
        format!("{}:{}", user_b, user_a)
    }
}

pub async fn find_conversation<'e, E: SqliteExecutor<'e>>(
    db: E,
    conversation_id: &str,
) -> Result<Option<Conversation>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM conversations WHERE id = ?",
        CONVERSATION_COLUMNS
    );
    sqlx::query_as::<_, Conversation>(&sql)
        .bind(conversation_id)
        .fetch_optional(db)
        .await
}

pub async fn find_direct<'e, E: SqliteExecutor<'e>>(
    db: E,
    key: &str,
) -> Result<Option<Conversation>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM conversations WHERE direct_key = ?",
        CONVERSATION_COLUMNS
    );
    sqlx::query_as::<_, Conversation>(&sql)
        .bind(key)
        .fetch_optional(db)
        .await
}

pub async fn insert_conversation(
    conn: &mut SqliteConnection,
    new: &NewConversation<'_>,
) -> Result<Conversation, sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO conversations
           (id, type, name, description, avatar, direct_key, created_by, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new.id)
    .bind(new.conversation_type)
    .bind(new.name)
    .bind(new.description)
    .bind(new.avatar)
    .bind(new.direct_key)
    .bind(new.created_by)
    .bind(new.created_at)
    .bind(new.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(Conversation {
        id: new.id.to_string(),
        conversation_type: new.conversation_type,
        name: new.name.map(str::to_string),
        description: new.description.map(str::to_string),
        avatar: new.avatar.map(str::to_string),
        created_by: new.created_by.to_string(),
        created_at: new.created_at.to_string(),
        updated_at: new.created_at.to_string(),
    })
}

/// Insert a membership, or reactivate a soft-removed one.
pub async fn upsert_member<'e, E: SqliteExecutor<'e>>(
    db: E,
    conversation_id: &str,
    user_id: &str,
    role: MemberRole,
    joined_at: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO conversation_members (conversation_id, user_id, role, is_active, joined_at)
           VALUES (?, ?, ?, 1, ?)
           ON CONFLICT (conversation_id, user_id)
           DO UPDATE SET is_active = 1, role = excluded.role, joined_at = excluded.joined_at"#,
    )
    .bind(conversation_id)
    .bind(user_id)
    .bind(role)
    .bind(joined_at)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn find_member<'e, E: SqliteExecutor<'e>>(
    db: E,
    conversation_id: &str,
    user_id: &str,
) -> Result<Option<Member>, sqlx::Error> {
    sqlx::query_as::<_, Member>(
        r#"SELECT conversation_id, user_id, role, is_active, joined_at
           FROM conversation_members WHERE conversation_id = ? AND user_id = ?"#,
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(db)
    .await
}

pub async fn active_member_ids<'e, E: SqliteExecutor<'e>>(
    db: E,
    conversation_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"SELECT user_id FROM conversation_members
           WHERE conversation_id = ? AND is_active = 1
           ORDER BY joined_at, user_id"#,
    )
    .bind(conversation_id)
    .fetch_all(db)
    .await
}

pub async fn count_active_elevated<'e, E: SqliteExecutor<'e>>(
    db: E,
    conversation_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM conversation_members
           WHERE conversation_id = ? AND is_active = 1 AND role = 'ADMIN'"#,
    )
    .bind(conversation_id)
    .fetch_one(db)
    .await
}

pub async fn deactivate_member<'e, E: SqliteExecutor<'e>>(
    db: E,
    conversation_id: &str,
    user_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE conversation_members SET is_active = 0
           WHERE conversation_id = ? AND user_id = ? AND is_active = 1"#,
    )
    .bind(conversation_id)
    .bind(user_id)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Bump `updated_at`. Never moves it backwards.
pub async fn touch<'e, E: SqliteExecutor<'e>>(
    db: E,
    conversation_id: &str,
    at: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ? AND updated_at < ?")
        .bind(at)
        .bind(conversation_id)
        .bind(at)
        .execute(db)
        .await?;
    Ok(())
}

/// Active conversations for a user, most recently updated first, with the
/// caller's role.
pub async fn list_for_user<'e, E: SqliteExecutor<'e>>(
    db: E,
    user_id: &str,
) -> Result<Vec<(Conversation, MemberRole)>, sqlx::Error> {
    #[derive(sqlx::FromRow)]
    struct Row {
        #[sqlx(flatten)]
        conversation: Conversation,
        role: MemberRole,
    }

    let rows = sqlx::query_as::<_, Row>(
        r#"SELECT c.id, c.type, c.name, c.description, c.avatar, c.created_by,
                  c.created_at, c.updated_at, cm.role
           FROM conversations c
           JOIN conversation_members cm ON cm.conversation_id = c.id
           WHERE cm.user_id = ? AND cm.is_active = 1
           ORDER BY c.updated_at DESC, c.id"#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.conversation, r.role))
        .collect())
}
