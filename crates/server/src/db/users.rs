use sqlx::sqlite::SqliteExecutor;

use crate::models::AuthUser;

pub async fn display_name<'e, E: SqliteExecutor<'e>>(
    db: E,
    user_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"SELECT COALESCE(display_name, username) FROM "user" WHERE id = ?"#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
}

/// Resolve a session token to its user. Expired sessions resolve to `None`.
pub async fn user_for_token<'e, E: SqliteExecutor<'e>>(
    db: E,
    token: &str,
) -> Result<Option<AuthUser>, sqlx::Error> {
    let row = sqlx::query_as::<_, (String, String, String)>(
        r#"SELECT u.id, u.username, s.expires_at
           FROM "session" s
           JOIN "user" u ON u.id = s.user_id
           WHERE s.token = ?"#,
    )
    .bind(token)
    .fetch_optional(db)
    .await?;

    let Some((id, username, expires_at)) = row else {
        return Ok(None);
    };

    if expires_at < super::now_ts() {
        return Ok(None);
    }

    Ok(Some(AuthUser { id, username }))
}

pub async fn exists<'e, E: SqliteExecutor<'e>>(db: E, user_id: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(r#"SELECT COUNT(*) FROM "user" WHERE id = ?"#)
        .bind(user_id)
        .fetch_one(db)
        .await
        .map(|count| count > 0)
}
