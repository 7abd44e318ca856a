use sqlx::sqlite::SqliteExecutor;

use crate::models::{Reaction, ReactionSummary};

pub async fn find<'e, E: SqliteExecutor<'e>>(
    db: E,
    message_id: i64,
    user_id: &str,
) -> Result<Option<Reaction>, sqlx::Error> {
    sqlx::query_as::<_, Reaction>(
        r#"SELECT message_id, user_id, reaction_type, created_at
           FROM reactions WHERE message_id = ? AND user_id = ?"#,
    )
    .bind(message_id)
    .bind(user_id)
    .fetch_optional(db)
    .await
}

pub async fn delete<'e, E: SqliteExecutor<'e>>(
    db: E,
    message_id: i64,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM reactions WHERE message_id = ? AND user_id = ?")
        .bind(message_id)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn insert<'e, E: SqliteExecutor<'e>>(
    db: E,
    message_id: i64,
    user_id: &str,
    reaction_type: &str,
    at: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO reactions (message_id, user_id, reaction_type, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(reaction_type)
    .bind(at)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn for_message<'e, E: SqliteExecutor<'e>>(
    db: E,
    message_id: i64,
) -> Result<Vec<Reaction>, sqlx::Error> {
    sqlx::query_as::<_, Reaction>(
        r#"SELECT message_id, user_id, reaction_type, created_at
           FROM reactions WHERE message_id = ? ORDER BY created_at, user_id"#,
    )
    .bind(message_id)
    .fetch_all(db)
    .await
}

pub async fn summary<'e, E: SqliteExecutor<'e>>(
    db: E,
    message_id: i64,
) -> Result<ReactionSummary, sqlx::Error> {
    let reactions = for_message(db, message_id).await?;
    let mut summary = ReactionSummary {
        message_id,
        ..Default::default()
    };
    for reaction in reactions {
        summary.total += 1;
        *summary
            .counts
            .entry(reaction.reaction_type.clone())
            .or_insert(0) += 1;
        summary
            .users
            .entry(reaction.reaction_type)
            .or_default()
            .push(reaction.user_id);
    }
    Ok(summary)
}
