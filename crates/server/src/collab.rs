//! Contracts for services the chat core consumes but does not own: blob
//! storage (download links for FILE messages) and the user directory
//! (display names for system text).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::error::{ChatError, ChatResult};

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn generate_download_url(&self, key: &str) -> ChatResult<String>;
}

/// Signs nothing; builds a time-limited link under a fixed base URL. Stands
/// in for a real object store in single-node deployments.
pub struct LocalBlobStorage {
    base_url: String,
    link_ttl: Duration,
}

impl LocalBlobStorage {
    pub fn new(base_url: impl Into<String>, link_ttl: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            link_ttl,
        }
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn generate_download_url(&self, key: &str) -> ChatResult<String> {
        taskchat_shared::validation::validate_file_key(key).map_err(ChatError::Validation)?;
        let expires = chrono::Utc::now()
            + chrono::Duration::from_std(self.link_ttl)
                .map_err(|e| ChatError::Infrastructure(e.to_string()))?;
        let path = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Ok(format!(
            "{}/{}?expires={}",
            self.base_url,
            path,
            expires.timestamp()
        ))
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn display_name(&self, user_id: &str) -> ChatResult<String>;
}

pub struct SqliteUserDirectory {
    db: SqlitePool,
}

impl SqliteUserDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn display_name(&self, user_id: &str) -> ChatResult<String> {
        crate::db::users::display_name(&self.db, user_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("user {user_id}")))
    }
}

/// Remembers the last name seen per user and serves it when the directory
/// fails. With nothing cached the user id itself is used.
pub struct CachedUserDirectory {
    inner: Arc<dyn UserDirectory>,
    cache: RwLock<HashMap<String, String>>,
}

impl CachedUserDirectory {
    pub fn new(inner: Arc<dyn UserDirectory>) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn display_name(&self, user_id: &str) -> String {
        match self.inner.display_name(user_id).await {
            Ok(name) => {
                self.cache
                    .write()
                    .await
                    .insert(user_id.to_string(), name.clone());
                name
            }
            Err(e) => {
                let cached = self.cache.read().await.get(user_id).cloned();
                tracing::warn!(user_id, cached = cached.is_some(), "display name lookup failed: {e}");
                cached.unwrap_or_else(|| user_id.to_string())
            }
        }
    }
}
