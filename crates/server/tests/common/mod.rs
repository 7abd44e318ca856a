#![allow(dead_code)]

pub mod ws_helpers;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskchat_server::bus::{Envelope, EventPublisher};
use taskchat_server::collab::{BlobStorage, SqliteUserDirectory};
use taskchat_server::config::Config;
use taskchat_server::coordinator::ChatCoordinator;
use taskchat_server::error::{ChatError, ChatResult};
use taskchat_server::models::{CreateGroupRequest, MessageType, SendMessageRequest};
use taskchat_server::presence::PresenceCache;
use taskchat_server::{db, routes, AppState};

/// Create an in-memory SQLite pool with schema applied.
pub async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    db::apply_schema(&pool).await.unwrap();
    pool
}

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        database_path: ":memory:".into(),
        presence_ttl_secs: 90,
        presence_sweep_secs: 30,
        bus_partitions: 4,
        bus_capacity: 256,
        bus_max_attempts: 3,
        publish_timeout_ms: 500,
        sync_timeout_ms: 2_000,
        sync_page_limit: 500,
        blob_base_url: "http://blobs.test/attachments".into(),
        blob_link_ttl_secs: 3600,
    }
}

/// Full application state with bus workers running.
pub fn create_test_state(pool: SqlitePool) -> Arc<AppState> {
    let state = Arc::new(AppState::new(pool, test_config()));
    state.start_delivery();
    state
}

/// Build a test Axum app with the given pool.
pub fn create_test_app(pool: SqlitePool) -> Router {
    routes::build_router(create_test_state(pool))
}

/// Create a test user directly in the database. Returns (user_id, session_token).
pub async fn create_test_user(pool: &SqlitePool, username: &str) -> (String, String) {
    let user_id = uuid::Uuid::new_v4().to_string();
    let now = db::now_ts();

    sqlx::query(r#"INSERT INTO "user" (id, username, display_name, created_at) VALUES (?, ?, ?, ?)"#)
        .bind(&user_id)
        .bind(username)
        .bind(capitalize(username))
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();

    let session_token = uuid::Uuid::new_v4().to_string();
    let session_id = uuid::Uuid::new_v4().to_string();
    let expires_at = db::fmt_ts(chrono::Utc::now() + chrono::Duration::days(30));

    sqlx::query(
        r#"INSERT INTO "session" (id, user_id, token, expires_at, created_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(&session_id)
    .bind(&user_id)
    .bind(&session_token)
    .bind(&expires_at)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();

    (user_id, session_token)
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn auth_header(token: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    )
}

/// Publisher that keeps every envelope it is handed.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<Envelope>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<Envelope> {
        self.published.lock().unwrap().clone()
    }

    pub fn named(&self, name: &str) -> Vec<Envelope> {
        self.events()
            .into_iter()
            .filter(|e| e.event.name() == name)
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, envelope: Envelope) -> ChatResult<()> {
        self.published.lock().unwrap().push(envelope);
        Ok(())
    }
}

/// Publisher whose bus is always down.
pub struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish(&self, _envelope: Envelope) -> ChatResult<()> {
        Err(ChatError::Infrastructure("bus offline".into()))
    }
}

/// Blob storage that hands out predictable links.
pub struct StaticBlobs;

#[async_trait]
impl BlobStorage for StaticBlobs {
    async fn generate_download_url(&self, key: &str) -> ChatResult<String> {
        Ok(format!("https://cdn.test/{key}?sig=fresh"))
    }
}

pub struct FailingBlobs;

#[async_trait]
impl BlobStorage for FailingBlobs {
    async fn generate_download_url(&self, _key: &str) -> ChatResult<String> {
        Err(ChatError::Infrastructure("blob store offline".into()))
    }
}

pub struct TestCoordinator {
    pub coordinator: ChatCoordinator,
    pub presence: Arc<PresenceCache>,
    pub publisher: Arc<RecordingPublisher>,
}

pub fn coordinator_with(
    pool: &SqlitePool,
    publisher: Arc<dyn EventPublisher>,
    blobs: Arc<dyn BlobStorage>,
) -> (ChatCoordinator, Arc<PresenceCache>) {
    let presence = Arc::new(PresenceCache::in_memory(Duration::from_secs(90)));
    let coordinator = ChatCoordinator::new(
        pool.clone(),
        presence.clone(),
        publisher,
        blobs,
        Arc::new(SqliteUserDirectory::new(pool.clone())),
        &test_config(),
    );
    (coordinator, presence)
}

/// Coordinator over a recording publisher.
pub fn test_coordinator(pool: &SqlitePool) -> TestCoordinator {
    let publisher = Arc::new(RecordingPublisher::default());
    let (coordinator, presence) = coordinator_with(pool, publisher.clone(), Arc::new(StaticBlobs));
    TestCoordinator {
        coordinator,
        presence,
        publisher,
    }
}

pub fn text(content: &str) -> SendMessageRequest {
    SendMessageRequest {
        content: content.into(),
        message_type: MessageType::Text,
        reply_to_id: None,
        file_key: None,
    }
}

pub fn reply(content: &str, reply_to_id: i64) -> SendMessageRequest {
    SendMessageRequest {
        reply_to_id: Some(reply_to_id),
        ..text(content)
    }
}

pub fn group_request(name: &str, member_ids: &[&str]) -> CreateGroupRequest {
    CreateGroupRequest {
        name: name.into(),
        description: None,
        avatar: None,
        member_ids: member_ids.iter().map(|s| s.to_string()).collect(),
    }
}

/// Status of one read-status row, straight from the table.
pub async fn status_of(pool: &SqlitePool, message_id: i64, user_id: &str) -> Option<String> {
    sqlx::query_scalar::<_, String>(
        "SELECT status FROM read_status WHERE message_id = ? AND user_id = ?",
    )
    .bind(message_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .unwrap()
}

pub async fn read_status_rows(pool: &SqlitePool, message_id: i64) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM read_status WHERE message_id = ?")
        .bind(message_id)
        .fetch_one(pool)
        .await
        .unwrap()
}
