pub mod bus;
pub mod collab;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod presence;
pub mod routes;
pub mod ws;

use config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use bus::{LocalBus, RetryPolicy};
use collab::{LocalBlobStorage, SqliteUserDirectory};
use coordinator::ChatCoordinator;
use presence::PresenceCache;
use ws::forwarder::GatewayForwarder;
use ws::gateway::GatewayState;

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub gateway: Arc<GatewayState>,
    pub presence: Arc<PresenceCache>,
    pub bus: Arc<LocalBus>,
    pub coordinator: Arc<ChatCoordinator>,
}

impl AppState {
    /// Wire the single-node stack: in-memory presence, the in-process bus,
    /// and the SQLite-backed user directory.
    pub fn new(db: sqlx::SqlitePool, config: Config) -> Self {
        let presence = Arc::new(PresenceCache::in_memory(config.presence_ttl()));
        let bus = Arc::new(LocalBus::new(config.bus_partitions, config.bus_capacity));
        let blobs = Arc::new(LocalBlobStorage::new(
            config.blob_base_url.clone(),
            Duration::from_secs(config.blob_link_ttl_secs),
        ));
        let directory = Arc::new(SqliteUserDirectory::new(db.clone()));
        let coordinator = Arc::new(ChatCoordinator::new(
            db.clone(),
            presence.clone(),
            bus.clone(),
            blobs,
            directory,
            &config,
        ));

        Self {
            db,
            config,
            gateway: Arc::new(GatewayState::new()),
            presence,
            bus,
            coordinator,
        }
    }

    /// Start the bus workers that forward events to connected clients.
    pub fn start_delivery(&self) -> Vec<JoinHandle<()>> {
        let forwarder = Arc::new(GatewayForwarder::new(
            self.gateway.clone(),
            self.presence.clone(),
        ));
        let policy = RetryPolicy {
            max_attempts: self.config.bus_max_attempts,
            ..RetryPolicy::default()
        };
        self.bus.spawn_consumers(forwarder, policy)
    }
}
