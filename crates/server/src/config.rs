use std::env;
use std::time::Duration;

use taskchat_shared::constants::*;

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub presence_ttl_secs: u64,
    pub presence_sweep_secs: u64,
    pub bus_partitions: usize,
    pub bus_capacity: usize,
    pub bus_max_attempts: u32,
    pub publish_timeout_ms: u64,
    pub sync_timeout_ms: u64,
    pub sync_page_limit: i64,
    pub blob_base_url: String,
    pub blob_link_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parse_var("PORT", 3001),
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "./taskchat.db".into()),
            presence_ttl_secs: parse_var("PRESENCE_TTL_SECS", PRESENCE_TTL_SECS),
            presence_sweep_secs: parse_var("PRESENCE_SWEEP_SECS", PRESENCE_SWEEP_INTERVAL_SECS),
            bus_partitions: parse_var("BUS_PARTITIONS", BUS_PARTITIONS).max(1),
            bus_capacity: parse_var("BUS_CAPACITY", BUS_CAPACITY).max(1),
            bus_max_attempts: parse_var("BUS_MAX_ATTEMPTS", BUS_MAX_ATTEMPTS).max(1),
            publish_timeout_ms: parse_var("PUBLISH_TIMEOUT_MS", 2_000),
            sync_timeout_ms: parse_var("SYNC_TIMEOUT_MS", 5_000),
            sync_page_limit: parse_var("SYNC_PAGE_LIMIT", SYNC_PAGE_SIZE).max(1),
            blob_base_url: env::var("BLOB_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9000/attachments".into()),
            blob_link_ttl_secs: parse_var("BLOB_LINK_TTL_SECS", 3_600),
        }
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn presence_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.presence_sweep_secs.max(1))
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
