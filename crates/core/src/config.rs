//! Runtime configuration.
//!
//! Every knob the indexer honors lives here with its default. Configuration
//! is assembled by merging `config/Mirror.toml` (if present) with
//! `MIRROR_`-prefixed environment variables, so a bare environment with just
//! `MIRROR_DATABASE__URL` set is enough to run.

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub audit: ClobAuditConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// CLOB L2 credentials. Optional; unauthenticated endpoints work without.
    #[serde(default)]
    pub credentials: Option<ClobCredentials>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub query_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/mirror".to_string(),
            max_connections: 20,
            query_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Paginated events/markets catalog.
    pub catalog_base_url: String,
    /// Order-book service, authoritative for tradability.
    pub clob_base_url: String,
    /// Global trades feed.
    pub data_base_url: String,
    pub request_timeout_ms: u64,
    /// Catalog request budget per minute (the catalog rejects bursts).
    pub catalog_requests_per_minute: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            catalog_base_url: "https://gamma-api.polymarket.com".to_string(),
            clob_base_url: "https://clob.polymarket.com".to_string(),
            data_base_url: "https://data-api.polymarket.com".to_string(),
            request_timeout_ms: 30_000,
            catalog_requests_per_minute: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Markets refresh cadence; events run on the same cadence shifted by
    /// half a period so the two passes do not collide.
    pub markets_interval_ms: u64,
    pub trades_interval_ms: u64,
    pub enable_trades_sync: bool,
    pub markets_batch_size: u32,
    pub trades_batch_size: u32,
    /// Cap on markets considered for trade mapping, by 24h volume. 0 = unlimited.
    pub trades_sync_market_limit: u32,
    /// Consumers flag a sync-state row stale past this age.
    pub sync_stale_threshold_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            markets_interval_ms: 300_000,
            trades_interval_ms: 60_000,
            enable_trades_sync: true,
            markets_batch_size: 500,
            trades_batch_size: 500,
            trades_sync_market_limit: 100,
            sync_stale_threshold_ms: 900_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub ws_url: String,
    pub reconnect_interval_ms: u64,
    /// Exponential backoff up to this many attempts, then a constant 60 s.
    pub max_reconnect_attempts: u32,
    /// Number of WebSocket shards; 1 is the single-connection case.
    pub connections: u32,
    pub price_flush_interval_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            reconnect_interval_ms: 3_000,
            max_reconnect_attempts: 10,
            connections: 2,
            price_flush_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClobAuditConfig {
    pub interval_ms: u64,
    /// Top-N open markets probed per pass, by 24h volume.
    pub batch_size: u32,
    /// Parallel CLOB lookups during an audit.
    pub concurrency: u32,
}

impl Default for ClobAuditConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_800_000,
            batch_size: 200,
            concurrency: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub price_history_days: i64,
    pub trades_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            price_history_days: 30,
            trades_days: 7,
        }
    }
}

/// CLOB L2 API credentials used by the request signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClobCredentials {
    pub address: String,
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl AppConfig {
    /// Loads configuration from `config/Mirror.toml` merged with
    /// `MIRROR_`-prefixed environment variables (`__` separates sections,
    /// e.g. `MIRROR_DATABASE__URL`).
    ///
    /// # Errors
    /// Returns an error if a provider fails to parse or a value has the
    /// wrong shape.
    pub fn load() -> Result<Self> {
        Self::load_from("config/Mirror.toml")
    }

    /// Loads configuration from an explicit TOML path merged with the
    /// environment.
    ///
    /// # Errors
    /// Returns an error if a provider fails to parse.
    pub fn load_from(path: &str) -> Result<Self> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("MIRROR_").split("__"))
            .extract()?;
        Ok(config)
    }

    #[must_use]
    pub fn markets_interval(&self) -> Duration {
        Duration::from_millis(self.sync.markets_interval_ms)
    }

    /// Events refresh offset: half the markets period.
    #[must_use]
    pub fn events_phase_shift(&self) -> Duration {
        Duration::from_millis(self.sync.markets_interval_ms / 2)
    }

    #[must_use]
    pub fn trades_interval(&self) -> Duration {
        Duration::from_millis(self.sync.trades_interval_ms)
    }

    #[must_use]
    pub fn price_flush_interval(&self) -> Duration {
        Duration::from_millis(self.realtime.price_flush_interval_ms)
    }

    #[must_use]
    pub fn clob_audit_interval(&self) -> Duration {
        Duration::from_millis(self.audit.interval_ms)
    }

    /// Shard count, clamped to at least one connection.
    #[must_use]
    pub fn ws_connections(&self) -> usize {
        self.realtime.connections.max(1) as usize
    }
}
