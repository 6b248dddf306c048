//! Shared configuration and cross-cutting hooks for the indexer.
//!
//! This crate holds the runtime configuration (loaded from TOML merged with
//! `MIRROR_`-prefixed environment variables) and the cache invalidation hook
//! that sync components call after they change visible state.

pub mod cache;
pub mod config;

pub use cache::{CacheInvalidator, NoopInvalidator, EVENTS_PATTERN, MARKETS_PATTERN, STATS_PATTERN};
pub use config::{
    AppConfig, ClobAuditConfig, ClobCredentials, DatabaseConfig, RealtimeConfig, RetentionConfig,
    SyncConfig, UpstreamConfig,
};
