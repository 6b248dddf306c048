//! Record types exchanged with the store.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use std::fmt;

/// Event fields written by the catalog sync.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub image: Option<String>,
    pub icon: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub volume: Decimal,
    pub volume_24h: Decimal,
    pub liquidity: Decimal,
    pub active: bool,
    pub closed: bool,
    pub archived: bool,
    pub tags: Vec<String>,
}

/// Market fields written by the catalog sync. `event_id` is deliberately
/// absent: only the event-linkage path sets it.
#[derive(Debug, Clone)]
pub struct MarketRecord {
    pub id: String,
    pub condition_id: String,
    pub question: String,
    pub description: String,
    pub slug: String,
    pub outcomes: Vec<String>,
    pub outcome_token_ids: Vec<String>,
    pub outcome_prices: Vec<Decimal>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub last_trade_price: Option<Decimal>,
    pub volume: Decimal,
    pub volume_24h: Decimal,
    pub liquidity: Decimal,
    pub category: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
    pub active: bool,
    pub closed: bool,
    pub archived: bool,
    pub resolved: bool,
    pub winning_outcome: Option<i32>,
}

/// A live market row, enough to derive the token universe.
#[derive(Debug, Clone, FromRow)]
pub struct LiveMarket {
    pub id: String,
    pub outcome_token_ids: Vec<String>,
}

/// A market eligible for historical price backfill.
#[derive(Debug, Clone, FromRow)]
pub struct BackfillTarget {
    pub id: String,
    pub condition_id: String,
    pub outcome_token_ids: Vec<String>,
}

/// A market eligible for a CLOB tradability probe.
#[derive(Debug, Clone, FromRow)]
pub struct AuditCandidate {
    pub id: String,
    pub condition_id: String,
    pub event_id: Option<String>,
}

/// Where a price sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Clob,
    Websocket,
}

impl PriceSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Clob => "clob",
            PriceSource::Websocket => "websocket",
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One point of the price time-series. Uniqueness is enforced over
/// `(market_id, token_id, timestamp, source)`.
#[derive(Debug, Clone)]
pub struct PriceSample {
    pub market_id: String,
    pub token_id: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub source: PriceSource,
}

/// A buffered realtime price observation applied during a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    pub token_id: String,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// One executed trade, keyed by its content hash.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub id: String,
    pub market_id: String,
    pub asset: String,
    pub side: String,
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
    pub transaction_hash: String,
    pub proxy_wallet: String,
}

/// Sync lifecycle state published per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
    Connected,
    Disconnected,
    Disabled,
}

impl SyncStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
            SyncStatus::Connected => "connected",
            SyncStatus::Disconnected => "disconnected",
            SyncStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sync-state row as read back for status surfaces.
#[derive(Debug, Clone, FromRow)]
pub struct SyncStateRow {
    pub entity: String,
    pub status: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub metadata: Option<JsonValue>,
    pub error_message: Option<String>,
}

impl SyncStateRow {
    /// Whether consumers should treat this entity as stale.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, threshold_ms: u64) -> bool {
        match self.last_sync_at {
            Some(at) => {
                let age = now.signed_duration_since(at);
                age.num_milliseconds() > threshold_ms as i64
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn price_source_strings() {
        assert_eq!(PriceSource::Clob.as_str(), "clob");
        assert_eq!(PriceSource::Websocket.as_str(), "websocket");
    }

    #[test]
    fn sync_status_covers_the_closed_set() {
        let all = [
            SyncStatus::Idle,
            SyncStatus::Syncing,
            SyncStatus::Error,
            SyncStatus::Connected,
            SyncStatus::Disconnected,
            SyncStatus::Disabled,
        ];
        let strings: Vec<&str> = all.iter().map(SyncStatus::as_str).collect();
        assert_eq!(
            strings,
            vec!["idle", "syncing", "error", "connected", "disconnected", "disabled"]
        );
    }

    #[test]
    fn staleness_uses_last_sync_age() {
        let now = Utc::now();
        let row = SyncStateRow {
            entity: "markets".to_string(),
            status: "idle".to_string(),
            last_sync_at: Some(now - Duration::minutes(10)),
            metadata: None,
            error_message: None,
        };
        // 15-minute threshold: 10 minutes old is fresh.
        assert!(!row.is_stale(now, 900_000));
        // 5-minute threshold: stale.
        assert!(row.is_stale(now, 300_000));

        let never = SyncStateRow {
            last_sync_at: None,
            ..row
        };
        assert!(never.is_stale(now, 900_000));
    }
}
