//! Batch synchronization of the catalog mirror.
//!
//! One manager owns the periodic event/market refreshes, trade ingestion,
//! the expiration audit, and the entry point for the CLOB tradability audit.
//! Each entity has its own non-blocking in-flight flag; a second invocation
//! while one is running is dropped with a warning. The flags are
//! process-local: a single indexer process per database is assumed.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use mirror_core::{CacheInvalidator, ClobAuditConfig, SyncConfig, EVENTS_PATTERN, MARKETS_PATTERN, STATS_PATTERN};
use mirror_store::{Store, SyncStatus, TradeRecord};
use mirror_upstream::{CatalogClient, ClobClient, GlobalTrade, TradesClient};
use parking_lot::Mutex;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::clob_audit::{self, ClobAuditOutcome};
use crate::convert;

pub(crate) const EVENTS_ENTITY: &str = "events";
pub(crate) const MARKETS_ENTITY: &str = "markets";
pub(crate) const TRADES_ENTITY: &str = "trades";
pub(crate) const CLOB_AUDIT_ENTITY: &str = "clob_audit";

const CACHE_PATTERNS: [&str; 3] = [MARKETS_PATTERN, EVENTS_PATTERN, STATS_PATTERN];

/// Non-blocking mutual exclusion for one entity's sync.
#[derive(Debug, Default)]
pub(crate) struct EntityLock {
    busy: AtomicBool,
}

pub(crate) struct EntityGuard<'a> {
    lock: &'a EntityLock,
}

impl EntityLock {
    /// Claims the lock without waiting. `None` means a sync is in flight.
    pub(crate) fn try_acquire(&self) -> Option<EntityGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| EntityGuard { lock: self })
    }

    pub(crate) fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for EntityGuard<'_> {
    fn drop(&mut self) {
        self.lock.busy.store(false, Ordering::Release);
    }
}

/// Result of one catalog pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOutcome {
    pub pages: u32,
    pub rows: u64,
}

/// Counters surfaced by [`BatchSyncManager::status`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchStats {
    pub last_event_rows: u64,
    pub last_market_rows: u64,
    pub last_trades_inserted: u64,
}

#[derive(Debug, Clone)]
pub struct BatchStatus {
    pub events_syncing: bool,
    pub markets_syncing: bool,
    pub trades_syncing: bool,
    pub stats: BatchStats,
}

pub struct BatchSyncManager {
    store: Store,
    catalog: Arc<CatalogClient>,
    trades_client: Arc<TradesClient>,
    clob: Arc<ClobClient>,
    cache: Arc<dyn CacheInvalidator>,
    sync_config: SyncConfig,
    audit_config: ClobAuditConfig,
    markets_refreshed: Arc<Notify>,
    events_lock: EntityLock,
    markets_lock: EntityLock,
    trades_lock: EntityLock,
    stats: Mutex<BatchStats>,
}

impl BatchSyncManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        catalog: Arc<CatalogClient>,
        trades_client: Arc<TradesClient>,
        clob: Arc<ClobClient>,
        cache: Arc<dyn CacheInvalidator>,
        sync_config: SyncConfig,
        audit_config: ClobAuditConfig,
        markets_refreshed: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            catalog,
            trades_client,
            clob,
            cache,
            sync_config,
            audit_config,
            markets_refreshed,
            events_lock: EntityLock::default(),
            markets_lock: EntityLock::default(),
            trades_lock: EntityLock::default(),
            stats: Mutex::new(BatchStats::default()),
        }
    }

    /// One-shot startup sync. On a fresh database (no closed market ever
    /// observed) the closed history is pulled too; afterwards closed rows are
    /// immutable and only open pages are refreshed.
    ///
    /// # Errors
    /// Returns the first sync error; the periodic timers retry later.
    pub async fn initial_sync(&self) -> Result<()> {
        let fresh = self.store.markets().is_fresh().await?;
        if fresh {
            tracing::info!("fresh database detected, syncing closed history as well");
        }
        // Markets first: event linkage updates existing market rows.
        self.sync_markets(fresh).await?;
        self.sync_events(fresh).await?;
        Ok(())
    }

    /// Paginated events refresh. Returns `None` when another events sync is
    /// already running.
    ///
    /// # Errors
    /// Records the failure in `sync_state` and returns it.
    pub async fn sync_events(&self, include_closed: bool) -> Result<Option<SyncOutcome>> {
        let Some(_guard) = self.events_lock.try_acquire() else {
            tracing::warn!("events sync already in flight, dropping this run");
            return Ok(None);
        };
        self.mark_syncing(EVENTS_ENTITY).await;

        match self.sync_events_inner(include_closed).await {
            Ok(outcome) => {
                self.stats.lock().last_event_rows = outcome.rows;
                self.store
                    .sync_state()
                    .mark(
                        EVENTS_ENTITY,
                        SyncStatus::Idle,
                        Some(json!({"pages": outcome.pages, "rows": outcome.rows})),
                    )
                    .await?;
                self.cache.invalidate(&CACHE_PATTERNS).await;
                Ok(Some(outcome))
            }
            Err(e) => {
                let _ = self
                    .store
                    .sync_state()
                    .mark_error(EVENTS_ENTITY, &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    async fn sync_events_inner(&self, include_closed: bool) -> Result<SyncOutcome> {
        let batch = self.sync_config.markets_batch_size;
        let passes: &[bool] = if include_closed { &[false, true] } else { &[false] };

        let mut outcome = SyncOutcome::default();
        let mut pairs = Vec::new();
        let mut without_children = 0;

        for &closed in passes {
            let mut offset = 0u32;
            loop {
                let page = self.catalog.events_page(closed, batch, offset).await?;
                let records: Vec<_> = page.iter().map(convert::event_record).collect();
                let (page_pairs, missing) = convert::collect_link_pairs(&page);

                outcome.rows += self.store.events().upsert_page(&records).await?;
                outcome.pages += 1;
                pairs.extend(page_pairs);
                without_children += missing;

                if page.len() < batch as usize {
                    break;
                }
                offset += batch;
            }
        }

        if without_children > 0 {
            tracing::warn!(
                count = without_children,
                "events arrived without nested child markets; linkage deferred"
            );
        }

        // Linkage runs after every event page of this sync has been upserted.
        let linked = self.store.events().link_markets(&pairs).await?;
        tracing::info!(
            pages = outcome.pages,
            rows = outcome.rows,
            linked,
            "events sync complete"
        );
        Ok(outcome)
    }

    /// Paginated markets refresh. Fires the markets-refreshed signal after
    /// the sync commits and cache invalidation completes. Returns `None`
    /// when another markets sync is already running.
    ///
    /// # Errors
    /// Records the failure in `sync_state` and returns it.
    pub async fn sync_markets(&self, include_closed: bool) -> Result<Option<SyncOutcome>> {
        let Some(_guard) = self.markets_lock.try_acquire() else {
            tracing::warn!("markets sync already in flight, dropping this run");
            return Ok(None);
        };
        self.mark_syncing(MARKETS_ENTITY).await;

        match self.sync_markets_inner(include_closed).await {
            Ok(outcome) => {
                self.stats.lock().last_market_rows = outcome.rows;
                self.store
                    .sync_state()
                    .mark(
                        MARKETS_ENTITY,
                        SyncStatus::Idle,
                        Some(json!({"pages": outcome.pages, "rows": outcome.rows})),
                    )
                    .await?;
                self.cache.invalidate(&CACHE_PATTERNS).await;
                self.markets_refreshed.notify_one();
                Ok(Some(outcome))
            }
            Err(e) => {
                let _ = self
                    .store
                    .sync_state()
                    .mark_error(MARKETS_ENTITY, &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    async fn sync_markets_inner(&self, include_closed: bool) -> Result<SyncOutcome> {
        let batch = self.sync_config.markets_batch_size;
        let passes: &[bool] = if include_closed { &[false, true] } else { &[false] };

        let mut outcome = SyncOutcome::default();
        for &closed in passes {
            let mut offset = 0u32;
            loop {
                let page = self.catalog.markets_page(closed, batch, offset).await?;
                let records: Vec<_> = page.iter().map(convert::market_record).collect();

                outcome.rows += self.store.markets().upsert_page(&records).await?;
                outcome.pages += 1;

                if page.len() < batch as usize {
                    break;
                }
                offset += batch;
            }
        }

        tracing::info!(pages = outcome.pages, rows = outcome.rows, "markets sync complete");
        Ok(outcome)
    }

    /// One pull of the global trades feed, filtered to tracked tokens.
    /// Returns `None` when another trade sync is already running.
    ///
    /// # Errors
    /// Records the failure in `sync_state` and returns it.
    pub async fn sync_recent_trades(&self) -> Result<Option<u64>> {
        let Some(_guard) = self.trades_lock.try_acquire() else {
            tracing::warn!("trade sync already in flight, dropping this run");
            return Ok(None);
        };
        self.mark_syncing(TRADES_ENTITY).await;

        match self.sync_trades_inner().await {
            Ok((fetched, matched, inserted)) => {
                self.stats.lock().last_trades_inserted = inserted;
                self.store
                    .sync_state()
                    .mark(
                        TRADES_ENTITY,
                        SyncStatus::Idle,
                        Some(json!({"fetched": fetched, "matched": matched, "inserted": inserted})),
                    )
                    .await?;
                Ok(Some(inserted))
            }
            Err(e) => {
                let _ = self
                    .store
                    .sync_state()
                    .mark_error(TRADES_ENTITY, &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    async fn sync_trades_inner(&self) -> Result<(usize, usize, u64)> {
        let live = self
            .store
            .markets()
            .live_markets(self.sync_config.trades_sync_market_limit)
            .await?;
        let mut token_to_market: HashMap<&str, &str> = HashMap::new();
        for market in &live {
            for token in &market.outcome_token_ids {
                token_to_market.insert(token.as_str(), market.id.as_str());
            }
        }

        let fetched = self
            .trades_client
            .recent(self.sync_config.trades_batch_size)
            .await?;
        let records = build_trade_records(&fetched, &token_to_market);
        let matched = records.len();
        let inserted = self.store.trades().insert_batch(&records).await?;

        tracing::info!(
            fetched = fetched.len(),
            matched,
            inserted,
            "trade ingestion complete"
        );
        Ok((fetched.len(), matched, inserted))
    }

    /// Pure-SQL expiration pass over open rows. Runs on its own timer so a
    /// long catalog sync cannot starve it.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn run_expiration_audit(&self) -> Result<u64> {
        let markets = self.store.markets().deactivate_expired().await?;
        let events = self.store.events().deactivate_expired().await?;
        let orphans = self.store.events().deactivate_orphans().await?;

        let total = markets + events + orphans;
        if total > 0 {
            tracing::info!(markets, events, orphans, "expiration audit deactivated rows");
            self.cache.invalidate(&CACHE_PATTERNS).await;
        }
        Ok(total)
    }

    /// Reconciles the catalog's optimistic flags against CLOB tradability.
    ///
    /// # Errors
    /// Records the failure in `sync_state` and returns it.
    pub async fn audit_clob_tradability(&self) -> Result<ClobAuditOutcome> {
        self.mark_syncing(CLOB_AUDIT_ENTITY).await;
        match clob_audit::run(&self.store, &self.clob, &self.audit_config).await {
            Ok(outcome) => {
                if outcome.markets_closed > 0 || outcome.events_closed > 0 {
                    self.cache.invalidate(&CACHE_PATTERNS).await;
                }
                self.store
                    .sync_state()
                    .mark(
                        CLOB_AUDIT_ENTITY,
                        SyncStatus::Idle,
                        Some(json!({
                            "probed": outcome.probed,
                            "markets_closed": outcome.markets_closed,
                            "events_closed": outcome.events_closed,
                            "failures": outcome.failures,
                        })),
                    )
                    .await?;
                Ok(outcome)
            }
            Err(e) => {
                let _ = self
                    .store
                    .sync_state()
                    .mark_error(CLOB_AUDIT_ENTITY, &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> BatchStatus {
        BatchStatus {
            events_syncing: self.events_lock.is_held(),
            markets_syncing: self.markets_lock.is_held(),
            trades_syncing: self.trades_lock.is_held(),
            stats: *self.stats.lock(),
        }
    }

    async fn mark_syncing(&self, entity: &str) {
        if let Err(e) = self
            .store
            .sync_state()
            .mark(entity, SyncStatus::Syncing, None)
            .await
        {
            tracing::warn!(entity, error = %e, "failed to record syncing state");
        }
    }
}

/// Deterministic trade id: lowercase hex of a SHA-256 over the trade's
/// content. Identical content always produces the same id, so re-ingesting
/// a feed window is a no-op.
#[must_use]
pub fn trade_id(trade: &GlobalTrade) -> String {
    let mut hasher = Sha256::new();
    hasher.update(trade.asset.as_bytes());
    hasher.update(b"|");
    hasher.update(trade.side.as_bytes());
    hasher.update(b"|");
    hasher.update(trade.price.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(trade.size.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(trade.timestamp.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(trade.transaction_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(trade.proxy_wallet.as_bytes());
    hex::encode(hasher.finalize())
}

/// Keeps trades whose asset belongs to a tracked market and gives each a
/// deterministic id.
fn build_trade_records(
    trades: &[GlobalTrade],
    token_to_market: &HashMap<&str, &str>,
) -> Vec<TradeRecord> {
    trades
        .iter()
        .filter_map(|trade| {
            let market_id = token_to_market.get(trade.asset.as_str())?;
            let timestamp = Utc
                .timestamp_opt(trade.timestamp, 0)
                .single()
                .unwrap_or_default();
            Some(TradeRecord {
                id: trade_id(trade),
                market_id: (*market_id).to_string(),
                asset: trade.asset.clone(),
                side: trade.side.clone(),
                price: trade.price,
                size: trade.size,
                timestamp,
                transaction_hash: trade.transaction_hash.clone(),
                proxy_wallet: trade.proxy_wallet.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_trade() -> GlobalTrade {
        GlobalTrade {
            asset: "A".to_string(),
            side: "BUY".to_string(),
            price: dec!(0.5),
            size: dec!(10),
            timestamp: 1700,
            transaction_hash: "0xabc".to_string(),
            proxy_wallet: "0xwallet".to_string(),
        }
    }

    #[test]
    fn entity_lock_is_exclusive_and_released_on_drop() {
        let lock = EntityLock::default();
        assert!(!lock.is_held());

        let guard = lock.try_acquire().unwrap();
        assert!(lock.is_held());
        assert!(lock.try_acquire().is_none());

        drop(guard);
        assert!(!lock.is_held());
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn trade_id_is_a_function_of_content() {
        let trade = sample_trade();
        let a = trade_id(&trade);
        let b = trade_id(&sample_trade());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn trade_id_changes_with_any_field() {
        let base = trade_id(&sample_trade());

        let mut t = sample_trade();
        t.side = "SELL".to_string();
        assert_ne!(base, trade_id(&t));

        let mut t = sample_trade();
        t.price = dec!(0.51);
        assert_ne!(base, trade_id(&t));

        let mut t = sample_trade();
        t.timestamp = 1701;
        assert_ne!(base, trade_id(&t));

        let mut t = sample_trade();
        t.proxy_wallet = "0xother".to_string();
        assert_ne!(base, trade_id(&t));
    }

    #[test]
    fn trade_records_keep_only_tracked_assets() {
        let mut other = sample_trade();
        other.asset = "B".to_string();
        let trades = vec![sample_trade(), other];

        let mut map: HashMap<&str, &str> = HashMap::new();
        map.insert("A", "m-1");

        let records = build_trade_records(&trades, &map);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].market_id, "m-1");
        assert_eq!(records[0].asset, "A");
        assert_eq!(records[0].timestamp.timestamp(), 1700);
    }

    #[test]
    fn duplicate_feed_rows_share_one_id() {
        let trades = vec![sample_trade(), sample_trade()];
        let mut map: HashMap<&str, &str> = HashMap::new();
        map.insert("A", "m-1");

        let records = build_trade_records(&trades, &map);
        assert_eq!(records.len(), 2);
        // Same content, same id: the second row is dropped by the store's
        // ON CONFLICT DO NOTHING.
        assert_eq!(records[0].id, records[1].id);
    }
}
