//! Realtime price ingestion.
//!
//! A fixed pool of WebSocket shards subscribes to the live token universe,
//! parsed price changes land in one process-wide buffer, and a flush timer
//! drains the buffer into the store. The manager owns every piece's
//! lifecycle; nothing here is package-scope state.

pub mod buffer;
pub mod shard;

use anyhow::Result;
use mirror_core::RealtimeConfig;
use mirror_store::{LiveMarket, PriceUpdate, Store, SyncStatus};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use self::buffer::{PriceBuffer, SOFT_WARNING_SIZE};
use self::shard::{shard_for_token, spawn_shard, ShardConfig, ShardHandle};

const PRICES_ENTITY: &str = "prices";
const PING_INTERVAL: Duration = Duration::from_secs(30);
const FRAME_SPACING: Duration = Duration::from_millis(25);

/// Token-to-market lookup shared with the shards. Writers publish a fresh
/// map; readers clone the inner `Arc` and keep reading the old one.
pub(crate) type SharedTokenMap = Arc<RwLock<Arc<HashMap<String, String>>>>;

pub struct RealtimeSyncManager {
    store: Store,
    config: RealtimeConfig,
    buffer: Arc<PriceBuffer>,
    token_map: SharedTokenMap,
    shards: Mutex<Vec<ShardHandle>>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    is_flushing: AtomicBool,
    last_status: Mutex<Option<SyncStatus>>,
}

impl RealtimeSyncManager {
    #[must_use]
    pub fn new(store: Store, config: RealtimeConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            store,
            config,
            buffer: Arc::new(PriceBuffer::new()),
            token_map: Arc::new(RwLock::new(Arc::new(HashMap::new()))),
            shards: Mutex::new(Vec::new()),
            flush_task: Mutex::new(None),
            shutdown_tx,
            shutdown_rx,
            is_flushing: AtomicBool::new(false),
            last_status: Mutex::new(None),
        }
    }

    /// Loads the live token universe, spawns the shard pool, and starts the
    /// flush timer.
    ///
    /// # Errors
    /// Returns an error if the initial universe query fails.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let shard_count = self.config.connections.max(1) as usize;
        let live = self.store.markets().live_markets(0).await?;
        let (assignments, map) = build_universe(&live, shard_count);
        let token_count = map.len();
        *self.token_map.write() = Arc::new(map);

        let shard_config = self.shard_config();
        let mut shards = Vec::with_capacity(shard_count);
        for (index, assigned) in assignments.into_iter().enumerate() {
            shards.push(spawn_shard(
                index,
                shard_config.clone(),
                assigned,
                Arc::clone(&self.buffer),
                Arc::clone(&self.token_map),
                self.shutdown_rx.clone(),
            ));
        }
        *self.shards.lock() = shards;

        let manager = Arc::clone(&self);
        let flush_interval = Duration::from_millis(self.config.price_flush_interval_ms);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut shutdown = manager.shutdown_rx.clone();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let pending = manager.buffer.len();
                        if pending > SOFT_WARNING_SIZE {
                            tracing::warn!(pending, "price buffer above soft ceiling");
                        }
                        if let Err(e) = manager.flush_once().await {
                            tracing::warn!(error = %e, "price flush failed, buffer retained");
                        }
                        manager.publish_status().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *self.flush_task.lock() = Some(task);

        tracing::info!(shards = shard_count, tokens = token_count, "realtime manager started");
        self.publish_status().await;
        Ok(())
    }

    /// Recomputes the token universe after a markets refresh and hands every
    /// shard its new assignment. Connected shards subscribe to additions
    /// only; departures are left to decay with their connections.
    ///
    /// # Errors
    /// Returns an error if the universe query fails.
    pub async fn resubscribe(&self) -> Result<()> {
        let shard_count = self.config.connections.max(1) as usize;
        let live = self.store.markets().live_markets(0).await?;
        let (assignments, map) = build_universe(&live, shard_count);
        let token_count = map.len();
        *self.token_map.write() = Arc::new(map);

        let handles: Vec<(usize, tokio::sync::mpsc::Sender<shard::ShardCommand>)> = self
            .shards
            .lock()
            .iter()
            .map(|s| (s.index, s.command_sender()))
            .collect();

        for (index, sender) in handles {
            let tokens = assignments.get(index).cloned().unwrap_or_default();
            if sender.send(shard::ShardCommand::Assign(tokens)).await.is_err() {
                tracing::warn!(shard = index, "shard task gone, assignment dropped");
            }
        }

        tracing::info!(tokens = token_count, "resubscribed after markets refresh");
        Ok(())
    }

    /// Drains a snapshot of the buffer into the store. Serialized by an
    /// in-flight flag; a concurrent call returns immediately. On any write
    /// error the whole buffer is preserved for the next tick.
    ///
    /// # Errors
    /// Returns the first store error.
    pub async fn flush_once(&self) -> Result<usize> {
        if self
            .is_flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("flush already in progress, skipping");
            return Ok(0);
        }
        let result = self.flush_inner().await;
        self.is_flushing.store(false, Ordering::Release);
        result
    }

    async fn flush_inner(&self) -> Result<usize> {
        let snapshot = self.buffer.snapshot();
        if snapshot.is_empty() {
            return Ok(0);
        }

        let mut by_market: HashMap<String, Vec<PriceUpdate>> = HashMap::new();
        for (token_id, pending) in &snapshot {
            by_market
                .entry(pending.market_id.clone())
                .or_default()
                .push(PriceUpdate {
                    token_id: token_id.clone(),
                    price: pending.price,
                    observed_at: pending.observed_at,
                });
        }

        let markets = by_market.len();
        for (market_id, updates) in &by_market {
            self.store
                .prices()
                .apply_market_updates(market_id, updates)
                .await?;
        }

        self.buffer.remove_flushed(&snapshot);
        tracing::debug!(updates = snapshot.len(), markets, "price flush complete");
        Ok(snapshot.len())
    }

    /// Signals shutdown, joins the shards and the flush task, drains the
    /// buffer one final time, and publishes the disconnected state.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let shards: Vec<ShardHandle> = std::mem::take(&mut *self.shards.lock());
        for shard in shards {
            shard.join().await;
        }

        let task = self.flush_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        if let Err(e) = self.flush_once().await {
            tracing::warn!(error = %e, "final flush on shutdown failed");
        }
        self.publish_status().await;
        tracing::info!("realtime manager stopped");
    }

    /// `true` while any shard holds an open connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shards.lock().iter().any(ShardHandle::is_connected)
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Writes the aggregate `prices` row, only when the aggregate changed.
    async fn publish_status(&self) {
        let connected_shards = self
            .shards
            .lock()
            .iter()
            .filter(|s| s.is_connected())
            .count();
        let status = if connected_shards > 0 {
            SyncStatus::Connected
        } else {
            SyncStatus::Disconnected
        };

        {
            let mut last = self.last_status.lock();
            if *last == Some(status) {
                return;
            }
            *last = Some(status);
        }

        let metadata = json!({
            "connected_shards": connected_shards,
            "buffered": self.buffer.len(),
        });
        if let Err(e) = self
            .store
            .sync_state()
            .mark(PRICES_ENTITY, status, Some(metadata))
            .await
        {
            tracing::warn!(error = %e, "failed to publish realtime status");
        }
    }

    fn shard_config(&self) -> ShardConfig {
        ShardConfig {
            url: self.config.ws_url.clone(),
            reconnect_base: Duration::from_millis(self.config.reconnect_interval_ms),
            max_reconnect_attempts: self.config.max_reconnect_attempts,
            ping_interval: PING_INTERVAL,
            frame_spacing: FRAME_SPACING,
        }
    }
}

/// Splits the live token universe into per-shard assignments and the
/// token-to-market lookup. Assignment is by stable hash, so a token lands on
/// the same shard across restarts.
fn build_universe(
    live: &[LiveMarket],
    shards: usize,
) -> (Vec<Vec<String>>, HashMap<String, String>) {
    let mut assignments = vec![Vec::new(); shards.max(1)];
    let mut map = HashMap::new();
    for market in live {
        for token in &market.outcome_token_ids {
            if token.is_empty() {
                continue;
            }
            if map.insert(token.clone(), market.id.clone()).is_none() {
                assignments[shard_for_token(token, shards)].push(token.clone());
            }
        }
    }
    (assignments, map)
}
