//! Lifecycle owner for the whole sync engine.
//!
//! Start order: the markets-refreshed wire, the one-shot initial sync, the
//! realtime manager, then the periodic timers. Every long-lived loop owns
//! its timer and exits on the shared shutdown signal; cancellation flows
//! from here downward.

use anyhow::Result;
use mirror_core::{AppConfig, CacheInvalidator};
use mirror_store::{Store, SyncStateRow};
use mirror_upstream::{
    CatalogClient, ClobClient, PriceHistoryClient, RequestSigner, TradesClient,
};
use parking_lot::Mutex;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::backfill::BackfillManager;
use crate::batch::{BatchStatus, BatchSyncManager};
use crate::realtime::RealtimeSyncManager;
use crate::retention::RetentionSweeper;

/// Delay before the one-shot CLOB audit after startup.
const FIRST_AUDIT_DELAY: Duration = Duration::from_secs(120);
/// Delay before the first retention sweep after startup.
const FIRST_SWEEP_DELAY: Duration = Duration::from_secs(300);
const SWEEP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);
const EXPIRATION_PERIOD: Duration = Duration::from_secs(60);

/// The four upstream clients, built once from configuration.
pub struct Clients {
    pub catalog: Arc<CatalogClient>,
    pub clob: Arc<ClobClient>,
    pub trades: Arc<TradesClient>,
    pub history: Arc<PriceHistoryClient>,
}

impl Clients {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = Duration::from_millis(config.upstream.request_timeout_ms);
        let rpm = NonZeroU32::new(config.upstream.catalog_requests_per_minute.max(1))
            .unwrap_or(NonZeroU32::MIN);

        let catalog = CatalogClient::with_rate_limit(
            config.upstream.catalog_base_url.clone(),
            timeout,
            rpm,
        );

        let mut clob = ClobClient::new(config.upstream.clob_base_url.clone(), timeout);
        if let Some(credentials) = &config.credentials {
            clob = clob.with_signer(RequestSigner::new(credentials.clone()));
        }

        let trades = TradesClient::new(config.upstream.data_base_url.clone(), timeout);
        // The price-history endpoint is served by the CLOB host.
        let history = PriceHistoryClient::new(config.upstream.clob_base_url.clone(), timeout);

        Self {
            catalog: Arc::new(catalog),
            clob: Arc::new(clob),
            trades: Arc::new(trades),
            history: Arc::new(history),
        }
    }
}

/// Aggregate of the three sub-statuses, for health surfaces.
#[derive(Debug, Clone)]
pub struct OrchestratorStatus {
    pub sync_state: Vec<SyncStateRow>,
    pub batch: BatchStatus,
    pub realtime_connected: bool,
    pub buffered_prices: usize,
}

pub struct Orchestrator {
    config: AppConfig,
    store: Store,
    batch: Arc<BatchSyncManager>,
    realtime: Arc<RealtimeSyncManager>,
    backfill: Arc<BackfillManager>,
    retention: Arc<RetentionSweeper>,
    markets_refreshed: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(store: Store, config: AppConfig, cache: Arc<dyn CacheInvalidator>) -> Self {
        let clients = Clients::from_config(&config);
        let markets_refreshed = Arc::new(Notify::new());

        let batch = Arc::new(BatchSyncManager::new(
            store.clone(),
            clients.catalog,
            clients.trades,
            clients.clob,
            cache,
            config.sync.clone(),
            config.audit.clone(),
            Arc::clone(&markets_refreshed),
        ));
        let realtime = Arc::new(RealtimeSyncManager::new(store.clone(), config.realtime.clone()));
        let backfill = Arc::new(BackfillManager::new(store.clone(), clients.history));
        let retention = Arc::new(RetentionSweeper::new(
            store.clone(),
            config.retention.clone(),
            config.sync.enable_trades_sync,
        ));

        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            store,
            batch,
            realtime,
            backfill,
            retention,
            markets_refreshed,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn batch(&self) -> &Arc<BatchSyncManager> {
        &self.batch
    }

    #[must_use]
    pub fn backfill(&self) -> &Arc<BackfillManager> {
        &self.backfill
    }

    /// Brings the engine up: wiring, initial sync, realtime, timers.
    ///
    /// # Errors
    /// Returns an error when the realtime manager cannot start. A failed
    /// initial sync is logged and retried by the timers instead.
    pub async fn start(&self) -> Result<()> {
        // Markets-refreshed wire: one consumer, the realtime resubscribe.
        {
            let realtime = Arc::clone(&self.realtime);
            let refreshed = Arc::clone(&self.markets_refreshed);
            let mut shutdown = self.shutdown_tx.subscribe();
            self.tasks.lock().push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = refreshed.notified() => {
                            if let Err(e) = realtime.resubscribe().await {
                                tracing::error!(error = %e, "resubscribe after markets refresh failed");
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        if let Err(e) = self.batch.initial_sync().await {
            tracing::error!(error = %e, "initial sync failed, periodic timers will retry");
        }

        Arc::clone(&self.realtime).start().await?;

        let markets_interval = self.config.markets_interval();
        {
            let batch = Arc::clone(&self.batch);
            self.spawn_periodic("markets_sync", markets_interval, markets_interval, move || {
                let batch = Arc::clone(&batch);
                async move { batch.sync_markets(false).await.map(|_| ()) }
            });
        }
        {
            let batch = Arc::clone(&self.batch);
            self.spawn_periodic(
                "events_sync",
                self.config.events_phase_shift(),
                markets_interval,
                move || {
                    let batch = Arc::clone(&batch);
                    async move { batch.sync_events(false).await.map(|_| ()) }
                },
            );
        }

        if self.config.sync.enable_trades_sync {
            let batch = Arc::clone(&self.batch);
            let trades_interval = self.config.trades_interval();
            self.spawn_periodic("trades_sync", trades_interval, trades_interval, move || {
                let batch = Arc::clone(&batch);
                async move { batch.sync_recent_trades().await.map(|_| ()) }
            });
        } else if let Err(e) = self.store.sync_state().mark_disabled("trades").await {
            tracing::warn!(error = %e, "failed to record disabled trade sync");
        }

        {
            let batch = Arc::clone(&self.batch);
            self.spawn_periodic(
                "expiration_audit",
                EXPIRATION_PERIOD,
                EXPIRATION_PERIOD,
                move || {
                    let batch = Arc::clone(&batch);
                    async move { batch.run_expiration_audit().await.map(|_| ()) }
                },
            );
        }
        {
            let batch = Arc::clone(&self.batch);
            self.spawn_periodic(
                "clob_audit",
                FIRST_AUDIT_DELAY,
                self.config.clob_audit_interval(),
                move || {
                    let batch = Arc::clone(&batch);
                    async move { batch.audit_clob_tradability().await.map(|_| ()) }
                },
            );
        }
        {
            let retention = Arc::clone(&self.retention);
            self.spawn_periodic("retention_sweep", FIRST_SWEEP_DELAY, SWEEP_PERIOD, move || {
                let retention = Arc::clone(&retention);
                async move { retention.sweep_once().await.map(|_| ()) }
            });
        }

        tracing::info!("orchestrator started");
        Ok(())
    }

    /// Stops the timers, shuts the realtime manager down (one final flush),
    /// and waits for every task to exit.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        self.realtime.stop().await;
        tracing::info!("orchestrator stopped");
    }

    /// Aggregated health snapshot.
    ///
    /// # Errors
    /// Returns an error if the sync-state read fails.
    pub async fn status(&self) -> Result<OrchestratorStatus> {
        let sync_state = self.store.sync_state().all().await?;
        Ok(OrchestratorStatus {
            sync_state,
            batch: self.batch.status(),
            realtime_connected: self.realtime.is_connected(),
            buffered_prices: self.realtime.buffered(),
        })
    }

    fn spawn_periodic<F, Fut>(&self, name: &'static str, initial_delay: Duration, period: Duration, run: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + initial_delay;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = run().await {
                            tracing::error!(task = name, error = %e, "periodic task failed, retrying next tick");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(task = name, "periodic task stopped");
        });
        self.tasks.lock().push(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::ClobCredentials;

    #[test]
    fn configured_base_urls_reach_the_clients() {
        let mut config = AppConfig::default();
        config.upstream.catalog_base_url = "http://catalog.test:9000".to_string();
        config.upstream.clob_base_url = "http://clob.test:9001".to_string();
        config.upstream.data_base_url = "http://data.test:9002".to_string();

        let clients = Clients::from_config(&config);
        assert_eq!(clients.catalog.base_url(), "http://catalog.test:9000");
        assert_eq!(clients.clob.base_url(), "http://clob.test:9001");
        assert_eq!(clients.trades.base_url(), "http://data.test:9002");
        assert_eq!(clients.history.base_url(), "http://clob.test:9001");
    }

    #[test]
    fn credentials_attach_a_signer_without_breaking_construction() {
        let mut config = AppConfig::default();
        config.credentials = Some(ClobCredentials {
            address: "0xabc".to_string(),
            api_key: "key".to_string(),
            secret: "c2VjcmV0".to_string(),
            passphrase: "pass".to_string(),
        });
        let _clients = Clients::from_config(&config);
    }
}
