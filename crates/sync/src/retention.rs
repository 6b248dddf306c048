//! Retention sweep for the append-only tables.
//!
//! Deletes expired samples and trades in small chunks with a yield between
//! chunks, so the sweep never holds long locks against the writers.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use mirror_core::RetentionConfig;
use mirror_store::Store;
use std::time::Duration;

const CHUNK: i64 = 5_000;
const CHUNK_YIELD: Duration = Duration::from_millis(100);

pub struct RetentionSweeper {
    store: Store,
    config: RetentionConfig,
    trades_enabled: bool,
}

impl RetentionSweeper {
    #[must_use]
    pub fn new(store: Store, config: RetentionConfig, trades_enabled: bool) -> Self {
        Self {
            store,
            config,
            trades_enabled,
        }
    }

    /// One full sweep. Returns `(samples_deleted, trades_deleted)`. Running
    /// it twice in a row deletes nothing the second time, short of rows that
    /// expired in between.
    ///
    /// # Errors
    /// Returns an error if a delete fails; the next scheduled sweep retries.
    pub async fn sweep_once(&self) -> Result<(u64, u64)> {
        let price_cutoff = Utc::now() - ChronoDuration::days(self.config.price_history_days);
        let mut samples_deleted = 0;
        loop {
            let deleted = self
                .store
                .prices()
                .delete_chunk_before(price_cutoff, CHUNK)
                .await?;
            samples_deleted += deleted;
            if deleted < CHUNK as u64 {
                break;
            }
            tokio::time::sleep(CHUNK_YIELD).await;
        }

        let mut trades_deleted = 0;
        if self.trades_enabled {
            let trade_cutoff = Utc::now() - ChronoDuration::days(self.config.trades_days);
            loop {
                let deleted = self
                    .store
                    .trades()
                    .delete_chunk_before(trade_cutoff, CHUNK)
                    .await?;
                trades_deleted += deleted;
                if deleted < CHUNK as u64 {
                    break;
                }
                tokio::time::sleep(CHUNK_YIELD).await;
            }
        }

        if samples_deleted > 0 || trades_deleted > 0 {
            tracing::info!(samples_deleted, trades_deleted, "retention sweep complete");
        }
        Ok((samples_deleted, trades_deleted))
    }
}
