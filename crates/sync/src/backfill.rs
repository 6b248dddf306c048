//! Historical price backfill.
//!
//! One-shot import of the per-condition history into the sample table. For
//! binary markets each point expands into the complement pair; markets with
//! more than two outcomes only get their primary token recorded, because the
//! history endpoint serves a single series per condition.

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use mirror_store::{PriceSample, PriceSource, Store};
use mirror_upstream::{HistoryInterval, HistoryPoint, PriceHistoryClient};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// How many sample-less markets one `backfill_missing` run covers.
const MISSING_BATCH: u32 = 100;
/// Spacing between per-market history fetches.
const FETCH_SPACING: Duration = Duration::from_millis(100);

pub struct BackfillManager {
    store: Store,
    history: Arc<PriceHistoryClient>,
}

impl BackfillManager {
    #[must_use]
    pub fn new(store: Store, history: Arc<PriceHistoryClient>) -> Self {
        Self { store, history }
    }

    /// Imports the history of one market. Returns the number of samples
    /// actually written; inserts are idempotent, so reruns add nothing.
    ///
    /// # Errors
    /// Returns an error when the market is unknown or the fetch/insert
    /// fails.
    pub async fn backfill_market(
        &self,
        market_id: &str,
        interval: HistoryInterval,
    ) -> Result<u64> {
        let target = self
            .store
            .markets()
            .backfill_target(market_id)
            .await?
            .with_context(|| format!("unknown market {market_id}"))?;

        if target.condition_id.is_empty() || target.outcome_token_ids.is_empty() {
            tracing::warn!(market_id, "market has no condition or tokens, nothing to backfill");
            return Ok(0);
        }
        if target.outcome_token_ids.len() > 2 {
            tracing::warn!(
                market_id,
                outcomes = target.outcome_token_ids.len(),
                "multi-outcome market: only the primary token series is recorded"
            );
        }

        let points = self
            .history
            .history(&target.condition_id, interval)
            .await?;
        let samples = expand_history(&target.id, &target.outcome_token_ids, &points);
        let written = self.store.prices().insert_samples(&samples).await?;

        tracing::info!(
            market_id,
            points = points.len(),
            samples = samples.len(),
            written,
            "backfill complete"
        );
        Ok(written)
    }

    /// Backfills up to 100 active markets that have no samples yet, highest
    /// 24h volume first, pacing the upstream fetches. Per-market failures
    /// are logged and skipped.
    ///
    /// # Errors
    /// Returns an error only when the candidate query fails.
    pub async fn backfill_missing(&self) -> Result<u64> {
        let targets = self
            .store
            .markets()
            .markets_missing_history(MISSING_BATCH)
            .await?;
        tracing::info!(count = targets.len(), "backfilling markets without samples");

        let mut written = 0;
        for target in &targets {
            match self.backfill_market(&target.id, HistoryInterval::OneWeek).await {
                Ok(n) => written += n,
                Err(e) => {
                    tracing::warn!(market_id = %target.id, error = %e, "backfill failed, skipping");
                }
            }
            tokio::time::sleep(FETCH_SPACING).await;
        }
        Ok(written)
    }
}

/// Expands a history series into samples.
///
/// Two tokens: `(token0, p)` and `(token1, 1-p)` per point. One token: a
/// single sample. More than two: the primary token only. All samples carry
/// the `clob` source tag.
fn expand_history(
    market_id: &str,
    token_ids: &[String],
    points: &[HistoryPoint],
) -> Vec<PriceSample> {
    let Some(primary) = token_ids.first() else {
        return Vec::new();
    };
    let complement = if token_ids.len() == 2 {
        token_ids.get(1)
    } else {
        None
    };

    let mut samples = Vec::with_capacity(points.len() * if complement.is_some() { 2 } else { 1 });
    for point in points {
        let Some(timestamp) = Utc.timestamp_opt(point.t, 0).single() else {
            continue;
        };
        samples.push(PriceSample {
            market_id: market_id.to_string(),
            token_id: primary.clone(),
            timestamp,
            price: point.p,
            source: PriceSource::Clob,
        });
        if let Some(other) = complement {
            samples.push(PriceSample {
                market_id: market_id.to_string(),
                token_id: other.clone(),
                timestamp,
                price: Decimal::ONE - point.p,
                source: PriceSource::Clob,
            });
        }
    }
    samples
}
