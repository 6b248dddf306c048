//! CLOB tradability audit.
//!
//! The catalog is optimistic about markets staying open; the CLOB is the
//! authority. The audit probes a bounded candidate set, propagates closures
//! through their events, and applies everything in one transaction so the
//! monotonic merge rule keeps stale catalog pages from reopening anything.

use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use mirror_core::ClobAuditConfig;
use mirror_store::{AuditCandidate, Store};
use mirror_upstream::ClobClient;
use std::collections::HashSet;

/// Result of one audit run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClobAuditOutcome {
    /// Markets probed across both passes.
    pub probed: usize,
    pub markets_closed: u64,
    pub events_closed: u64,
    /// Per-market probe failures; these never abort the audit.
    pub failures: usize,
}

pub(crate) async fn run(
    store: &Store,
    clob: &ClobClient,
    config: &ClobAuditConfig,
) -> Result<ClobAuditOutcome> {
    // Pass 1: top-N open markets by 24h volume, plus open markets in events
    // that already mix open and closed siblings.
    let mut candidates = store.markets().audit_candidates(config.batch_size).await?;
    let mixed = store.markets().mixed_event_candidates().await?;
    merge_candidates(&mut candidates, mixed);

    let mut outcome = ClobAuditOutcome::default();
    let mut probed_ids: HashSet<String> = candidates.iter().map(|c| c.id.clone()).collect();

    let (mut closed, failures) = probe(clob, candidates, config.concurrency).await;
    outcome.failures += failures;

    // Pass 2: probe every still-open market of the events touched by a
    // closure, to catch siblings the top-N cut missed.
    let touched_events: Vec<String> = closed
        .iter()
        .filter_map(|c| c.event_id.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if !touched_events.is_empty() {
        let followups: Vec<AuditCandidate> = store
            .markets()
            .open_markets_for_events(&touched_events)
            .await?
            .into_iter()
            .filter(|c| probed_ids.insert(c.id.clone()))
            .collect();
        let (more_closed, more_failures) = probe(clob, followups, config.concurrency).await;
        closed.extend(more_closed);
        outcome.failures += more_failures;
    }

    outcome.probed = probed_ids.len();

    let closed_ids: Vec<String> = closed.into_iter().map(|c| c.id).collect();
    let (markets_closed, events_closed) = store.markets().close_markets_cascade(&closed_ids).await?;
    outcome.markets_closed = markets_closed;
    outcome.events_closed = events_closed;

    tracing::info!(
        probed = outcome.probed,
        markets_closed,
        events_closed,
        failures = outcome.failures,
        "clob tradability audit complete"
    );
    Ok(outcome)
}

/// Probes candidates with a fixed-size worker pool. Returns the candidates
/// the CLOB deems closed, and the failure count.
async fn probe(
    clob: &ClobClient,
    candidates: Vec<AuditCandidate>,
    concurrency: u32,
) -> (Vec<AuditCandidate>, usize) {
    let concurrency = concurrency.max(1) as usize;
    let results: Vec<(AuditCandidate, Option<bool>)> = stream::iter(candidates)
        .map(|candidate| async move {
            match clob.market(&candidate.condition_id).await {
                Ok(market) => (candidate, Some(!market.is_tradable())),
                Err(e) => {
                    tracing::warn!(
                        market_id = %candidate.id,
                        condition_id = %candidate.condition_id,
                        error = %e,
                        "clob probe failed"
                    );
                    (candidate, None)
                }
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut closed = Vec::new();
    let mut failures = 0;
    for (candidate, deemed_closed) in results {
        match deemed_closed {
            Some(true) => closed.push(candidate),
            Some(false) => {}
            None => failures += 1,
        }
    }
    (closed, failures)
}

/// Appends extra candidates, skipping ids already present.
fn merge_candidates(base: &mut Vec<AuditCandidate>, extra: Vec<AuditCandidate>) {
    let seen: HashSet<String> = base.iter().map(|c| c.id.clone()).collect();
    base.extend(extra.into_iter().filter(|c| !seen.contains(&c.id)));
}
