//! Cache invalidation hook.
//!
//! The HTTP layer in front of the store keeps a response cache keyed by
//! request method and path. The sync engine does not own that cache; it only
//! tells it which key patterns became stale. Patterns use glob semantics and
//! are matched by the implementor.

use async_trait::async_trait;

/// Keys covering market listing responses.
pub const MARKETS_PATTERN: &str = "*GET:/markets*";
/// Keys covering event listing responses.
pub const EVENTS_PATTERN: &str = "*GET:/events*";
/// Keys covering aggregate statistics responses.
pub const STATS_PATTERN: &str = "*GET:/stats*";

/// Deletes cached responses matching glob patterns.
///
/// Called after a successful catalog sync and after any audit changes
/// visible state. Implementations must tolerate repeated calls with the same
/// patterns.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, patterns: &[&str]);
}

/// Invalidator used when no response cache is wired in.
#[derive(Debug, Clone, Default)]
pub struct NoopInvalidator;

#[async_trait]
impl CacheInvalidator for NoopInvalidator {
    async fn invalidate(&self, patterns: &[&str]) {
        tracing::debug!(?patterns, "cache invalidation skipped (no cache wired)");
    }
}
