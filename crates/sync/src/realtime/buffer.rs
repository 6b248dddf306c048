//! Process-wide price buffer between the WebSocket shards and the flush task.
//!
//! Writers overwrite per-token entries (latest-wins within a flush window);
//! the flush task takes a snapshot, writes it out, and then removes only the
//! entries that are still exactly the snapshotted observation, so anything
//! that arrived mid-flush survives to the next flush.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Soft ceiling; beyond this the flush loop logs a warning.
pub const SOFT_WARNING_SIZE: usize = 10_000;

/// One unflushed price observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPrice {
    pub market_id: String,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PriceBuffer {
    inner: Mutex<HashMap<String, PendingPrice>>,
}

impl PriceBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation, overwriting any unsent entry for the token.
    pub fn insert(&self, token_id: &str, market_id: &str, price: Decimal) {
        let pending = PendingPrice {
            market_id: market_id.to_string(),
            price,
            observed_at: Utc::now(),
        };
        self.inner.lock().insert(token_id.to_string(), pending);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copies the current contents for a flush.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, PendingPrice> {
        self.inner.lock().clone()
    }

    /// Removes snapshot entries that the live buffer still holds unchanged.
    /// A token updated mid-flush keeps its newer entry.
    pub fn remove_flushed(&self, snapshot: &HashMap<String, PendingPrice>) {
        let mut inner = self.inner.lock();
        for (token, flushed) in snapshot {
            if inner.get(token) == Some(flushed) {
                inner.remove(token);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn insert_overwrites_unsent_entries() {
        let buffer = PriceBuffer::new();
        buffer.insert("t1", "m1", dec!(0.40));
        buffer.insert("t1", "m1", dec!(0.42));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.snapshot()["t1"].price, dec!(0.42));
    }

    #[test]
    fn failed_flush_preserves_everything() {
        let buffer = PriceBuffer::new();
        buffer.insert("t1", "m1", dec!(0.40));
        buffer.insert("t2", "m1", dec!(0.55));

        // A flush that errors never calls remove_flushed.
        let _snapshot = buffer.snapshot();
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn successful_flush_removes_only_snapshotted_entries() {
        let buffer = PriceBuffer::new();
        buffer.insert("t1", "m1", dec!(0.40));
        buffer.insert("t2", "m1", dec!(0.55));

        let snapshot = buffer.snapshot();
        // t3 arrives mid-flush.
        buffer.insert("t3", "m2", dec!(0.10));
        buffer.remove_flushed(&snapshot);

        assert_eq!(buffer.len(), 1);
        assert!(buffer.snapshot().contains_key("t3"));
    }

    #[test]
    fn entry_updated_mid_flush_survives() {
        let buffer = PriceBuffer::new();
        buffer.insert("t1", "m1", dec!(0.40));

        let snapshot = buffer.snapshot();
        // Newer observation for the same token lands during the flush.
        buffer.insert("t1", "m1", dec!(0.43));
        buffer.remove_flushed(&snapshot);

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.snapshot()["t1"].price, dec!(0.43));
    }

    #[test]
    fn empty_buffer_snapshot_is_empty() {
        let buffer = PriceBuffer::new();
        assert!(buffer.is_empty());
        assert!(buffer.snapshot().is_empty());
    }
}
