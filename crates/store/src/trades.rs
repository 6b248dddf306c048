//! Trade rows: append-only inserts keyed by content hash, plus retention.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::rows::TradeRecord;

#[derive(Debug, Clone)]
pub struct TradesRepo {
    pool: PgPool,
}

impl TradesRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts trades, silently dropping rows whose deterministic id already
    /// exists. Returns the number of new rows.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub async fn insert_batch(&self, trades: &[TradeRecord]) -> Result<u64> {
        if trades.is_empty() {
            return Ok(0);
        }
        let mut inserted = 0;
        for chunk in trades.chunks(2_000) {
            let mut query = insert_query(chunk);
            inserted += query.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(inserted)
    }

    /// Deletes one chunk of trades older than `cutoff`.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub async fn delete_chunk_before(&self, cutoff: DateTime<Utc>, chunk: i64) -> Result<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM trades
            WHERE ctid IN (
                SELECT ctid FROM trades WHERE timestamp < $1 LIMIT $2
            )
            ",
        )
        .bind(cutoff)
        .bind(chunk)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Count of all trade rows, for status surfaces.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trades")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn insert_query(trades: &[TradeRecord]) -> QueryBuilder<'_, Postgres> {
    let mut query: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "INSERT INTO trades (id, market_id, asset, side, price, size, timestamp, \
         transaction_hash, proxy_wallet) ",
    );
    query.push_values(trades, |mut row, t| {
        row.push_bind(&t.id)
            .push_bind(&t.market_id)
            .push_bind(&t.asset)
            .push_bind(&t.side)
            .push_bind(t.price)
            .push_bind(t.size)
            .push_bind(t.timestamp)
            .push_bind(&t.transaction_hash)
            .push_bind(&t.proxy_wallet);
    });
    query.push(" ON CONFLICT (id) DO NOTHING");
    query
}
