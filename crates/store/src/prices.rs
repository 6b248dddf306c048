//! Price time-series: idempotent sample inserts, the realtime flush write,
//! and chunked retention deletes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::rows::{PriceSample, PriceSource, PriceUpdate};

#[derive(Debug, Clone)]
pub struct PricesRepo {
    pool: PgPool,
}

impl PricesRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts samples, dropping duplicates on
    /// `(market_id, token_id, timestamp, source)`. Returns the number of rows
    /// actually written.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub async fn insert_samples(&self, samples: &[PriceSample]) -> Result<u64> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut inserted = 0;
        // Stay well under the bind-parameter limit.
        for chunk in samples.chunks(5_000) {
            let mut query = insert_query(chunk);
            inserted += query.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(inserted)
    }

    /// Applies one market's buffered realtime updates in a single
    /// transaction: replaces prices at the matching token index, appends a
    /// websocket-sourced sample per update, and stamps `price_updated_at`.
    /// `last_trade_price` is never touched here.
    ///
    /// Updates for tokens the market does not carry are ignored.
    ///
    /// # Errors
    /// Returns an error if any statement fails; the transaction is then
    /// rolled back and the caller keeps its buffer.
    pub async fn apply_market_updates(
        &self,
        market_id: &str,
        updates: &[PriceUpdate],
    ) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;

        let row: Option<(Vec<String>, Vec<Decimal>)> = sqlx::query_as(
            "SELECT outcome_token_ids, outcome_prices FROM markets WHERE id = $1 FOR UPDATE",
        )
        .bind(market_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((token_ids, mut prices)) = row else {
            // The market vanished from under us; nothing to write.
            tx.commit().await?;
            return Ok(());
        };

        let mut touched = false;
        for update in updates {
            let Some(index) = token_ids.iter().position(|t| *t == update.token_id) else {
                continue;
            };
            if index < prices.len() {
                prices[index] = update.price;
                touched = true;
            }
            sqlx::query(
                r"
                INSERT INTO price_history (market_id, token_id, timestamp, price, source)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (market_id, token_id, timestamp, source) DO NOTHING
                ",
            )
            .bind(market_id)
            .bind(&update.token_id)
            .bind(update.observed_at)
            .bind(update.price)
            .bind(PriceSource::Websocket.as_str())
            .execute(&mut *tx)
            .await?;
        }

        if touched {
            sqlx::query(
                "UPDATE markets SET outcome_prices = $2, price_updated_at = NOW() WHERE id = $1",
            )
            .bind(market_id)
            .bind(&prices)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Deletes one chunk of samples older than `cutoff`. Returns the rows
    /// removed; callers loop until it comes back short.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub async fn delete_chunk_before(&self, cutoff: DateTime<Utc>, chunk: i64) -> Result<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM price_history
            WHERE ctid IN (
                SELECT ctid FROM price_history WHERE timestamp < $1 LIMIT $2
            )
            ",
        )
        .bind(cutoff)
        .bind(chunk)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Count of all samples, for status surfaces.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM price_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn insert_query(samples: &[PriceSample]) -> QueryBuilder<'_, Postgres> {
    let mut query: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "INSERT INTO price_history (market_id, token_id, timestamp, price, source) ",
    );
    query.push_values(samples, |mut row, s| {
        row.push_bind(&s.market_id)
            .push_bind(&s.token_id)
            .push_bind(s.timestamp)
            .push_bind(s.price)
            .push_bind(s.source.as_str());
    });
    query.push(" ON CONFLICT (market_id, token_id, timestamp, source) DO NOTHING");
    query
}
