//! Market rows: page upserts, audit candidate selection, closure cascade,
//! and the market half of the expiration audit.

use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::rows::{AuditCandidate, BackfillTarget, LiveMarket, MarketRecord};

#[derive(Debug, Clone)]
pub struct MarketsRepo {
    pool: PgPool,
}

impl MarketsRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upserts one catalog page in a single statement.
    ///
    /// Same merge rule as events; additionally `resolved` only ever turns on
    /// and the winning outcome, once known, sticks. `event_id`,
    /// `last_trade_price` via trades, and the realtime columns are not
    /// touched by this path.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub async fn upsert_page(&self, records: &[MarketRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut query = upsert_query(records);
        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// `true` when no closed market has ever been observed, i.e. a fresh
    /// database that still needs the closed history synced once.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn is_fresh(&self) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM markets WHERE closed")
            .fetch_one(&self.pool)
            .await?;
        Ok(count == 0)
    }

    /// Live markets (`active ∧ ¬closed ∧ ¬archived`) with their token ids,
    /// highest 24h volume first. `limit = 0` means unlimited.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn live_markets(&self, limit: u32) -> Result<Vec<LiveMarket>> {
        let rows = sqlx::query_as::<_, LiveMarket>(
            r"
            SELECT id, outcome_token_ids
            FROM markets
            WHERE active AND NOT closed AND NOT archived
            ORDER BY volume_24h DESC
            LIMIT NULLIF($1, 0)
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Top-N open markets by 24h volume, for the tradability audit.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn audit_candidates(&self, limit: u32) -> Result<Vec<AuditCandidate>> {
        let rows = sqlx::query_as::<_, AuditCandidate>(
            r"
            SELECT id, condition_id, event_id
            FROM markets
            WHERE active AND NOT closed AND NOT archived AND condition_id <> ''
            ORDER BY volume_24h DESC
            LIMIT $1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Open markets belonging to events that already mix open and closed
    /// markets. These tail markets tend to linger open after their siblings
    /// settle.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn mixed_event_candidates(&self) -> Result<Vec<AuditCandidate>> {
        let rows = sqlx::query_as::<_, AuditCandidate>(
            r"
            SELECT id, condition_id, event_id
            FROM markets
            WHERE active AND NOT closed AND NOT archived AND condition_id <> ''
              AND event_id IN (
                  SELECT event_id FROM markets
                  WHERE event_id IS NOT NULL
                  GROUP BY event_id
                  HAVING bool_or(closed) AND bool_or(NOT closed)
              )
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// All still-open markets of the given events, for closure propagation.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn open_markets_for_events(
        &self,
        event_ids: &[String],
    ) -> Result<Vec<AuditCandidate>> {
        if event_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, AuditCandidate>(
            r"
            SELECT id, condition_id, event_id
            FROM markets
            WHERE active AND NOT closed AND NOT archived AND condition_id <> ''
              AND event_id = ANY($1)
            ",
        )
        .bind(event_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Closes the given markets and, in the same transaction, closes every
    /// touched event whose remaining linked markets are all non-live.
    ///
    /// Returns `(markets_closed, events_closed)`.
    ///
    /// # Errors
    /// Returns an error if either statement fails; nothing is applied then.
    pub async fn close_markets_cascade(&self, market_ids: &[String]) -> Result<(u64, u64)> {
        if market_ids.is_empty() {
            return Ok((0, 0));
        }
        let mut tx = self.pool.begin().await?;

        let markets_closed = sqlx::query(
            r"
            UPDATE markets
            SET closed = TRUE, active = FALSE, updated_at = NOW()
            WHERE id = ANY($1) AND NOT closed
            ",
        )
        .bind(market_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let events_closed = sqlx::query(
            r"
            UPDATE events e
            SET closed = TRUE, active = FALSE, updated_at = NOW()
            WHERE NOT e.closed
              AND e.id IN (
                  SELECT DISTINCT event_id FROM markets
                  WHERE id = ANY($1) AND event_id IS NOT NULL
              )
              AND NOT EXISTS (
                  SELECT 1 FROM markets m
                  WHERE m.event_id = e.id
                    AND m.active AND NOT m.closed AND NOT m.archived
              )
            ",
        )
        .bind(market_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok((markets_closed, events_closed))
    }

    /// Deactivates open markets whose end date has passed. Closed rows are
    /// left alone.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub async fn deactivate_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE markets
            SET active = FALSE, updated_at = NOW()
            WHERE active AND NOT closed AND end_date IS NOT NULL AND end_date < NOW()
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Condition id and token ids for one market, for backfill.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn backfill_target(&self, market_id: &str) -> Result<Option<BackfillTarget>> {
        let row = sqlx::query_as::<_, BackfillTarget>(
            r"
            SELECT id, condition_id, outcome_token_ids
            FROM markets
            WHERE id = $1
            ",
        )
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Active markets that have no price samples yet, highest 24h volume
    /// first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn markets_missing_history(&self, limit: u32) -> Result<Vec<BackfillTarget>> {
        let rows = sqlx::query_as::<_, BackfillTarget>(
            r"
            SELECT m.id, m.condition_id, m.outcome_token_ids
            FROM markets m
            WHERE m.active AND NOT m.closed AND NOT m.archived AND m.condition_id <> ''
              AND NOT EXISTS (SELECT 1 FROM price_history p WHERE p.market_id = m.id)
            ORDER BY m.volume_24h DESC
            LIMIT $1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Count of all market rows, for status surfaces.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM markets")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn upsert_query(records: &[MarketRecord]) -> QueryBuilder<'_, Postgres> {
    let mut query: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "INSERT INTO markets (id, condition_id, question, description, slug, outcomes, \
         outcome_token_ids, outcome_prices, best_bid, best_ask, spread, last_trade_price, \
         volume, volume_24h, liquidity, category, end_date, active, closed, archived, \
         resolved, winning_outcome) ",
    );
    query.push_values(records, |mut row, m| {
        row.push_bind(&m.id)
            .push_bind(&m.condition_id)
            .push_bind(&m.question)
            .push_bind(&m.description)
            .push_bind(&m.slug)
            .push_bind(&m.outcomes)
            .push_bind(&m.outcome_token_ids)
            .push_bind(&m.outcome_prices)
            .push_bind(m.best_bid)
            .push_bind(m.best_ask)
            .push_bind(m.spread)
            .push_bind(m.last_trade_price)
            .push_bind(m.volume)
            .push_bind(m.volume_24h)
            .push_bind(m.liquidity)
            .push_bind(&m.category)
            .push_bind(m.end_date)
            .push_bind(m.active && !m.closed && !m.archived)
            .push_bind(m.closed)
            .push_bind(m.archived)
            .push_bind(m.resolved)
            .push_bind(m.winning_outcome);
    });
    query.push(
        " ON CONFLICT (id) DO UPDATE SET \
         condition_id = EXCLUDED.condition_id, \
         question = EXCLUDED.question, \
         description = EXCLUDED.description, \
         slug = EXCLUDED.slug, \
         outcomes = EXCLUDED.outcomes, \
         outcome_token_ids = EXCLUDED.outcome_token_ids, \
         outcome_prices = EXCLUDED.outcome_prices, \
         best_bid = EXCLUDED.best_bid, \
         best_ask = EXCLUDED.best_ask, \
         spread = EXCLUDED.spread, \
         last_trade_price = EXCLUDED.last_trade_price, \
         volume = EXCLUDED.volume, \
         volume_24h = EXCLUDED.volume_24h, \
         liquidity = EXCLUDED.liquidity, \
         category = EXCLUDED.category, \
         end_date = EXCLUDED.end_date, \
         closed = markets.closed OR EXCLUDED.closed, \
         archived = markets.archived OR EXCLUDED.archived, \
         active = CASE WHEN markets.closed OR EXCLUDED.closed \
                        OR markets.archived OR EXCLUDED.archived \
                  THEN FALSE ELSE EXCLUDED.active END, \
         resolved = markets.resolved OR EXCLUDED.resolved, \
         winning_outcome = COALESCE(EXCLUDED.winning_outcome, markets.winning_outcome), \
         updated_at = NOW()",
    );
    query
}
