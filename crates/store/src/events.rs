//! Event rows: page upserts with the monotonic merge rule, market linkage,
//! and the event half of the expiration audit.

use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::rows::EventRecord;

/// Market-to-event pairs are applied in bounded chunks to keep statements
/// under the parameter limit.
const LINK_CHUNK: usize = 5_000;

#[derive(Debug, Clone)]
pub struct EventsRepo {
    pool: PgPool,
}

impl EventsRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upserts one catalog page in a single statement.
    ///
    /// Scalars take the incoming value; `closed` and `archived` are OR-merged
    /// so they never flip back to false; `active` is recomputed from the
    /// merged flags. The search vector is a generated column, so it follows
    /// the merged row in the same transaction.
    ///
    /// # Errors
    /// Returns an error if the statement fails; the page is then not applied
    /// at all.
    pub async fn upsert_page(&self, records: &[EventRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut query = upsert_query(records);
        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Applies `(market_id, event_id)` pairs collected from nested event
    /// children. Only this path ever writes `markets.event_id`.
    ///
    /// # Errors
    /// Returns an error if any chunk fails.
    pub async fn link_markets(&self, pairs: &[(String, String)]) -> Result<u64> {
        let mut linked = 0;
        for chunk in pairs.chunks(LINK_CHUNK) {
            let mut query = link_query(chunk);
            let result = query.build().execute(&self.pool).await?;
            linked += result.rows_affected();
        }
        Ok(linked)
    }

    /// Deactivates open events whose end date has passed. Closed or archived
    /// history is never touched.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub async fn deactivate_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE events
            SET active = FALSE, updated_at = NOW()
            WHERE active AND NOT closed AND end_date IS NOT NULL AND end_date < NOW()
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Deactivates open events with no live linked market left.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub async fn deactivate_orphans(&self) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE events e
            SET active = FALSE, updated_at = NOW()
            WHERE e.active AND NOT e.closed
              AND NOT EXISTS (
                  SELECT 1 FROM markets m
                  WHERE m.event_id = e.id
                    AND m.active AND NOT m.closed AND NOT m.archived
              )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Count of all event rows, for status surfaces.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn upsert_query(records: &[EventRecord]) -> QueryBuilder<'_, Postgres> {
    let mut query: QueryBuilder<'_, Postgres> = QueryBuilder::new(
        "INSERT INTO events (id, title, slug, description, image, icon, start_date, end_date, \
         volume, volume_24h, liquidity, active, closed, archived, tags) ",
    );
    query.push_values(records, |mut row, e| {
        row.push_bind(&e.id)
            .push_bind(&e.title)
            .push_bind(&e.slug)
            .push_bind(&e.description)
            .push_bind(&e.image)
            .push_bind(&e.icon)
            .push_bind(e.start_date)
            .push_bind(e.end_date)
            .push_bind(e.volume)
            .push_bind(e.volume_24h)
            .push_bind(e.liquidity)
            .push_bind(e.active && !e.closed && !e.archived)
            .push_bind(e.closed)
            .push_bind(e.archived)
            .push_bind(&e.tags);
    });
    query.push(
        " ON CONFLICT (id) DO UPDATE SET \
         title = EXCLUDED.title, \
         slug = EXCLUDED.slug, \
         description = EXCLUDED.description, \
         image = EXCLUDED.image, \
         icon = EXCLUDED.icon, \
         start_date = EXCLUDED.start_date, \
         end_date = EXCLUDED.end_date, \
         volume = EXCLUDED.volume, \
         volume_24h = EXCLUDED.volume_24h, \
         liquidity = EXCLUDED.liquidity, \
         closed = events.closed OR EXCLUDED.closed, \
         archived = events.archived OR EXCLUDED.archived, \
         active = CASE WHEN events.closed OR EXCLUDED.closed \
                        OR events.archived OR EXCLUDED.archived \
                  THEN FALSE ELSE EXCLUDED.active END, \
         tags = EXCLUDED.tags, \
         updated_at = NOW()",
    );
    query
}

fn link_query(pairs: &[(String, String)]) -> QueryBuilder<'_, Postgres> {
    let mut query: QueryBuilder<'_, Postgres> =
        QueryBuilder::new("UPDATE markets SET event_id = v.event_id, updated_at = NOW() FROM (");
    query.push_values(pairs, |mut row, (market_id, event_id)| {
        row.push_bind(market_id).push_bind(event_id);
    });
    query.push(") AS v(market_id, event_id) WHERE markets.id = v.market_id");
    query
}
