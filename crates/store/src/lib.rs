//! Postgres store for the indexer.
//!
//! One pool, five repositories. All writers use short transactions; the
//! catalog merge rule lives in the upsert SQL so it holds under concurrent
//! retries. The schema itself is managed outside this crate (see
//! `db/schema.sql`); [`Store::connect`] refuses to run against a database
//! missing the core tables.

pub mod events;
pub mod markets;
pub mod prices;
pub mod rows;
pub mod schema;
pub mod sync_state;
pub mod trades;

use anyhow::Result;
use mirror_core::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub use events::EventsRepo;
pub use markets::MarketsRepo;
pub use prices::PricesRepo;
pub use rows::{
    AuditCandidate, BackfillTarget, EventRecord, LiveMarket, MarketRecord, PriceSample,
    PriceSource, PriceUpdate, SyncStateRow, SyncStatus, TradeRecord,
};
pub use sync_state::SyncStateRepo;
pub use trades::TradesRepo;

/// Lifecycle-managed handle to the relational store.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
    events: EventsRepo,
    markets: MarketsRepo,
    prices: PricesRepo,
    trades: TradesRepo,
    sync_state: SyncStateRepo,
}

impl Store {
    /// Connects, then verifies the schema. A missing core table is fatal;
    /// the indexer must not run against an unmigrated database.
    ///
    /// # Errors
    /// Returns an error if the connection fails or the schema is incomplete.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.query_timeout_ms))
            .connect(&config.url)
            .await?;
        schema::verify(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Wraps an existing pool without schema verification.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            events: EventsRepo::new(pool.clone()),
            markets: MarketsRepo::new(pool.clone()),
            prices: PricesRepo::new(pool.clone()),
            trades: TradesRepo::new(pool.clone()),
            sync_state: SyncStateRepo::new(pool.clone()),
            pool,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub fn events(&self) -> &EventsRepo {
        &self.events
    }

    #[must_use]
    pub fn markets(&self) -> &MarketsRepo {
        &self.markets
    }

    #[must_use]
    pub fn prices(&self) -> &PricesRepo {
        &self.prices
    }

    #[must_use]
    pub fn trades(&self) -> &TradesRepo {
        &self.trades
    }

    #[must_use]
    pub fn sync_state(&self) -> &SyncStateRepo {
        &self.sync_state
    }
}
