//! Startup schema verification.
//!
//! Migrations run outside this process. The only check here is that the core
//! tables exist at all; running against an unmigrated database is the one
//! fatal condition in the indexer.

use anyhow::{bail, Result};
use sqlx::PgPool;

const REQUIRED_TABLES: [&str; 5] = ["events", "markets", "price_history", "trades", "sync_state"];

/// Fails when any core table is missing.
///
/// # Errors
/// Returns an error naming the missing tables, or the underlying query error.
pub async fn verify(pool: &PgPool) -> Result<()> {
    let required: Vec<String> = REQUIRED_TABLES.iter().map(|t| (*t).to_string()).collect();
    let present: Vec<(String,)> = sqlx::query_as(
        r"
        SELECT table_name::text
        FROM information_schema.tables
        WHERE table_schema = 'public' AND table_name = ANY($1)
        ",
    )
    .bind(&required)
    .fetch_all(pool)
    .await?;

    let present: Vec<&str> = present.iter().map(|(t,)| t.as_str()).collect();
    let missing: Vec<&str> = REQUIRED_TABLES
        .iter()
        .copied()
        .filter(|t| !present.contains(t))
        .collect();

    if !missing.is_empty() {
        bail!(
            "database schema is incomplete, missing tables: {} (apply db/schema.sql first)",
            missing.join(", ")
        );
    }

    tracing::info!("schema verified: all core tables present");
    Ok(())
}
