use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use mirror_core::{AppConfig, NoopInvalidator};
use mirror_store::Store;
use mirror_sync::Orchestrator;
use mirror_upstream::HistoryInterval;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mirror")]
#[command(about = "Prediction-market indexer", long_about = None)]
struct Cli {
    /// Config file path (merged with MIRROR_* environment variables)
    #[arg(short, long, default_value = "config/Mirror.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the indexer: batch sync, realtime prices, audits, retention
    Run,
    /// Run the one-shot catalog sync and exit
    InitialSync,
    /// Import historical prices
    Backfill {
        /// Market id to backfill
        #[arg(long, conflicts_with = "missing")]
        market: Option<String>,
        /// History window: max, 1w, 1d, 6h, 1h
        #[arg(long, default_value = "1w")]
        interval: String,
        /// Backfill active markets that have no samples yet
        #[arg(long)]
        missing: bool,
    },
    /// Print per-entity sync state with staleness
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::InitialSync => initial_sync(config).await,
        Commands::Backfill {
            market,
            interval,
            missing,
        } => backfill(config, market, &interval, missing).await,
        Commands::Status => status(config).await,
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let store = Store::connect(&config.database).await?;
    let orchestrator = Orchestrator::new(store, config, Arc::new(NoopInvalidator));

    orchestrator.start().await?;
    tracing::info!("indexer running, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    orchestrator.stop().await;
    Ok(())
}

async fn initial_sync(config: AppConfig) -> Result<()> {
    let store = Store::connect(&config.database).await?;
    let orchestrator = Orchestrator::new(store, config, Arc::new(NoopInvalidator));
    orchestrator.batch().initial_sync().await?;
    Ok(())
}

async fn backfill(
    config: AppConfig,
    market: Option<String>,
    interval: &str,
    missing: bool,
) -> Result<()> {
    let store = Store::connect(&config.database).await?;
    let orchestrator = Orchestrator::new(store, config, Arc::new(NoopInvalidator));

    match (market, missing) {
        (Some(market_id), false) => {
            let interval = HistoryInterval::from_str(interval)?;
            let written = orchestrator
                .backfill()
                .backfill_market(&market_id, interval)
                .await?;
            println!("{written} samples written for market {market_id}");
        }
        (None, true) => {
            let written = orchestrator.backfill().backfill_missing().await?;
            println!("{written} samples written");
        }
        _ => bail!("pass either --market <id> or --missing"),
    }
    Ok(())
}

async fn status(config: AppConfig) -> Result<()> {
    let store = Store::connect(&config.database).await?;
    let threshold_ms = config.sync.sync_stale_threshold_ms;

    let rows = store.sync_state().all().await?;
    if rows.is_empty() {
        println!("no sync state recorded yet");
        return Ok(());
    }

    let now = Utc::now();
    println!(
        "{:<12} {:<14} {:<26} {:<6} error",
        "entity", "status", "last_sync_at", "stale"
    );
    for row in rows {
        let last_sync = row
            .last_sync_at
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
        let stale = row.is_stale(now, threshold_ms);
        println!(
            "{:<12} {:<14} {:<26} {:<6} {}",
            row.entity,
            row.status,
            last_sync,
            stale,
            row.error_message.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
