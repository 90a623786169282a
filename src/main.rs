//! Main entry point for the paper-sniper bot
//!
//! Usage: `paper-sniper [config.json]`. Environment variables (`SNIPER_*`,
//! also read from `.env`) override the file.

use anyhow::Result;
use dotenv::dotenv;
use paper_sniper::sniper::{
    DexScreenerClient, JupiterQuoteClient, JsonSnapshotStore, PairInfoSource, Pipeline,
    QuoteSource, SqliteStatsStore, StatsStore,
};
use paper_sniper::{BotConfig, StatsBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();

    let config = match std::env::args().nth(1) {
        Some(path) => BotConfig::from_json_file(path)?.apply_env()?,
        None => BotConfig::from_env()?,
    };
    config.validate()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level())
        .init();

    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting paper-sniper");

    let quotes: Arc<dyn QuoteSource> = Arc::new(JupiterQuoteClient::new(
        config.quote_endpoints()?,
        config.quote_timeout(),
        config.quote_slippage_bps,
        config.quote_retry_attempts,
    )?);
    let market_data: Arc<dyn PairInfoSource> = Arc::new(DexScreenerClient::new(
        &config.market_data_url,
        config.lookup_timeout(),
        config.max_pair_age_ms.map(Duration::from_millis),
    )?);
    let store: Arc<dyn StatsStore> = match config.stats_backend {
        StatsBackend::Json => Arc::new(JsonSnapshotStore::new(&config.stats_path)),
        StatsBackend::Sqlite => SqliteStatsStore::open(&config.stats_path).await?,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, finishing in-flight trades");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for Ctrl-C");
                // Dropping the sender would stop the pipeline
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    let pipeline = Pipeline::new(config, quotes, market_data, store).await?;
    let snapshot = pipeline.run(shutdown_rx).await;

    info!(
        balance = snapshot.balance,
        pnl = snapshot.cumulative_pnl,
        trades = snapshot.trade_count,
        "Stopped"
    );
    Ok(())
}
