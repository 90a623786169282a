//! End-to-end tests for the sniper pipeline with scripted quote and market
//! data services

use async_trait::async_trait;
use paper_sniper::sniper::{
    Dispatcher, DispatchSettings, JsonSnapshotStore, LookupError, PairInfo, PairInfoSource,
    PauseFlag, Pipeline, Portfolio, QuoteError, QuoteResponse, QuoteSource, RetryManager,
    RetryPolicy, SqliteStatsStore, StatsStore, SwapQuote, TradeEngine, TradeParams,
};
use paper_sniper::sniper::CandidateQueue;
use paper_sniper::types::SOL_MINT;
use paper_sniper::{BotConfig, BotConfigBuilder, StatsBackend, TokenCandidate};
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

/// Buys 1000 tokens (6 decimals) for any input; sells for 0.35 SOL unless
/// the mint is marked as rugged.
#[derive(Default)]
struct ScriptedQuotes {
    rugged: HashSet<String>,
    buy_times: Mutex<Vec<Instant>>,
}

#[async_trait]
impl QuoteSource for ScriptedQuotes {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<QuoteResponse, QuoteError> {
        let output_amount = if input_mint == SOL_MINT {
            self.buy_times.lock().unwrap().push(Instant::now());
            1_000_000_000
        } else if self.rugged.contains(input_mint) {
            return Ok(QuoteResponse::NoRoute("COULD_NOT_FIND_ANY_ROUTE".to_string()));
        } else {
            350_000_000
        };
        Ok(QuoteResponse::Quote(SwapQuote {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            input_amount: amount,
            output_amount,
            fee_amount: 0,
            implied_price: output_amount as f64 / amount as f64,
            venue_label: "Raydium".to_string(),
        }))
    }
}

/// Answers "not indexed" for the first `not_ready_for` lookups of a mint.
#[derive(Default)]
struct ScriptedMarket {
    not_ready_for: HashMap<String, u32>,
    lookups: Mutex<HashMap<String, u32>>,
}

#[async_trait]
impl PairInfoSource for ScriptedMarket {
    async fn lookup(&self, mint: &str) -> Result<PairInfo, LookupError> {
        let mut lookups = self.lookups.lock().unwrap();
        let seen = lookups.entry(mint.to_string()).or_insert(0);
        *seen += 1;
        if *seen <= self.not_ready_for.get(mint).copied().unwrap_or(0) {
            return Err(LookupError::NotIndexed("pair not ready".to_string()));
        }
        Ok(PairInfo {
            pair_address: Some(format!("pair-{}", mint)),
            dex_id: Some("raydium".to_string()),
            url: None,
            price_native: Some(0.0003),
            price_usd: None,
            liquidity_usd: Some(10_000.0),
            age: Some(Duration::from_secs(5)),
        })
    }
}

fn test_config(stats_path: &str) -> BotConfig {
    BotConfigBuilder::new()
        .with_quote_endpoints(vec!["http://quotes.invalid".to_string()])
        .with_trade(0.3, 35_000)
        .with_costs(0.0025, 0.0, 0.03, 0.03)
        .with_initial_balance(5.0)
        .with_dispatch(2, 0)
        .with_retry(5_000, 60_000, 12)
        .with_stats(StatsBackend::Json, stats_path)
        .with_control_path(None)
        .build()
        .expect("valid config")
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_runs_trades_retries_and_persists() {
    let dir = TempDir::new().unwrap();
    let stats_path = dir.path().join("stats.json");
    let config = test_config(stats_path.to_str().unwrap());

    let profit_a = Pubkey::new_unique().to_string();
    let late_b = Pubkey::new_unique().to_string();
    let rug_c = Pubkey::new_unique().to_string();

    let quotes = Arc::new(ScriptedQuotes {
        rugged: HashSet::from([rug_c.clone()]),
        ..Default::default()
    });
    let market = Arc::new(ScriptedMarket {
        not_ready_for: HashMap::from([(late_b.clone(), 2)]),
        ..Default::default()
    });
    let store = Arc::new(JsonSnapshotStore::new(&stats_path));

    let pipeline = Pipeline::new(config.clone(), quotes, market.clone(), store)
        .await
        .unwrap();
    let retry = pipeline.retry_manager();

    let (feed_tx, feed_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(pipeline.run_with_feed(feed_rx, shutdown_rx));

    for mint in [&profit_a, &late_b, &rug_c] {
        feed_tx.send(TokenCandidate::new(mint.clone(), 6)).await.unwrap();
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(retry.entry(&late_b).await.map(|e| e.attempts), Some(1));

    tokio::time::sleep(Duration::from_secs(150)).await;
    shutdown_tx.send(true).unwrap();
    let snapshot = run.await.unwrap();

    assert_eq!(snapshot.trade_count, 3);
    assert_eq!(snapshot.successful, 2);
    assert_eq!(snapshot.rugged, 1);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.pending, 0);
    assert!((snapshot.balance - 4.7750525).abs() < 1e-9);
    assert!((snapshot.cumulative_pnl + 0.2249475).abs() < 1e-9);
    assert_eq!(snapshot.rugged_log[0].mint, rug_c);
    assert_eq!(retry.len().await, 0);
    assert_eq!(market.lookups.lock().unwrap()[&late_b], 3);

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&stats_path).unwrap()).unwrap();
    assert_eq!(raw["trade_count"], 3);
    assert_eq!(raw["rugged_count"], 1);
    assert_eq!(raw["pending_trades"], 0);
    assert_eq!(raw["successful_trades_log"].as_array().unwrap().len(), 2);
    assert_eq!(raw["rugpull_trades_log"].as_array().unwrap().len(), 1);

    // A restart picks up where the last run stopped
    let mut resumed_config = config;
    resumed_config.resume_from_snapshot = true;
    let resumed = Pipeline::new(
        resumed_config,
        Arc::new(ScriptedQuotes::default()),
        Arc::new(ScriptedMarket::default()),
        Arc::new(JsonSnapshotStore::new(&stats_path)),
    )
    .await
    .unwrap();
    let restored = resumed.portfolio().snapshot().await;
    assert_eq!(restored.trade_count, 3);
    assert!((restored.balance - 4.7750525).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_attempt_cap() {
    let dir = TempDir::new().unwrap();
    let stats_path = dir.path().join("stats.json");
    let mut config = test_config(stats_path.to_str().unwrap());
    config.max_retry_attempts = 3;

    let never = Pubkey::new_unique().to_string();
    let market = Arc::new(ScriptedMarket {
        not_ready_for: HashMap::from([(never.clone(), u32::MAX)]),
        ..Default::default()
    });
    let pipeline = Pipeline::new(
        config,
        Arc::new(ScriptedQuotes::default()),
        market.clone(),
        Arc::new(JsonSnapshotStore::new(&stats_path)),
    )
    .await
    .unwrap();
    let retry = pipeline.retry_manager();

    let (feed_tx, feed_rx) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(pipeline.run_with_feed(feed_rx, shutdown_rx));
    feed_tx.send(TokenCandidate::new(never.clone(), 6)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;
    shutdown_tx.send(true).unwrap();
    let snapshot = run.await.unwrap();

    assert_eq!(market.lookups.lock().unwrap()[&never], 3);
    assert!(retry.is_abandoned(&never).await);
    assert_eq!(retry.len().await, 0);
    assert_eq!(snapshot.trade_count, 0);
    assert_eq!(snapshot.balance, 5.0);
}

#[tokio::test]
async fn test_dispatch_spacing_between_trades() {
    let spacing = Duration::from_millis(150);
    let quotes = Arc::new(ScriptedQuotes::default());
    let portfolio = Arc::new(Portfolio::new(
        5.0,
        SqliteStatsStore::connect("sqlite::memory:", 1).await.unwrap(),
    ));
    let engine = Arc::new(TradeEngine::new(
        quotes.clone(),
        portfolio.clone(),
        TradeParams {
            trade_size_sol: 0.3,
            hold: Duration::from_millis(10),
            fee_rate: 0.0025,
            tax_rate: 0.0,
            buy_slippage: 0.03,
            sell_slippage: 0.03,
            quote_timeout: Duration::from_secs(1),
        },
    ));
    let queue = Arc::new(CandidateQueue::new(0));
    for _ in 0..3 {
        queue
            .push(TokenCandidate::new(Pubkey::new_unique().to_string(), 6))
            .await;
    }
    let dispatcher = Dispatcher::new(
        queue.clone(),
        Arc::new(RetryManager::new(RetryPolicy {
            interval: Duration::from_secs(5),
            window: Duration::from_secs(60),
            max_attempts: 12,
        })),
        Arc::new(ScriptedMarket::default()),
        engine,
        PauseFlag::new(),
        DispatchSettings {
            max_concurrent_trades: 3,
            min_spacing: spacing,
            queue_wait_timeout: Duration::from_millis(50),
            lookup_timeout: Duration::from_secs(1),
            pause_poll: Duration::from_millis(50),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(dispatcher.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(600)).await;
    shutdown_tx.send(true).unwrap();
    let report = handle.await.unwrap();

    assert_eq!(report.dispatched, 3);
    let times = quotes.buy_times.lock().unwrap().clone();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= spacing - Duration::from_millis(10));
    }
    assert_eq!(portfolio.snapshot().await.trade_count, 3);
}

#[tokio::test]
async fn test_sqlite_store_tracks_pipeline_state() {
    let store = SqliteStatsStore::connect("sqlite::memory:", 1).await.unwrap();
    let quotes = Arc::new(ScriptedQuotes::default());
    let mut config = test_config("unused.db");
    config.trade_hold_ms = 20;
    config.queue_wait_timeout_ms = 20;

    let pipeline = Pipeline::new(config, quotes, Arc::new(ScriptedMarket::default()), store.clone())
        .await
        .unwrap();
    let (feed_tx, feed_rx) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(pipeline.run_with_feed(feed_rx, shutdown_rx));

    feed_tx
        .send(TokenCandidate::new(Pubkey::new_unique().to_string(), 6))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown_tx.send(true).unwrap();
    run.await.unwrap();

    let stored = store.load_snapshot().await.unwrap().unwrap();
    assert_eq!(stored.trade_count, 1);
    assert_eq!(stored.successful, 1);
    assert!((stored.balance - 5.03790125).abs() < 1e-9);
}
