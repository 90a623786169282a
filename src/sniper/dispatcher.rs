//! Rate-limited, concurrency-bounded trade dispatch.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::BotConfig;
use crate::types::TokenCandidate;

use super::control::PauseFlag;
use super::market_data::PairInfoSource;
use super::queue::CandidateQueue;
use super::rate_limit::DispatchSpacing;
use super::retry::RetryManager;
use super::trade_engine::TradeEngine;
use super::types::{Trade, TradeOutcome};

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    pub max_concurrent_trades: usize,
    pub min_spacing: Duration,
    /// How long one queue wait lasts before polling again
    pub queue_wait_timeout: Duration,
    pub lookup_timeout: Duration,
    /// Sleep between pause-flag checks while paused
    pub pause_poll: Duration,
}

impl From<&BotConfig> for DispatchSettings {
    fn from(config: &BotConfig) -> Self {
        Self {
            max_concurrent_trades: config.max_concurrent_trades,
            min_spacing: config.min_dispatch_spacing(),
            queue_wait_timeout: config.queue_wait_timeout(),
            lookup_timeout: config.lookup_timeout(),
            pause_poll: config.control_poll(),
        }
    }
}

/// Counters reported when the dispatch loop stops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub dispatched: u64,
    pub completed: u64,
    pub panicked: u64,
}

pub struct Dispatcher {
    queue: Arc<CandidateQueue>,
    retry: Arc<RetryManager>,
    market_data: Arc<dyn PairInfoSource>,
    engine: Arc<TradeEngine>,
    pause: PauseFlag,
    spacing: DispatchSpacing,
    permits: Arc<Semaphore>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<CandidateQueue>,
        retry: Arc<RetryManager>,
        market_data: Arc<dyn PairInfoSource>,
        engine: Arc<TradeEngine>,
        pause: PauseFlag,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            queue,
            retry,
            market_data,
            engine,
            pause,
            spacing: DispatchSpacing::new(settings.min_spacing),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_trades.max(1))),
            settings,
        }
    }

    /// Trades currently holding a concurrency permit.
    pub fn in_flight(&self) -> usize {
        self.settings.max_concurrent_trades.max(1) - self.permits.available_permits()
    }

    /// Dispatch until shutdown, then wait for in-flight trades to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> DispatchReport {
        let mut tasks: JoinSet<Trade> = JoinSet::new();
        let mut report = DispatchReport::default();
        info!(
            max_concurrent = self.settings.max_concurrent_trades,
            spacing = ?self.settings.min_spacing,
            "Dispatcher running"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            while let Some(result) = tasks.try_join_next() {
                record(&mut report, result);
            }

            // Checked before popping so paused candidates stay queued
            if self.pause.is_paused() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.pause_poll) => continue,
                    _ = shutdown.changed() => break,
                }
            }

            let candidate = tokio::select! {
                candidate = self.queue.pop_timeout(self.settings.queue_wait_timeout) => candidate,
                _ = shutdown.changed() => break,
            };
            let Some(candidate) = candidate else {
                continue;
            };

            if !self.market_data_ready(&candidate).await {
                continue;
            }

            if let Err(wait) = self.spacing.try_acquire() {
                debug!(mint = %candidate.mint, wait_ms = wait.as_millis() as u64, "Too early, requeueing");
                self.retry.enqueue(&self.queue, candidate).await;
                tokio::select! {
                    _ = tokio::time::sleep(wait) => continue,
                    _ = shutdown.changed() => break,
                }
            }

            // Permit first, then spawn: the limit holds even while waiting
            let permit = tokio::select! {
                permit = self.permits.clone().acquire_owned() => permit,
                _ = shutdown.changed() => {
                    self.retry.enqueue(&self.queue, candidate).await;
                    break;
                }
            };
            let Ok(permit) = permit else {
                error!("Trade permits closed, stopping dispatch");
                break;
            };

            info!(mint = %candidate.mint, in_flight = self.in_flight(), "Dispatching trade");
            let engine = self.engine.clone();
            tasks.spawn(async move {
                let trade = engine.execute(candidate).await;
                drop(permit);
                trade
            });
            report.dispatched += 1;
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight trades");
        }
        while let Some(result) = tasks.join_next().await {
            record(&mut report, result);
        }
        info!(
            dispatched = report.dispatched,
            completed = report.completed,
            "Dispatcher stopped"
        );
        report
    }

    /// Market data gate. Not-ready mints go to the retry path.
    async fn market_data_ready(&self, candidate: &TokenCandidate) -> bool {
        let lookup = tokio::time::timeout(
            self.settings.lookup_timeout,
            self.market_data.lookup(&candidate.mint),
        )
        .await;

        match lookup {
            Ok(Ok(info)) => {
                self.retry.resolve(&candidate.mint).await;
                debug!(mint = %candidate.mint, dex = ?info.dex_id, "Market data ready");
                true
            }
            Ok(Err(e)) if e.is_retryable() => {
                self.retry.register(candidate, &e.reason()).await;
                false
            }
            Ok(Err(e)) => {
                self.retry.abandon(&candidate.mint, &e.reason()).await;
                info!(mint = %candidate.mint, reason = %e, "Candidate filtered");
                false
            }
            Err(_) => {
                let reason = format!(
                    "market data lookup timed out after {:?}",
                    self.settings.lookup_timeout
                );
                self.retry.register(candidate, &reason).await;
                false
            }
        }
    }
}

fn record(report: &mut DispatchReport, result: Result<Trade, JoinError>) {
    match result {
        Ok(trade) => {
            report.completed += 1;
            if let TradeOutcome::Aborted(reason) = &trade.outcome {
                debug!(mint = %trade.mint, reason = %reason, "Trade task finished without a position");
            }
        }
        Err(e) if e.is_panic() => {
            report.panicked += 1;
            error!(error = %e, "Trade task panicked");
        }
        Err(e) => warn!(error = %e, "Trade task cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sniper::market_data::{LookupError, PairInfo};
    use crate::sniper::portfolio::Portfolio;
    use crate::sniper::quote::{QuoteError, QuoteResponse, QuoteSource, SwapQuote};
    use crate::sniper::retry::RetryPolicy;
    use crate::sniper::storage::StatsStore;
    use crate::sniper::trade_engine::TradeParams;
    use crate::sniper::types::PortfolioSnapshot;
    use crate::types::SOL_MINT;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FixedQuotes;

    #[async_trait]
    impl QuoteSource for FixedQuotes {
        async fn quote(
            &self,
            input_mint: &str,
            output_mint: &str,
            amount: u64,
        ) -> Result<QuoteResponse, QuoteError> {
            let output_amount = if input_mint == SOL_MINT { 1_000_000_000 } else { 350_000_000 };
            Ok(QuoteResponse::Quote(SwapQuote {
                input_mint: input_mint.to_string(),
                output_mint: output_mint.to_string(),
                input_amount: amount,
                output_amount,
                fee_amount: 0,
                implied_price: 0.0,
                venue_label: "test".to_string(),
            }))
        }
    }

    /// Ready unless listed otherwise.
    #[derive(Default)]
    struct ScriptedMarket {
        answers: HashMap<String, LookupError>,
    }

    #[async_trait]
    impl PairInfoSource for ScriptedMarket {
        async fn lookup(&self, mint: &str) -> Result<PairInfo, LookupError> {
            match self.answers.get(mint) {
                Some(e) => Err(e.clone()),
                None => Ok(PairInfo {
                    pair_address: None,
                    dex_id: Some("raydium".to_string()),
                    url: None,
                    price_native: None,
                    price_usd: None,
                    liquidity_usd: None,
                    age: None,
                }),
            }
        }
    }

    struct NullStore;

    #[async_trait]
    impl StatsStore for NullStore {
        async fn save_snapshot(&self, _snapshot: &PortfolioSnapshot) -> anyhow::Result<()> {
            Ok(())
        }

        async fn load_snapshot(&self) -> anyhow::Result<Option<PortfolioSnapshot>> {
            Ok(None)
        }
    }

    struct Harness {
        queue: Arc<CandidateQueue>,
        retry: Arc<RetryManager>,
        portfolio: Arc<Portfolio>,
        pause: PauseFlag,
        dispatcher: Dispatcher,
    }

    fn harness(market: ScriptedMarket, max_concurrent: usize) -> Harness {
        let queue = Arc::new(CandidateQueue::new(0));
        let retry = Arc::new(RetryManager::new(RetryPolicy {
            interval: Duration::from_secs(5),
            window: Duration::from_secs(60),
            max_attempts: 12,
        }));
        let portfolio = Arc::new(Portfolio::new(5.0, Arc::new(NullStore)));
        let engine = Arc::new(TradeEngine::new(
            Arc::new(FixedQuotes),
            portfolio.clone(),
            TradeParams {
                trade_size_sol: 0.3,
                hold: Duration::from_secs(35),
                fee_rate: 0.0025,
                tax_rate: 0.0,
                buy_slippage: 0.03,
                sell_slippage: 0.03,
                quote_timeout: Duration::from_secs(5),
            },
        ));
        let pause = PauseFlag::new();
        let dispatcher = Dispatcher::new(
            queue.clone(),
            retry.clone(),
            Arc::new(market),
            engine,
            pause.clone(),
            DispatchSettings {
                max_concurrent_trades: max_concurrent,
                min_spacing: Duration::ZERO,
                queue_wait_timeout: Duration::from_secs(5),
                lookup_timeout: Duration::from_secs(3),
                pause_poll: Duration::from_secs(1),
            },
        );
        Harness {
            queue,
            retry,
            portfolio,
            pause,
            dispatcher,
        }
    }

    fn candidate(i: usize) -> TokenCandidate {
        TokenCandidate::new(format!("mint{}", i), 6)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_holds() {
        let h = harness(ScriptedMarket::default(), 2);
        for i in 0..5 {
            h.queue.push(candidate(i)).await;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(h.dispatcher.run(shutdown_rx));

        for _ in 0..20 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            assert!(h.portfolio.pending().await <= 2);
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(true).unwrap();
        let report = handle.await.unwrap();

        assert_eq!(report.dispatched, 5);
        assert_eq!(report.completed, 5);
        let snapshot = h.portfolio.snapshot().await;
        assert_eq!(snapshot.trade_count, 5);
        assert_eq!(snapshot.pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newest_candidate_dispatched_first() {
        let h = harness(ScriptedMarket::default(), 1);
        for i in 0..3 {
            h.queue.push(candidate(i)).await;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(h.dispatcher.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(40)).await;
        let snapshot = h.portfolio.snapshot().await;
        assert_eq!(snapshot.success_log[0].mint, "mint2");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_keeps_candidates_queued() {
        let h = harness(ScriptedMarket::default(), 2);
        h.pause.pause();
        h.queue.push(candidate(0)).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(h.dispatcher.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.queue.len().await, 1);
        assert_eq!(h.portfolio.pending().await, 0);

        h.pause.resume();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.queue.is_empty().await);
        assert_eq!(h.portfolio.pending().await, 1);

        shutdown_tx.send(true).unwrap();
        let report = handle.await.unwrap();
        assert_eq!(report.completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_and_filtered_mints() {
        let mut market = ScriptedMarket::default();
        market
            .answers
            .insert("mint0".to_string(), LookupError::NotIndexed("pair not ready".to_string()));
        market
            .answers
            .insert("mint1".to_string(), LookupError::Filtered("too old".to_string()));
        let h = harness(market, 2);
        h.queue.push(candidate(0)).await;
        h.queue.push(candidate(1)).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(h.dispatcher.run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let entry = h.retry.entry("mint0").await.unwrap();
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.last_reason, "pair not ready");
        assert!(h.retry.entry("mint1").await.is_none());
        assert!(h.retry.is_abandoned("mint1").await);
        assert_eq!(h.portfolio.pending().await, 0);

        shutdown_tx.send(true).unwrap();
        let report = handle.await.unwrap();
        assert_eq!(report.dispatched, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_retry_resolves_entry() {
        let h = harness(ScriptedMarket::default(), 2);
        h.retry.register(&candidate(0), "pair not ready").await;
        h.queue.push(candidate(0)).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(h.dispatcher.run(shutdown_rx));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.retry.len().await, 0);
        assert_eq!(h.portfolio.pending().await, 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
