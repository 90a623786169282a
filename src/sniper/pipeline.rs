//! Wires discovery, retry, control and dispatch into one running bot.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::config::BotConfig;
use crate::types::TokenCandidate;

use super::control::{ControlFileWatcher, PauseFlag};
use super::dedup::DedupSet;
use super::dispatcher::{DispatchSettings, Dispatcher};
use super::market_data::PairInfoSource;
use super::pair_source::PairEventSource;
use super::portfolio::Portfolio;
use super::queue::CandidateQueue;
use super::quote::QuoteSource;
use super::retry::{RetryManager, RetryPolicy};
use super::storage::StatsStore;
use super::trade_engine::{TradeEngine, TradeParams};
use super::types::PortfolioSnapshot;

const FEED_BUFFER: usize = 1024;

pub struct Pipeline {
    config: BotConfig,
    quotes: Arc<dyn QuoteSource>,
    market_data: Arc<dyn PairInfoSource>,
    portfolio: Arc<Portfolio>,
    dedup: DedupSet,
    queue: Arc<CandidateQueue>,
    retry: Arc<RetryManager>,
    pause: PauseFlag,
}

impl Pipeline {
    /// Build the shared components. Loads the stored snapshot first when
    /// `resume_from_snapshot` is set.
    pub async fn new(
        config: BotConfig,
        quotes: Arc<dyn QuoteSource>,
        market_data: Arc<dyn PairInfoSource>,
        store: Arc<dyn StatsStore>,
    ) -> Result<Self> {
        config.validate()?;

        let portfolio = if config.resume_from_snapshot {
            Portfolio::resume_or_new(config.initial_balance_sol, store).await
        } else {
            Portfolio::new(config.initial_balance_sol, store)
        };

        Ok(Self {
            dedup: DedupSet::new(config.dedup_ttl(), config.dedup_capacity),
            queue: Arc::new(CandidateQueue::new(config.queue_capacity)),
            retry: Arc::new(RetryManager::new(RetryPolicy::from(&config))),
            portfolio: Arc::new(portfolio),
            pause: PauseFlag::new(),
            config,
            quotes,
            market_data,
        })
    }

    pub fn portfolio(&self) -> Arc<Portfolio> {
        self.portfolio.clone()
    }

    pub fn pause_flag(&self) -> PauseFlag {
        self.pause.clone()
    }

    pub fn retry_manager(&self) -> Arc<RetryManager> {
        self.retry.clone()
    }

    pub fn dedup(&self) -> DedupSet {
        self.dedup.clone()
    }

    /// Run against the configured websocket pair stream until shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> PortfolioSnapshot {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let source = PairEventSource::from_config(&self.config, self.dedup.clone());
        let source_task = tokio::spawn(source.run(tx, shutdown.clone()));

        let snapshot = self.run_with_feed(rx, shutdown).await;
        if let Err(e) = source_task.await {
            warn!(error = %e, "Pair stream task failed");
        }
        snapshot
    }

    /// Run with an externally supplied, already deduplicated candidate feed.
    pub async fn run_with_feed(
        self,
        mut feed: mpsc::Receiver<TokenCandidate>,
        shutdown: watch::Receiver<bool>,
    ) -> PortfolioSnapshot {
        info!(
            balance = self.config.initial_balance_sol,
            trade_size = self.config.trade_size_sol,
            "Starting paper sniper"
        );

        let forward_task = {
            let queue = self.queue.clone();
            let retry = self.retry.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        candidate = feed.recv() => match candidate {
                            Some(candidate) => retry.enqueue(&queue, candidate).await,
                            None => break,
                        },
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        let retry_task = tokio::spawn(self.retry.clone().run(self.queue.clone(), shutdown.clone()));

        let control_task = self.config.control_path.as_ref().map(|path| {
            let watcher =
                ControlFileWatcher::new(path, self.config.control_poll(), self.pause.clone());
            tokio::spawn(watcher.run(shutdown.clone()))
        });

        let engine = Arc::new(TradeEngine::new(
            self.quotes.clone(),
            self.portfolio.clone(),
            TradeParams::from(&self.config),
        ));
        let dispatcher = Dispatcher::new(
            self.queue.clone(),
            self.retry.clone(),
            self.market_data.clone(),
            engine,
            self.pause.clone(),
            DispatchSettings::from(&self.config),
        );

        let report = dispatcher.run(shutdown).await;

        let background = [
            ("feed", Some(forward_task)),
            ("retry", Some(retry_task)),
            ("control", control_task),
        ];
        for (name, task) in background {
            let Some(task) = task else { continue };
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "Background task failed");
            }
        }

        self.portfolio.flush().await;
        let snapshot = self.portfolio.snapshot().await;
        info!(dispatched = report.dispatched, "Final: {}", snapshot.summary());
        snapshot
    }
}
