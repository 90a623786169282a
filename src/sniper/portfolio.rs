//! Process-wide portfolio statistics.
//!
//! All mutations go through [`Portfolio`], which serializes them behind one
//! lock and persists the full snapshot after each one. Persistence is best
//! effort: failures are logged and never reach trading logic.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::storage::StatsStore;
use super::types::{PortfolioSnapshot, Trade, TradeLogEntry, TradeOutcome};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PortfolioError {
    #[error("insufficient funds: {available:.6} SOL available, {required:.6} SOL required")]
    InsufficientFunds { available: f64, required: f64 },
}

pub struct Portfolio {
    state: Mutex<PortfolioSnapshot>,
    store: Arc<dyn StatsStore>,
}

impl Portfolio {
    pub fn new(initial_balance: f64, store: Arc<dyn StatsStore>) -> Self {
        Self::from_snapshot(PortfolioSnapshot::new(initial_balance), store)
    }

    /// Continue from a previously persisted snapshot.
    ///
    /// Trades that were pending when the snapshot was taken can never close,
    /// so their capital stays written off and the pending counter restarts
    /// at zero.
    pub fn from_snapshot(mut snapshot: PortfolioSnapshot, store: Arc<dyn StatsStore>) -> Self {
        if snapshot.pending > 0 {
            warn!(
                pending = snapshot.pending,
                "Snapshot had open trades, their cost stays debited"
            );
            snapshot.pending = 0;
        }
        Self {
            state: Mutex::new(snapshot),
            store,
        }
    }

    /// Resume from the store if it holds a snapshot, else start fresh.
    pub async fn resume_or_new(initial_balance: f64, store: Arc<dyn StatsStore>) -> Self {
        match store.load_snapshot().await {
            Ok(Some(snapshot)) => {
                info!(summary = %snapshot.summary(), "Resuming from stored snapshot");
                Self::from_snapshot(snapshot, store)
            }
            Ok(None) => Self::new(initial_balance, store),
            Err(e) => {
                warn!(error = %e, "Could not load snapshot, starting fresh");
                Self::new(initial_balance, store)
            }
        }
    }

    /// Atomically check the balance, debit `total_cost` and open a pending
    /// trade. Returns the balance after the debit, which is the equity the
    /// trade log reports as `equity_before`.
    pub async fn reserve(&self, total_cost: f64) -> Result<f64, PortfolioError> {
        let mut state = self.state.lock().await;
        let available = state.balance;
        if available < total_cost {
            return Err(PortfolioError::InsufficientFunds {
                available,
                required: total_cost,
            });
        }

        state.balance -= total_cost;
        state.pending += 1;
        state.updated_at = Utc::now();
        self.persist(&state).await;
        Ok(state.balance)
    }

    /// Apply a closed trade: credit, counters, outcome log.
    pub async fn close(&self, trade: &Trade) {
        let mut state = self.state.lock().await;

        match &trade.outcome {
            TradeOutcome::SettledProfit => {
                state.balance += trade.net_proceeds;
                state.successful += 1;
            }
            TradeOutcome::SettledLoss => {
                state.balance += trade.net_proceeds;
                state.failed += 1;
            }
            TradeOutcome::Rugged => state.rugged += 1,
            TradeOutcome::Unresolved(_) => state.unresolved += 1,
            other => {
                error!(mint = %trade.mint, outcome = ?other, "Refusing to close a trade without an open position");
                return;
            }
        }

        state.cumulative_pnl += trade.pnl;
        state.pending = state.pending.saturating_sub(1);
        state.trade_count += 1;

        let entry = log_entry(trade, state.balance);
        match &trade.outcome {
            TradeOutcome::SettledProfit => state.success_log.push(entry),
            TradeOutcome::SettledLoss => state.fail_log.push(entry),
            TradeOutcome::Rugged => state.rugged_log.push(entry),
            _ => state.unresolved_log.push(entry),
        }

        state.updated_at = Utc::now();
        self.persist(&state).await;
        info!("{}", state.summary());
    }

    pub async fn snapshot(&self) -> PortfolioSnapshot {
        self.state.lock().await.clone()
    }

    pub async fn balance(&self) -> f64 {
        self.state.lock().await.balance
    }

    pub async fn pending(&self) -> u64 {
        self.state.lock().await.pending
    }

    /// Persist the current state once more.
    pub async fn flush(&self) {
        let state = self.state.lock().await;
        self.persist(&state).await;
    }

    async fn persist(&self, snapshot: &PortfolioSnapshot) {
        if let Err(e) = self.store.save_snapshot(snapshot).await {
            error!(error = %e, "Failed to persist portfolio snapshot");
        }
    }
}

fn log_entry(trade: &Trade, equity_after: f64) -> TradeLogEntry {
    let pnl_pct_equity_before = if trade.equity_before > 0.0 {
        trade.pnl / trade.equity_before * 100.0
    } else {
        0.0
    };
    TradeLogEntry {
        time: trade.closed_at.unwrap_or_else(Utc::now),
        mint: trade.mint.clone(),
        amount_token: trade.bought_amount,
        buy_price: trade.buy_price(),
        sell_price: trade.sell_price(),
        pnl: trade.pnl,
        pnl_pct_equity_before,
        equity_before: trade.equity_before,
        equity_after,
    }
}
