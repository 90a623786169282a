//! Trade lifecycle and portfolio types.

use crate::types::{Mint, TokenCandidate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::quote::SwapQuote;

/// Why a trade ended before any capital was committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AbortReason {
    /// The quote service returned no route (or a non-positive output) for the buy
    NoRoute,
    /// The buy quote failed at the transport level
    QuoteFailed(String),
    /// Quoted output became non-positive after the slippage haircut
    InvalidQuote,
    /// Balance could not cover input + fee + tax
    InsufficientFunds { available: f64, required: f64 },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::NoRoute => write!(f, "no route"),
            AbortReason::QuoteFailed(e) => write!(f, "buy quote failed: {}", e),
            AbortReason::InvalidQuote => write!(f, "invalid quote"),
            AbortReason::InsufficientFunds { available, required } => write!(
                f,
                "insufficient funds ({:.6} SOL available, {:.6} SOL required)",
                available, required
            ),
        }
    }
}

/// Lifecycle state of a trade. The last four variants are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TradeOutcome {
    /// Quoting the buy leg
    Quoting,
    /// Capital debited, waiting out the hold period
    Holding,
    SettledProfit,
    SettledLoss,
    /// Sell leg found no exit liquidity: total loss
    Rugged,
    /// Sell leg failed at the transport level; capital stays written off
    Unresolved(String),
    /// Ended before any balance mutation
    Aborted(AbortReason),
}

impl TradeOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeOutcome::Quoting | TradeOutcome::Holding)
    }

    /// True for outcomes that went through the funding check and closed a position.
    pub fn is_closed_position(&self) -> bool {
        matches!(
            self,
            TradeOutcome::SettledProfit
                | TradeOutcome::SettledLoss
                | TradeOutcome::Rugged
                | TradeOutcome::Unresolved(_)
        )
    }
}

/// Fees and taxes charged on each leg, in SOL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeFees {
    pub buy_fee: f64,
    pub buy_tax: f64,
    pub sell_fee: f64,
    pub sell_tax: f64,
}

/// One simulated buy -> hold -> sell round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub mint: Mint,
    pub decimals: u8,
    /// Native amount spent on the buy leg, in SOL
    pub buy_amount_in: f64,
    pub buy_quote: Option<SwapQuote>,
    /// Tokens held after the buy slippage haircut, in human units
    pub bought_amount: f64,
    /// input + buy fee + buy tax
    pub total_buy_cost: f64,
    pub fees: TradeFees,
    pub sell_quote: Option<SwapQuote>,
    /// Quoted sell output in SOL, before haircut
    pub sell_proceeds: f64,
    /// Sell proceeds after haircut, fee and tax: the amount credited back
    pub net_proceeds: f64,
    pub outcome: TradeOutcome,
    pub pnl: f64,
    /// Balance right after this trade's buy debit
    pub equity_before: f64,
    pub opened_at: DateTime<Utc>,
    pub bought_at: Option<DateTime<Utc>>,
    pub hold_deadline: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Trade {
    pub fn new(candidate: &TokenCandidate, buy_amount_in: f64) -> Self {
        Self {
            mint: candidate.mint.clone(),
            decimals: candidate.decimals,
            buy_amount_in,
            buy_quote: None,
            bought_amount: 0.0,
            total_buy_cost: 0.0,
            fees: TradeFees::default(),
            sell_quote: None,
            sell_proceeds: 0.0,
            net_proceeds: 0.0,
            outcome: TradeOutcome::Quoting,
            pnl: 0.0,
            equity_before: 0.0,
            opened_at: Utc::now(),
            bought_at: None,
            hold_deadline: None,
            closed_at: None,
        }
    }

    /// Buy price in SOL per token.
    pub fn buy_price(&self) -> f64 {
        if self.bought_amount > 0.0 {
            self.buy_amount_in / self.bought_amount
        } else {
            0.0
        }
    }

    /// Sell price in SOL per token, from the quoted (pre-haircut) proceeds.
    pub fn sell_price(&self) -> f64 {
        if self.bought_amount > 0.0 {
            self.sell_proceeds / self.bought_amount
        } else {
            0.0
        }
    }

    pub(crate) fn finish(mut self, outcome: TradeOutcome) -> Self {
        self.outcome = outcome;
        self.closed_at = Some(Utc::now());
        self
    }
}

/// One line of an outcome log in the persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub time: DateTime<Utc>,
    pub mint: Mint,
    pub amount_token: f64,
    pub buy_price: f64,
    pub sell_price: f64,
    pub pnl: f64,
    pub pnl_pct_equity_before: f64,
    pub equity_before: f64,
    pub equity_after: f64,
}

/// Process-wide trading statistics, persisted as one document.
///
/// Field names on the wire stay compatible with the dashboard that reads
/// the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub initial_balance: f64,
    #[serde(rename = "portfolio_balance")]
    pub balance: f64,
    #[serde(rename = "revenue_total")]
    pub cumulative_pnl: f64,
    pub trade_count: u64,
    #[serde(rename = "successful_trades")]
    pub successful: u64,
    #[serde(rename = "nosuccessful_trades")]
    pub failed: u64,
    #[serde(rename = "rugged_count")]
    pub rugged: u64,
    #[serde(rename = "pending_trades")]
    pub pending: u64,
    #[serde(rename = "unresolved_count", default)]
    pub unresolved: u64,
    #[serde(rename = "successful_trades_log")]
    pub success_log: Vec<TradeLogEntry>,
    #[serde(rename = "nosuccessful_trades_log")]
    pub fail_log: Vec<TradeLogEntry>,
    #[serde(rename = "rugpull_trades_log")]
    pub rugged_log: Vec<TradeLogEntry>,
    #[serde(rename = "unresolved_trades_log", default)]
    pub unresolved_log: Vec<TradeLogEntry>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PortfolioSnapshot {
    pub fn new(initial_balance: f64) -> Self {
        let now = Utc::now();
        Self {
            initial_balance,
            balance: initial_balance,
            cumulative_pnl: 0.0,
            trade_count: 0,
            successful: 0,
            failed: 0,
            rugged: 0,
            pending: 0,
            unresolved: 0,
            success_log: Vec::new(),
            fail_log: Vec::new(),
            rugged_log: Vec::new(),
            unresolved_log: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Cumulative pnl per hour since `started_at`.
    pub fn pnl_per_hour(&self, now: DateTime<Utc>) -> f64 {
        let hours = (now - self.started_at).num_milliseconds() as f64 / 3_600_000.0;
        if hours > 0.0 {
            self.cumulative_pnl / hours
        } else {
            0.0
        }
    }

    /// One-line human summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "trades={} ok={} ko={} rugged={} unresolved={} pending={} balance={:.4} SOL pnl={:.4} SOL ({:.4} SOL/h)",
            self.trade_count,
            self.successful,
            self.failed,
            self.rugged,
            self.unresolved,
            self.pending,
            self.balance,
            self.cumulative_pnl,
            self.pnl_per_hour(Utc::now()),
        )
    }
}
