//! Simulated buy -> hold -> sell round trips.
//!
//! Quoting(buy) -> funding check -> holding -> quoting(sell) -> settled | rugged.
//! Capital is debited right after the funding check and only credited back
//! when the sell leg settles. Every failure is folded into the returned
//! [`Trade`]'s outcome; nothing propagates to the caller.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::config::BotConfig;
use crate::types::{
    lamports_to_sol, sol_to_lamports, to_human_units, to_raw_units, TokenCandidate, SOL_MINT,
};

use super::portfolio::{Portfolio, PortfolioError};
use super::quote::{QuoteError, QuoteResponse, QuoteSource};
use super::types::{AbortReason, Trade, TradeOutcome};

#[derive(Debug, Clone, PartialEq)]
pub struct TradeParams {
    /// Native amount spent per buy, in SOL
    pub trade_size_sol: f64,
    pub hold: Duration,
    pub fee_rate: f64,
    pub tax_rate: f64,
    pub buy_slippage: f64,
    pub sell_slippage: f64,
    pub quote_timeout: Duration,
}

impl From<&BotConfig> for TradeParams {
    fn from(config: &BotConfig) -> Self {
        Self {
            trade_size_sol: config.trade_size_sol,
            hold: config.trade_hold(),
            fee_rate: config.fee_rate,
            tax_rate: config.tax_rate,
            buy_slippage: config.buy_slippage,
            sell_slippage: config.sell_slippage,
            quote_timeout: config.quote_timeout(),
        }
    }
}

/// Sell leg result for a routed quote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SellSettlement {
    /// Quoted proceeds after the slippage haircut
    pub sell_value: f64,
    pub sell_fee: f64,
    pub sell_tax: f64,
    /// Amount credited back to the balance
    pub net_proceeds: f64,
    pub pnl: f64,
}

/// Settle a sell leg quoted at `quoted_proceeds` SOL.
pub fn settle_sell(quoted_proceeds: f64, total_buy_cost: f64, params: &TradeParams) -> SellSettlement {
    let sell_value = quoted_proceeds * (1.0 - params.sell_slippage);
    let sell_fee = sell_value * params.fee_rate;
    let sell_tax = sell_value * params.tax_rate;
    let net_proceeds = sell_value - sell_fee - sell_tax;
    SellSettlement {
        sell_value,
        sell_fee,
        sell_tax,
        net_proceeds,
        pnl: net_proceeds - total_buy_cost,
    }
}

pub struct TradeEngine {
    quotes: Arc<dyn QuoteSource>,
    portfolio: Arc<Portfolio>,
    params: TradeParams,
}

impl TradeEngine {
    pub fn new(quotes: Arc<dyn QuoteSource>, portfolio: Arc<Portfolio>, params: TradeParams) -> Self {
        Self {
            quotes,
            portfolio,
            params,
        }
    }

    pub fn params(&self) -> &TradeParams {
        &self.params
    }

    pub fn portfolio(&self) -> &Arc<Portfolio> {
        &self.portfolio
    }

    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<QuoteResponse, QuoteError> {
        let deadline = self.quote_deadline();
        tokio::time::timeout(deadline, self.quotes.quote(input_mint, output_mint, amount))
            .await
            .unwrap_or(Err(QuoteError::Timeout(deadline)))
    }

    /// Outer bound on one quote call. Sources that retry internally get
    /// their whole retry budget.
    fn quote_deadline(&self) -> Duration {
        self.quotes
            .deadline()
            .map_or(self.params.quote_timeout, |d| d.max(self.params.quote_timeout))
    }

    /// Run one full round trip for `candidate`.
    #[instrument(skip(self, candidate), fields(mint = %candidate.mint))]
    pub async fn execute(&self, candidate: TokenCandidate) -> Trade {
        let params = &self.params;
        let mut trade = Trade::new(&candidate, params.trade_size_sol);

        // Buy leg
        let buy_quote = match self
            .quote(SOL_MINT, &candidate.mint, sol_to_lamports(params.trade_size_sol))
            .await
        {
            Ok(response) => match response.routed() {
                Some(quote) => quote,
                None => return abort(trade, AbortReason::NoRoute),
            },
            Err(e) => return abort(trade, AbortReason::QuoteFailed(e.to_string())),
        };

        let quoted_tokens = to_human_units(buy_quote.output_amount, candidate.decimals);
        let bought_amount = quoted_tokens * (1.0 - params.buy_slippage);
        if !bought_amount.is_finite() || bought_amount <= 0.0 {
            return abort(trade, AbortReason::InvalidQuote);
        }

        trade.fees.buy_fee = params.trade_size_sol * params.fee_rate;
        trade.fees.buy_tax = params.trade_size_sol * params.tax_rate;
        trade.total_buy_cost = params.trade_size_sol + trade.fees.buy_fee + trade.fees.buy_tax;
        trade.bought_amount = bought_amount;
        trade.buy_quote = Some(buy_quote);

        // Funding check and debit in one step; the balance may have moved
        // while the buy quote was in flight.
        trade.equity_before = match self.portfolio.reserve(trade.total_buy_cost).await {
            Ok(equity_after_debit) => equity_after_debit,
            Err(PortfolioError::InsufficientFunds {
                available,
                required,
            }) => {
                return abort(
                    trade,
                    AbortReason::InsufficientFunds {
                        available,
                        required,
                    },
                )
            }
        };

        let now = Utc::now();
        trade.outcome = TradeOutcome::Holding;
        trade.bought_at = Some(now);
        trade.hold_deadline = chrono::Duration::from_std(params.hold)
            .ok()
            .map(|hold| now + hold);
        info!(
            tokens = trade.bought_amount,
            buy_price = trade.buy_price(),
            cost = trade.total_buy_cost,
            hold_secs = params.hold.as_secs_f64(),
            "Bought"
        );

        tokio::time::sleep(params.hold).await;

        // Sell leg
        let sell_amount = to_raw_units(trade.bought_amount, candidate.decimals);
        let outcome = match self.quote(&candidate.mint, SOL_MINT, sell_amount).await {
            Ok(response) => match response.routed() {
                Some(quote) => {
                    let settlement =
                        settle_sell(lamports_to_sol(quote.output_amount), trade.total_buy_cost, params);
                    trade.sell_proceeds = lamports_to_sol(quote.output_amount);
                    trade.sell_quote = Some(quote);
                    trade.fees.sell_fee = settlement.sell_fee;
                    trade.fees.sell_tax = settlement.sell_tax;
                    trade.net_proceeds = settlement.net_proceeds;
                    trade.pnl = settlement.pnl;
                    if settlement.pnl > 0.0 {
                        TradeOutcome::SettledProfit
                    } else {
                        TradeOutcome::SettledLoss
                    }
                }
                None => {
                    trade.pnl = -trade.total_buy_cost;
                    TradeOutcome::Rugged
                }
            },
            Err(e) => {
                trade.pnl = -trade.total_buy_cost;
                TradeOutcome::Unresolved(e.to_string())
            }
        };

        let trade = trade.finish(outcome);
        match &trade.outcome {
            TradeOutcome::Rugged => {
                warn!(pnl = trade.pnl, "Rug pull: no exit liquidity, position lost")
            }
            TradeOutcome::Unresolved(reason) => {
                error!(pnl = trade.pnl, reason = %reason, "Sell leg failed, position left unresolved")
            }
            _ => info!(
                pnl = trade.pnl,
                proceeds = trade.net_proceeds,
                sell_price = trade.sell_price(),
                outcome = ?trade.outcome,
                "Sold"
            ),
        }
        self.portfolio.close(&trade).await;
        trade
    }
}

fn abort(trade: Trade, reason: AbortReason) -> Trade {
    info!(mint = %trade.mint, reason = %reason, "Trade aborted");
    trade.finish(TradeOutcome::Aborted(reason))
}
