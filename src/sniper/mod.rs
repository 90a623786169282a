//! Sniper module - discovery, dispatch and simulated trading
//!
//! New pairs arrive from the websocket stream, are deduplicated and pushed
//! on a LIFO queue. The dispatcher gates them on market data readiness,
//! dispatch spacing and a concurrency limit before the trade engine runs a
//! paper buy -> hold -> sell round trip against live quotes. Mints without
//! market data go through the retry manager. Results accumulate in the
//! portfolio, which persists a snapshot after every change.

pub mod types;
pub mod quote;
pub mod market_data;
pub mod dedup;
pub mod queue;
pub mod retry;
pub mod rate_limit;
pub mod control;
pub mod storage;
pub mod portfolio;
pub mod trade_engine;
pub mod pair_source;
pub mod dispatcher;
pub mod pipeline;

// Re-export main types
pub use types::{
    AbortReason, TradeOutcome, TradeFees, Trade, TradeLogEntry, PortfolioSnapshot,
};

// Re-export key components
pub use quote::{JupiterQuoteClient, QuoteError, QuoteResponse, QuoteSource, SwapQuote};
pub use market_data::{DexScreenerClient, LookupError, PairInfo, PairInfoSource};
pub use dedup::DedupSet;
pub use queue::CandidateQueue;
pub use retry::{RetryEntry, RetryManager, RetryPolicy};
pub use rate_limit::DispatchSpacing;
pub use control::{ControlFileWatcher, PauseFlag};
pub use storage::{JsonSnapshotStore, SqliteStatsStore, StatsStore};
pub use portfolio::{Portfolio, PortfolioError};
pub use trade_engine::{settle_sell, SellSettlement, TradeEngine, TradeParams};
pub use pair_source::{parse_pair_event, PairEventSource};
pub use dispatcher::{DispatchReport, DispatchSettings, Dispatcher};
pub use pipeline::Pipeline;
