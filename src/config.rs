//! Runtime configuration for the sniper pipeline.
//!
//! Defaults mirror the tuning the bot has been run with. Values can be
//! overridden from a JSON file, from `SNIPER_*` environment variables, or
//! programmatically through [`BotConfigBuilder`].

use anyhow::{anyhow, bail, Context, Result};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Where the stats snapshot is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsBackend {
    /// Whole-state JSON document overwritten on every mutation
    Json,
    /// Single-row SQLite table holding the snapshot document
    Sqlite,
}

impl FromStr for StatsBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(StatsBackend::Json),
            "sqlite" => Ok(StatsBackend::Sqlite),
            other => Err(anyhow!("unknown stats backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Pair discovery websocket endpoint
    pub stream_url: String,
    /// API key sent as `X-API-KEY` on the discovery stream
    pub stream_api_key: Option<String>,
    /// Swap quote API base URLs, tried in order
    pub quote_endpoints: Vec<String>,
    /// Market data (pair index) API base URL
    pub market_data_url: String,

    /// Native amount spent per trade, in SOL
    pub trade_size_sol: f64,
    /// Dwell time between buy and sell legs
    pub trade_hold_ms: u64,
    /// Fee charged on each leg, as a fraction
    pub fee_rate: f64,
    /// Tax charged on each leg, as a fraction
    pub tax_rate: f64,
    /// Haircut applied to the quoted buy output
    pub buy_slippage: f64,
    /// Haircut applied to the quoted sell output
    pub sell_slippage: f64,
    /// Slippage tolerance forwarded to the quote API
    pub quote_slippage_bps: u16,
    /// Starting paper balance in SOL
    pub initial_balance_sol: f64,

    /// Maximum number of trades between debit and settlement
    pub max_concurrent_trades: usize,
    /// Minimum spacing between two dispatches
    pub min_dispatch_spacing_ms: u64,
    /// How long the dispatcher waits on an empty queue before idling
    pub queue_wait_timeout_ms: u64,
    /// Maximum buffered candidates (0 = unbounded)
    pub queue_capacity: usize,

    /// Period of the retry timer
    pub retry_interval_ms: u64,
    /// Lifetime of a retry entry measured from first sighting
    pub retry_window_ms: u64,
    /// Attempts after which a mint is abandoned
    pub max_retry_attempts: u32,

    /// Fixed delay before reconnecting the discovery stream
    pub reconnect_backoff_ms: u64,
    /// Connect timeout for the discovery stream
    pub connect_timeout_ms: u64,
    /// Timeout applied to every quote request
    pub quote_timeout_ms: u64,
    /// Attempts for a quote request on transient failures
    pub quote_retry_attempts: usize,
    /// Timeout applied to market data lookups
    pub lookup_timeout_ms: u64,
    /// Pairs older than this are filtered out (None = no age filter)
    pub max_pair_age_ms: Option<u64>,

    /// How long a seen mint suppresses fresh re-emission
    pub dedup_ttl_ms: u64,
    /// Upper bound on tracked seen mints
    pub dedup_capacity: u64,

    pub stats_backend: StatsBackend,
    /// JSON document path or SQLite URL depending on backend
    pub stats_path: String,
    /// Restore balance and logs from the previous snapshot on startup
    pub resume_from_snapshot: bool,

    /// Operator pause/resume control document
    pub control_path: Option<PathBuf>,
    pub control_poll_ms: u64,

    pub log_level: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            stream_url: "wss://api.solanastreaming.com/".to_string(),
            stream_api_key: None,
            quote_endpoints: vec!["https://lite-api.jup.ag/swap/v1".to_string()],
            market_data_url: "https://api.dexscreener.com/token-pairs/v1/solana".to_string(),
            trade_size_sol: 0.3,
            trade_hold_ms: 35_000,
            fee_rate: 0.0025,
            tax_rate: 0.0,
            buy_slippage: 0.01,
            sell_slippage: 0.01,
            quote_slippage_bps: 1000,
            initial_balance_sol: 1.38,
            max_concurrent_trades: 2,
            min_dispatch_spacing_ms: 5_000,
            queue_wait_timeout_ms: 5_000,
            queue_capacity: 256,
            retry_interval_ms: 5_000,
            retry_window_ms: 60_000,
            max_retry_attempts: 12,
            reconnect_backoff_ms: 5_000,
            connect_timeout_ms: 10_000,
            quote_timeout_ms: 5_000,
            quote_retry_attempts: 2,
            lookup_timeout_ms: 3_000,
            max_pair_age_ms: None,
            dedup_ttl_ms: 24 * 60 * 60 * 1000,
            dedup_capacity: 100_000,
            stats_backend: StatsBackend::Json,
            stats_path: "stats.json".to_string(),
            resume_from_snapshot: false,
            control_path: Some(PathBuf::from("control.json")),
            control_poll_ms: 2_000,
            log_level: "info".to_string(),
        }
    }
}

impl BotConfig {
    /// Load a configuration document; missing keys fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: BotConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Defaults with `SNIPER_*` environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    /// Apply `SNIPER_*` environment variable overrides on top of `self`.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(v) = env_var("SNIPER_STREAM_URL") {
            self.stream_url = v;
        }
        if let Some(v) = env_var("SNIPER_STREAM_API_KEY") {
            self.stream_api_key = Some(v);
        }
        if let Some(v) = env_var("SNIPER_QUOTE_ENDPOINTS") {
            self.quote_endpoints = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = env_var("SNIPER_MARKET_DATA_URL") {
            self.market_data_url = v;
        }
        parse_env("SNIPER_TRADE_SIZE_SOL", &mut self.trade_size_sol)?;
        parse_env("SNIPER_TRADE_HOLD_MS", &mut self.trade_hold_ms)?;
        parse_env("SNIPER_FEE_RATE", &mut self.fee_rate)?;
        parse_env("SNIPER_TAX_RATE", &mut self.tax_rate)?;
        parse_env("SNIPER_BUY_SLIPPAGE", &mut self.buy_slippage)?;
        parse_env("SNIPER_SELL_SLIPPAGE", &mut self.sell_slippage)?;
        parse_env("SNIPER_INITIAL_BALANCE_SOL", &mut self.initial_balance_sol)?;
        parse_env("SNIPER_MAX_CONCURRENT_TRADES", &mut self.max_concurrent_trades)?;
        parse_env("SNIPER_MIN_DISPATCH_SPACING_MS", &mut self.min_dispatch_spacing_ms)?;
        parse_env("SNIPER_RETRY_INTERVAL_MS", &mut self.retry_interval_ms)?;
        parse_env("SNIPER_RETRY_WINDOW_MS", &mut self.retry_window_ms)?;
        parse_env("SNIPER_MAX_RETRY_ATTEMPTS", &mut self.max_retry_attempts)?;
        parse_env("SNIPER_RECONNECT_BACKOFF_MS", &mut self.reconnect_backoff_ms)?;
        parse_env("SNIPER_STATS_BACKEND", &mut self.stats_backend)?;
        if let Some(v) = env_var("SNIPER_STATS_PATH") {
            self.stats_path = v;
        }
        parse_env("SNIPER_RESUME_FROM_SNAPSHOT", &mut self.resume_from_snapshot)?;
        if let Some(v) = env_var("SNIPER_CONTROL_PATH") {
            self.control_path = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }
        if let Some(v) = env_var("SNIPER_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(self)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_trades == 0 {
            bail!("max_concurrent_trades must be at least 1");
        }
        if !(self.trade_size_sol > 0.0) {
            bail!("trade_size_sol must be positive, got {}", self.trade_size_sol);
        }
        for (name, rate) in [
            ("fee_rate", self.fee_rate),
            ("tax_rate", self.tax_rate),
            ("buy_slippage", self.buy_slippage),
            ("sell_slippage", self.sell_slippage),
        ] {
            if !(0.0..1.0).contains(&rate) {
                bail!("{} must be within [0, 1), got {}", name, rate);
            }
        }
        if self.initial_balance_sol < 0.0 {
            bail!("initial_balance_sol cannot be negative");
        }
        if self.max_retry_attempts == 0 {
            bail!("max_retry_attempts must be at least 1");
        }
        self.quote_endpoints()?;
        Ok(())
    }

    pub fn quote_endpoints(&self) -> Result<NonEmpty<String>> {
        NonEmpty::from_vec(self.quote_endpoints.clone())
            .ok_or_else(|| anyhow!("quote_endpoints cannot be empty"))
    }

    pub fn trade_hold(&self) -> Duration {
        Duration::from_millis(self.trade_hold_ms)
    }

    pub fn min_dispatch_spacing(&self) -> Duration {
        Duration::from_millis(self.min_dispatch_spacing_ms)
    }

    pub fn queue_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_wait_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn retry_window(&self) -> Duration {
        Duration::from_millis(self.retry_window_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn quote_timeout(&self) -> Duration {
        Duration::from_millis(self.quote_timeout_ms)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }

    pub fn control_poll(&self) -> Duration {
        Duration::from_millis(self.control_poll_ms)
    }

    pub fn tracing_level(&self) -> tracing::Level {
        tracing::Level::from_str(&self.log_level).unwrap_or(tracing::Level::INFO)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_env<T>(key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = env_var(key) {
        *slot = raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("invalid value for {}: {} ({})", key, raw, e))?;
    }
    Ok(())
}

/// Builder for [`BotConfig`] with sensible defaults.
pub struct BotConfigBuilder {
    config: BotConfig,
}

impl BotConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BotConfig::default(),
        }
    }

    /// Set the discovery stream endpoint and API key.
    pub fn with_stream(mut self, url: impl Into<String>, api_key: Option<String>) -> Self {
        self.config.stream_url = url.into();
        self.config.stream_api_key = api_key;
        self
    }

    /// Set the quote API endpoints.
    pub fn with_quote_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.config.quote_endpoints = endpoints;
        self
    }

    pub fn with_market_data_url(mut self, url: impl Into<String>) -> Self {
        self.config.market_data_url = url.into();
        self
    }

    /// Set trade size and hold duration.
    pub fn with_trade(mut self, size_sol: f64, hold_ms: u64) -> Self {
        self.config.trade_size_sol = size_sol;
        self.config.trade_hold_ms = hold_ms;
        self
    }

    /// Set fee, tax and slippage fractions.
    pub fn with_costs(mut self, fee_rate: f64, tax_rate: f64, buy_slippage: f64, sell_slippage: f64) -> Self {
        self.config.fee_rate = fee_rate;
        self.config.tax_rate = tax_rate;
        self.config.buy_slippage = buy_slippage;
        self.config.sell_slippage = sell_slippage;
        self
    }

    pub fn with_initial_balance(mut self, balance_sol: f64) -> Self {
        self.config.initial_balance_sol = balance_sol;
        self
    }

    /// Set concurrency limit and minimum dispatch spacing.
    pub fn with_dispatch(mut self, max_concurrent: usize, spacing_ms: u64) -> Self {
        self.config.max_concurrent_trades = max_concurrent;
        self.config.min_dispatch_spacing_ms = spacing_ms;
        self
    }

    pub fn with_queue_wait_timeout(mut self, timeout_ms: u64) -> Self {
        self.config.queue_wait_timeout_ms = timeout_ms;
        self
    }

    /// Set retry timer period, window and attempt cap.
    pub fn with_retry(mut self, interval_ms: u64, window_ms: u64, max_attempts: u32) -> Self {
        self.config.retry_interval_ms = interval_ms;
        self.config.retry_window_ms = window_ms;
        self.config.max_retry_attempts = max_attempts;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff_ms: u64) -> Self {
        self.config.reconnect_backoff_ms = backoff_ms;
        self
    }

    pub fn with_stats(mut self, backend: StatsBackend, path: impl Into<String>) -> Self {
        self.config.stats_backend = backend;
        self.config.stats_path = path.into();
        self
    }

    pub fn with_control_path(mut self, path: Option<PathBuf>) -> Self {
        self.config.control_path = path;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<BotConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for BotConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
