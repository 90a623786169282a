//! Market data readiness lookups (pair index).
//!
//! Freshly created pools are often not indexed yet when the discovery event
//! arrives. A lookup that finds nothing is retryable; a pair that is indexed
//! but outside the age window is filtered for good.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Indexed pair summary for a mint.
#[derive(Debug, Clone, PartialEq)]
pub struct PairInfo {
    pub pair_address: Option<String>,
    pub dex_id: Option<String>,
    pub url: Option<String>,
    pub price_native: Option<f64>,
    pub price_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
    /// Pair age at lookup time
    pub age: Option<Duration>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LookupError {
    #[error("pair not indexed yet: {0}")]
    NotIndexed(String),
    #[error("lookup failed: {0}")]
    Transient(String),
    #[error("filtered out: {0}")]
    Filtered(String),
}

impl LookupError {
    /// Whether the mint should go through the retry path.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LookupError::Filtered(_))
    }

    pub fn reason(&self) -> String {
        match self {
            LookupError::NotIndexed(r) | LookupError::Transient(r) | LookupError::Filtered(r) => {
                r.clone()
            }
        }
    }
}

/// Source of per-mint market data.
#[async_trait]
pub trait PairInfoSource: Send + Sync {
    async fn lookup(&self, mint: &str) -> Result<PairInfo, LookupError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPair {
    pair_address: Option<String>,
    dex_id: Option<String>,
    url: Option<String>,
    price_native: Option<String>,
    price_usd: Option<String>,
    liquidity: Option<RawLiquidity>,
    pair_created_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawLiquidity {
    usd: Option<f64>,
}

/// Validate a pair-list body. `now_ms` is the lookup time in unix millis.
pub fn parse_pairs_body(
    body: &str,
    now_ms: i64,
    max_age: Option<Duration>,
) -> Result<PairInfo, LookupError> {
    let pairs: Vec<RawPair> = serde_json::from_str(body)
        .map_err(|e| LookupError::Transient(format!("malformed pair list: {}", e)))?;

    let Some(pair) = pairs.into_iter().next() else {
        return Err(LookupError::NotIndexed("pair not ready".to_string()));
    };

    let age = pair
        .pair_created_at
        .map(|created| Duration::from_millis(now_ms.saturating_sub(created).max(0) as u64));

    if let (Some(age), Some(max_age)) = (age, max_age) {
        if age > max_age {
            return Err(LookupError::Filtered(format!(
                "pair age {:.1}s exceeds {:.1}s",
                age.as_secs_f64(),
                max_age.as_secs_f64()
            )));
        }
    }

    Ok(PairInfo {
        pair_address: pair.pair_address,
        dex_id: pair.dex_id,
        url: pair.url,
        price_native: pair.price_native.and_then(|p| p.parse().ok()),
        price_usd: pair.price_usd.and_then(|p| p.parse().ok()),
        liquidity_usd: pair.liquidity.and_then(|l| l.usd),
        age,
    })
}

/// DexScreener-style pair index client.
pub struct DexScreenerClient {
    base_url: String,
    http_client: Client,
    max_age: Option<Duration>,
}

impl DexScreenerClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        max_age: Option<Duration>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            http_client: Client::builder().timeout(timeout).build()?,
            max_age,
        })
    }
}

#[async_trait]
impl PairInfoSource for DexScreenerClient {
    #[instrument(skip(self), fields(mint = %mint))]
    async fn lookup(&self, mint: &str) -> Result<PairInfo, LookupError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), mint);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| LookupError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Transient(format!("HTTP {}", status.as_u16())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| LookupError::Transient(e.to_string()))?;

        let info = parse_pairs_body(&body, Utc::now().timestamp_millis(), self.max_age)?;
        debug!(dex = ?info.dex_id, liquidity_usd = ?info.liquidity_usd, "Pair indexed");
        Ok(info)
    }
}
