//! Swap quote lookups against an aggregator quote API.
//!
//! Responses are validated at this boundary into [`QuoteResponse`]: a
//! routed [`SwapQuote`] or an explicit `NoRoute`. Transport problems surface
//! as [`QuoteError`] and are retried a bounded number of times when they are
//! transient.

use async_trait::async_trait;
use nonempty::NonEmpty;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::{strategy::FixedInterval, RetryIf};
use tracing::{debug, instrument, warn};

/// Error codes the quote API uses for "no liquidity" answers.
const NO_ROUTE_CODES: &[&str] = &[
    "COULD_NOT_FIND_ANY_ROUTE",
    "NO_ROUTES_FOUND",
    "TOKEN_NOT_TRADABLE",
];

/// A normalized price estimate for a hypothetical conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub input_mint: String,
    pub output_mint: String,
    /// Raw input units
    pub input_amount: u64,
    /// Raw output units
    pub output_amount: u64,
    /// Raw fee units charged by the first venue
    pub fee_amount: u64,
    /// Output units per input unit
    pub implied_price: f64,
    pub venue_label: String,
}

/// Outcome of a quote request that reached the service.
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteResponse {
    Quote(SwapQuote),
    /// Valid answer meaning there is no liquidity for this conversion
    NoRoute(String),
}

impl QuoteResponse {
    /// The quote, if it routes to a positive output.
    pub fn routed(self) -> Option<SwapQuote> {
        match self {
            QuoteResponse::Quote(q) if q.output_amount > 0 => Some(q),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("quote request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("quote service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("quote request timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed quote response: {0}")]
    Decode(String),
}

impl QuoteError {
    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            QuoteError::Http(e) => !e.is_decode() && !e.is_builder(),
            QuoteError::Status { status, .. } => *status == 429 || *status >= 500,
            QuoteError::Timeout(_) => true,
            QuoteError::Decode(_) => false,
        }
    }
}

/// Source of swap quotes.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Quote converting `amount` raw units of `input_mint` into `output_mint`.
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<QuoteResponse, QuoteError>;

    /// Longest a single `quote` call may take, its own retries included.
    /// `None` leaves the bound to the caller.
    fn deadline(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuote {
    in_amount: Option<String>,
    out_amount: Option<String>,
    #[serde(default)]
    route_plan: Vec<RawRoutePlan>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRoutePlan {
    swap_info: RawSwapInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSwapInfo {
    label: Option<String>,
    in_amount: Option<String>,
    out_amount: Option<String>,
    fee_amount: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawError {
    error: Option<String>,
    error_code: Option<String>,
}

fn parse_amount(field: &str, raw: Option<&String>) -> Result<u64, QuoteError> {
    let raw = raw.ok_or_else(|| QuoteError::Decode(format!("missing {}", field)))?;
    raw.parse::<u64>()
        .map_err(|e| QuoteError::Decode(format!("invalid {} '{}': {}", field, raw, e)))
}

/// Validate a successful quote body.
pub fn parse_quote_body(
    body: &str,
    input_mint: &str,
    output_mint: &str,
) -> Result<QuoteResponse, QuoteError> {
    let raw: RawQuote =
        serde_json::from_str(body).map_err(|e| QuoteError::Decode(e.to_string()))?;

    let Some(first) = raw.route_plan.first() else {
        return Ok(QuoteResponse::NoRoute("empty route plan".to_string()));
    };
    let hop = &first.swap_info;

    let input_amount = parse_amount("inAmount", raw.in_amount.as_ref().or(hop.in_amount.as_ref()))?;
    let output_amount =
        parse_amount("outAmount", raw.out_amount.as_ref().or(hop.out_amount.as_ref()))?;
    let fee_amount = match &hop.fee_amount {
        Some(_) => parse_amount("feeAmount", hop.fee_amount.as_ref())?,
        None => 0,
    };
    let implied_price = if input_amount > 0 {
        output_amount as f64 / input_amount as f64
    } else {
        0.0
    };

    Ok(QuoteResponse::Quote(SwapQuote {
        input_mint: input_mint.to_string(),
        output_mint: output_mint.to_string(),
        input_amount,
        output_amount,
        fee_amount,
        implied_price,
        venue_label: hop.label.clone().unwrap_or_else(|| "unknown".to_string()),
    }))
}

/// Classify a non-success response body.
fn classify_error_body(status: StatusCode, body: String) -> Result<QuoteResponse, QuoteError> {
    let parsed: RawError = serde_json::from_str(&body).unwrap_or_default();
    let is_no_route = parsed
        .error_code
        .as_deref()
        .map(|code| NO_ROUTE_CODES.contains(&code))
        .unwrap_or(false);

    if status == StatusCode::BAD_REQUEST && is_no_route {
        let reason = parsed
            .error
            .or(parsed.error_code)
            .unwrap_or_else(|| "no route".to_string());
        return Ok(QuoteResponse::NoRoute(reason));
    }

    Err(QuoteError::Status {
        status: status.as_u16(),
        body,
    })
}

/// HTTP client for an aggregator quote API with fallback endpoints.
pub struct JupiterQuoteClient {
    endpoints: NonEmpty<String>,
    http_client: Client,
    timeout: Duration,
    slippage_bps: u16,
    retry_attempts: usize,
    retry_interval: Duration,
}

impl JupiterQuoteClient {
    pub fn new(
        endpoints: NonEmpty<String>,
        timeout: Duration,
        slippage_bps: u16,
        retry_attempts: usize,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            endpoints,
            http_client: Client::builder().timeout(timeout).build()?,
            timeout,
            slippage_bps,
            retry_attempts,
            retry_interval: Duration::from_millis(250),
        })
    }

    /// One pass over all endpoints; the first non-transient answer wins.
    async fn quote_once(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<QuoteResponse, QuoteError> {
        let mut last_error = None;

        for endpoint in self.endpoints.iter() {
            match self.request(endpoint, input_mint, output_mint, amount).await {
                Err(e) if e.is_transient() => {
                    warn!(endpoint = %endpoint, error = %e, "Quote endpoint failed, trying next");
                    last_error = Some(e);
                }
                other => return other,
            }
        }

        Err(last_error.unwrap_or_else(|| QuoteError::Decode("no quote endpoints".to_string())))
    }

    async fn request(
        &self,
        endpoint: &str,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<QuoteResponse, QuoteError> {
        let url = format!("{}/quote", endpoint.trim_end_matches('/'));
        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("inputMint", input_mint.to_string()),
                ("outputMint", output_mint.to_string()),
                ("amount", amount.to_string()),
                ("slippageBps", self.slippage_bps.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            parse_quote_body(&body, input_mint, output_mint)
        } else {
            classify_error_body(status, body)
        }
    }
}

#[async_trait]
impl QuoteSource for JupiterQuoteClient {
    #[instrument(skip(self), fields(input = %input_mint, output = %output_mint))]
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<QuoteResponse, QuoteError> {
        let strategy = FixedInterval::new(self.retry_interval)
            .take(self.retry_attempts.saturating_sub(1));

        let result = RetryIf::start(
            strategy,
            || self.quote_once(input_mint, output_mint, amount),
            |e: &QuoteError| e.is_transient(),
        )
        .await;

        if let Ok(QuoteResponse::NoRoute(reason)) = &result {
            debug!(reason = %reason, "No route");
        }
        result
    }

    /// Every attempt may time out on every endpoint, plus the pauses in between.
    fn deadline(&self) -> Option<Duration> {
        let attempts = self.retry_attempts.max(1);
        let requests = u32::try_from(attempts * self.endpoints.len()).unwrap_or(u32::MAX);
        let pauses = u32::try_from(attempts - 1).unwrap_or(u32::MAX);
        Some(
            self.timeout
                .saturating_mul(requests)
                .saturating_add(self.retry_interval.saturating_mul(pauses)),
        )
    }
}
