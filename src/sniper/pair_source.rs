//! New-pair discovery over a websocket subscription.
//!
//! The source never gives up: any connection failure or server close leads
//! to a full reconnect after a fixed backoff, and a fresh subscription is
//! sent on every connect. Candidates are deduplicated before they reach the
//! queue.

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::types::{is_valid_mint, TokenCandidate, DEFAULT_TOKEN_DECIMALS};

use super::dedup::DedupSet;

pub const SUBSCRIBE_MESSAGE: &str =
    r#"{"jsonrpc":"2.0","id":1,"method":"newPairSubscribe","params":{"include_pumpfun":false}}"#;

#[derive(Debug, Deserialize)]
struct Envelope {
    params: Option<Params>,
}

#[derive(Debug, Deserialize)]
struct Params {
    pair: Option<Pair>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pair {
    base_token: Option<BaseToken>,
}

#[derive(Debug, Deserialize)]
struct BaseToken {
    account: Option<String>,
    info: Option<TokenInfo>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    decimals: Option<u64>,
}

/// Parse one text frame. `Ok(None)` for frames that carry no pair, such as
/// subscription acknowledgements.
pub fn parse_pair_event(text: &str) -> Result<Option<TokenCandidate>> {
    let envelope: Envelope = serde_json::from_str(text).context("invalid JSON frame")?;
    let Some(pair) = envelope.params.and_then(|p| p.pair) else {
        return Ok(None);
    };

    let base = pair
        .base_token
        .ok_or_else(|| anyhow!("pair event without baseToken"))?;
    let mint = base
        .account
        .ok_or_else(|| anyhow!("pair event without baseToken.account"))?;
    if !is_valid_mint(&mint) {
        return Err(anyhow!("invalid mint address '{}'", mint));
    }

    let decimals = match base.info.and_then(|i| i.decimals) {
        Some(d) => u8::try_from(d).map_err(|_| anyhow!("decimals out of range: {}", d))?,
        None => DEFAULT_TOKEN_DECIMALS,
    };

    Ok(Some(TokenCandidate::new(mint, decimals)))
}

enum SessionEnd {
    /// The server closed the stream or stopped sending
    Closed,
    Shutdown,
    /// Nobody is listening downstream anymore
    ReceiverGone,
}

pub struct PairEventSource {
    url: String,
    api_key: Option<String>,
    backoff: Duration,
    connect_timeout: Duration,
    dedup: DedupSet,
}

impl PairEventSource {
    pub fn new(url: impl Into<String>, api_key: Option<String>, dedup: DedupSet) -> Self {
        Self {
            url: url.into(),
            api_key,
            backoff: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            dedup,
        }
    }

    pub fn from_config(config: &BotConfig, dedup: DedupSet) -> Self {
        Self::new(&config.stream_url, config.stream_api_key.clone(), dedup)
            .with_backoff(config.reconnect_backoff())
            .with_connect_timeout(config.connect_timeout())
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Stream fresh candidates into `tx` until shutdown.
    pub async fn run(self, tx: mpsc::Sender<TokenCandidate>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.session(&tx, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) | Ok(SessionEnd::ReceiverGone) => break,
                Ok(SessionEnd::Closed) => warn!("Pair stream closed by server"),
                Err(e) => warn!(error = ?e, "Pair stream error"),
            }

            info!(backoff = ?self.backoff, "Reconnecting to pair stream");
            tokio::select! {
                _ = tokio::time::sleep(self.backoff) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("Pair stream stopped");
    }

    async fn session(
        &self,
        tx: &mpsc::Sender<TokenCandidate>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .context("invalid stream URL")?;
        if let Some(key) = &self.api_key {
            request
                .headers_mut()
                .insert("X-API-KEY", HeaderValue::from_str(key).context("invalid API key")?);
        }

        let (mut ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| anyhow!("connect timed out after {:?}", self.connect_timeout))?
            .context("websocket connect failed")?;

        ws.send(Message::Text(SUBSCRIBE_MESSAGE.to_string()))
            .await
            .context("failed to send subscription")?;
        info!(url = %self.url, "Listening for new pairs");

        loop {
            tokio::select! {
                frame = ws.next() => match frame {
                    None => return Ok(SessionEnd::Closed),
                    Some(Err(e)) => return Err(e).context("websocket read failed"),
                    Some(Ok(Message::Text(text))) => {
                        if !self.handle_text(&text, tx).await {
                            return Ok(SessionEnd::ReceiverGone);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Close frame received");
                        return Ok(SessionEnd::Closed);
                    }
                    Some(Ok(_)) => {}
                },
                _ = shutdown.changed() => {
                    let _ = ws.close(None).await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    /// Returns false once the downstream receiver is gone.
    async fn handle_text(&self, text: &str, tx: &mpsc::Sender<TokenCandidate>) -> bool {
        match parse_pair_event(text) {
            Ok(Some(candidate)) => {
                if !self.dedup.insert_if_new(&candidate.mint).await {
                    debug!(mint = %candidate.mint, "Already seen, skipping");
                    return true;
                }
                info!(mint = %candidate.mint, decimals = candidate.decimals, "New pair discovered");
                tx.send(candidate).await.is_ok()
            }
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, "Skipping malformed pair event");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINT: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";

    #[test]
    fn test_parse_pair_event() {
        let text = format!(
            r#"{{"jsonrpc":"2.0","method":"newPairNotification","params":{{"pair":{{"baseToken":{{"account":"{}","info":{{"decimals":6}}}}}}}}}}"#,
            MINT
        );
        let candidate = parse_pair_event(&text).unwrap().unwrap();
        assert_eq!(candidate, TokenCandidate::new(MINT, 6));
    }

    #[test]
    fn test_parse_defaults_decimals() {
        let text = format!(r#"{{"params":{{"pair":{{"baseToken":{{"account":"{}"}}}}}}}}"#, MINT);
        let candidate = parse_pair_event(&text).unwrap().unwrap();
        assert_eq!(candidate.decimals, DEFAULT_TOKEN_DECIMALS);
    }

    #[test]
    fn test_parse_non_pair_frames() {
        assert!(parse_pair_event(r#"{"jsonrpc":"2.0","result":42,"id":1}"#)
            .unwrap()
            .is_none());
        assert!(parse_pair_event(r#"{"params":{}}"#).unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_pair_event("not json").is_err());
        assert!(parse_pair_event(r#"{"params":{"pair":{}}}"#).is_err());
        assert!(parse_pair_event(r#"{"params":{"pair":{"baseToken":{"account":"nope"}}}}"#).is_err());

        let text = format!(
            r#"{{"params":{{"pair":{{"baseToken":{{"account":"{}","info":{{"decimals":300}}}}}}}}}}"#,
            MINT
        );
        assert!(parse_pair_event(&text).is_err());
    }

    #[tokio::test]
    async fn test_handle_text_dedups() {
        let source = PairEventSource::new(
            "ws://127.0.0.1:1",
            None,
            DedupSet::new(Duration::from_secs(60), 100),
        );
        let (tx, mut rx) = mpsc::channel(8);
        let text = format!(r#"{{"params":{{"pair":{{"baseToken":{{"account":"{}"}}}}}}}}"#, MINT);

        assert!(source.handle_text(&text, &tx).await);
        assert!(source.handle_text(&text, &tx).await);
        assert!(source.handle_text("garbage", &tx).await);

        assert_eq!(rx.recv().await.unwrap().mint, MINT);
        assert!(rx.try_recv().is_err());

        drop(rx);
        let other = text.replace(MINT, "So11111111111111111111111111111111111111112");
        assert!(!source.handle_text(&other, &tx).await);
    }
}
