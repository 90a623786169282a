//! Retry tracking for mints whose market data is not available yet.
//!
//! Per-mint lifecycle: untracked -> pending(attempts = n) -> resolved | abandoned.
//! A periodic timer re-enqueues pending mints into the candidate queue. All
//! access to the retry table goes through a single lock because the
//! dispatcher and the timer touch it concurrently.

use crate::config::BotConfig;
use crate::types::{Mint, TokenCandidate};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::queue::CandidateQueue;

/// Tombstones outlive the retry window by this factor before being pruned.
const TOMBSTONE_WINDOWS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Timer period and minimum gap between two attempts of the same mint
    pub interval: Duration,
    /// Maximum age of an entry, measured from first registration
    pub window: Duration,
    pub max_attempts: u32,
}

impl From<&BotConfig> for RetryPolicy {
    fn from(config: &BotConfig) -> Self {
        Self {
            interval: config.retry_interval(),
            window: config.retry_window(),
            max_attempts: config.max_retry_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryEntry {
    pub mint: Mint,
    pub decimals: u8,
    pub first_seen: Instant,
    pub last_attempt: Instant,
    pub attempts: u32,
    pub last_reason: String,
    /// Re-enqueued and not yet reported back
    pub inflight: bool,
}

#[derive(Default)]
struct RetryTable {
    entries: HashMap<Mint, RetryEntry>,
    /// Purged or abandoned mints, never retried again
    tombstones: HashMap<Mint, Instant>,
}

pub struct RetryManager {
    table: Mutex<RetryTable>,
    policy: RetryPolicy,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            table: Mutex::new(RetryTable::default()),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Record a failed market data fetch. Returns true while the mint should
    /// keep being retried; false once it has been purged.
    pub async fn register(&self, candidate: &TokenCandidate, reason: &str) -> bool {
        let now = Instant::now();
        let mut table = self.table.lock().await;

        if table.tombstones.contains_key(&candidate.mint) {
            debug!(mint = %candidate.mint, "Mint already abandoned, not retrying");
            return false;
        }

        let entry = table
            .entries
            .entry(candidate.mint.clone())
            .or_insert_with(|| RetryEntry {
                mint: candidate.mint.clone(),
                decimals: candidate.decimals,
                first_seen: now,
                last_attempt: now,
                attempts: 0,
                last_reason: String::new(),
                inflight: false,
            });
        entry.attempts += 1;
        entry.last_attempt = now;
        entry.last_reason = reason.to_string();
        entry.inflight = false;

        let attempts = entry.attempts;
        let age = now.duration_since(entry.first_seen);

        let drop_reason = if attempts >= self.policy.max_attempts {
            Some(format!("max attempts reached ({})", attempts))
        } else if age >= self.policy.window {
            Some(format!("expired after {:.1}s", age.as_secs_f64()))
        } else {
            None
        };

        if let Some(why) = drop_reason {
            table.entries.remove(&candidate.mint);
            table.tombstones.insert(candidate.mint.clone(), now);
            drop(table);
            warn!(mint = %candidate.mint, last_reason = %reason, "Giving up on mint: {}", why);
            return false;
        }
        drop(table);

        if attempts == 1 {
            info!(mint = %candidate.mint, reason = %reason, "Awaiting market data");
        } else {
            info!(mint = %candidate.mint, attempts, reason = %reason, "Market data still unavailable");
        }
        true
    }

    /// Drop tracking after the first successful fetch. Returns the attempt
    /// count if the mint was tracked.
    pub async fn resolve(&self, mint: &str) -> Option<u32> {
        let entry = self.table.lock().await.entries.remove(mint)?;
        info!(mint = %mint, attempts = entry.attempts, "Market data ready after retries");
        Some(entry.attempts)
    }

    /// Stop retrying a mint on purpose.
    pub async fn abandon(&self, mint: &str, reason: &str) {
        let mut table = self.table.lock().await;
        let was_tracked = table.entries.remove(mint).is_some();
        table.tombstones.insert(mint.to_string(), Instant::now());
        drop(table);
        if was_tracked {
            info!(mint = %mint, reason = %reason, "Dropping retry candidate");
        }
    }

    /// Clear the in-flight mark of a re-enqueued mint that never reached
    /// the dispatcher, so the next scan hands it out again.
    pub async fn release(&self, mint: &str) {
        if let Some(entry) = self.table.lock().await.entries.get_mut(mint) {
            if entry.inflight {
                entry.inflight = false;
                debug!(mint = %mint, "Retry candidate dropped from queue, released");
            }
        }
    }

    /// Push onto the queue, releasing whatever a full queue evicts.
    pub async fn enqueue(&self, queue: &CandidateQueue, candidate: TokenCandidate) {
        if let Some(evicted) = queue.push(candidate).await {
            self.release(&evicted.mint).await;
        }
    }

    /// Timer scan: purge expired entries and mark due ones in-flight.
    /// Returns the candidates to re-enqueue.
    pub async fn collect_due(&self) -> Vec<TokenCandidate> {
        let now = Instant::now();
        let policy = self.policy;
        let mut due = Vec::new();
        let mut expired = Vec::new();

        {
            let mut table = self.table.lock().await;
            let RetryTable {
                entries,
                tombstones,
            } = &mut *table;

            entries.retain(|mint, entry| {
                let age = now.duration_since(entry.first_seen);
                if age >= policy.window {
                    expired.push((mint.clone(), entry.attempts, entry.last_reason.clone(), "expired"));
                    tombstones.insert(mint.clone(), now);
                    return false;
                }
                if entry.attempts >= policy.max_attempts {
                    expired.push((mint.clone(), entry.attempts, entry.last_reason.clone(), "max attempts"));
                    tombstones.insert(mint.clone(), now);
                    return false;
                }
                if entry.inflight || now.duration_since(entry.last_attempt) < policy.interval {
                    return true;
                }
                entry.inflight = true;
                entry.last_attempt = now;
                due.push(TokenCandidate::new(entry.mint.clone(), entry.decimals));
                true
            });

            let keep_for = policy.window * TOMBSTONE_WINDOWS;
            tombstones.retain(|_, at| now.duration_since(*at) < keep_for);
        }

        for (mint, attempts, reason, why) in expired {
            warn!(mint = %mint, attempts, last_reason = %reason, "Giving up on mint: {}", why);
        }
        due
    }

    pub async fn entry(&self, mint: &str) -> Option<RetryEntry> {
        self.table.lock().await.entries.get(mint).cloned()
    }

    pub async fn is_abandoned(&self, mint: &str) -> bool {
        self.table.lock().await.tombstones.contains_key(mint)
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    /// Timer loop re-enqueueing due mints until shutdown.
    pub async fn run(
        self: Arc<Self>,
        queue: Arc<CandidateQueue>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = self.policy.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?period, window = ?self.policy.window, "Retry timer running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for candidate in self.collect_due().await {
                        let attempts = self.entry(&candidate.mint).await.map(|e| e.attempts).unwrap_or(0);
                        info!(mint = %candidate.mint, next_attempt = attempts + 1, "Requeue for retry");
                        self.enqueue(&queue, candidate).await;
                    }
                }
                _ = shutdown.changed() => {
                    info!("Retry timer stopping");
                    break;
                }
            }
        }
    }
}
