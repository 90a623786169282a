//! LIFO buffer between bursty discovery and rate-limited dispatch.

use crate::types::TokenCandidate;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// Newest-first candidate buffer.
///
/// The back of the deque is the top of the stack. When a capacity is set and
/// the buffer is full, the oldest candidate (front) is evicted.
pub struct CandidateQueue {
    items: Mutex<VecDeque<TokenCandidate>>,
    available: Notify,
    capacity: Option<usize>,
}

impl CandidateQueue {
    /// `capacity` of 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            capacity: (capacity > 0).then_some(capacity),
        }
    }

    /// Push a candidate on top. Returns the evicted candidate, if any.
    pub async fn push(&self, candidate: TokenCandidate) -> Option<TokenCandidate> {
        let evicted = {
            let mut items = self.items.lock().await;
            let evicted = match self.capacity {
                Some(cap) if items.len() >= cap => items.pop_front(),
                _ => None,
            };
            items.push_back(candidate);
            evicted
        };
        if let Some(old) = &evicted {
            debug!(mint = %old.mint, "Queue full, evicted oldest candidate");
        }
        self.available.notify_one();
        evicted
    }

    /// Take the most recent candidate, if any.
    pub async fn try_pop(&self) -> Option<TokenCandidate> {
        self.items.lock().await.pop_back()
    }

    /// Wait until a candidate is available.
    pub async fn pop(&self) -> TokenCandidate {
        loop {
            if let Some(candidate) = self.try_pop().await {
                return candidate;
            }
            self.available.notified().await;
        }
    }

    /// Wait up to `timeout` for a candidate.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<TokenCandidate> {
        tokio::time::timeout(timeout, self.pop()).await.ok()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

impl Default for CandidateQueue {
    fn default() -> Self {
        Self::new(0)
    }
}
