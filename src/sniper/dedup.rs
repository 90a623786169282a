//! Seen-set suppressing re-emission of already discovered mints.

use moka::future::Cache;
use std::time::Duration;

/// Bounded TTL set of mints seen on the discovery path.
///
/// Retry re-enqueues never consult this set.
#[derive(Clone)]
pub struct DedupSet {
    seen: Cache<String, ()>,
}

impl DedupSet {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            seen: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Record `mint` and return true if it was not already tracked.
    pub async fn insert_if_new(&self, mint: &str) -> bool {
        self.seen
            .entry_by_ref(mint)
            .or_insert(())
            .await
            .is_fresh()
    }

    pub async fn contains(&self, mint: &str) -> bool {
        self.seen.get(mint).await.is_some()
    }
}
