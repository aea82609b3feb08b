//! Shard selection
//!
//! Keeps a TTL-cached endpoint list per operation class, a set of
//! temporarily banned endpoints, per-class round-robin cursors and a table of
//! in-flight allocations. Locks guard field updates only; discovery runs
//! outside them, so concurrent refreshes may both fetch and the last one wins.

use crate::config::ClientConfig;
use crate::transport::{ShardClass, ShardDiscovery, TokenProvider};
use cirrus_core::cache::Cached;
use cirrus_core::error::{CirrusError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

type Endpoints = Arc<Vec<String>>;
type PendingTable = Arc<Mutex<HashMap<String, usize>>>;

/// Endpoints excluded after a server failure
#[derive(Debug)]
pub struct BanSet {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl BanSet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Ban `url` for one TTL from now (re-banning extends it)
    pub fn ban(&self, url: &str) {
        self.entries.lock().insert(url.to_string(), Instant::now());
    }

    pub fn is_banned(&self, url: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(url) {
            Some(at) if at.elapsed() < self.ttl => true,
            Some(_) => {
                entries.remove(url);
                false
            }
            None => false,
        }
    }

    /// Currently banned endpoints
    pub fn banned(&self) -> Vec<String> {
        let mut entries = self.entries.lock();
        entries.retain(|_, at| at.elapsed() < self.ttl);
        entries.keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// A reservation on one endpoint for one request.
///
/// Released exactly once: by `release`, by `ShardManager::free`, or on drop.
#[derive(Debug)]
pub struct ShardAllocation {
    url: String,
    class: ShardClass,
    cursor: usize,
    pending: PendingTable,
    released: bool,
}

impl ShardAllocation {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn class(&self) -> ShardClass {
        self.class
    }

    /// Index of the endpoint in the class list; pass it to `next` to continue
    /// the rotation after this endpoint.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the reservation. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut pending = self.pending.lock();
        if let Some(count) = pending.get_mut(&self.url) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                pending.remove(&self.url);
            }
        }
    }
}

impl Drop for ShardAllocation {
    fn drop(&mut self) {
        self.release();
    }
}

/// Endpoint selection for every operation class
pub struct ShardManager {
    discovery: Arc<dyn ShardDiscovery>,
    tokens: Arc<dyn TokenProvider>,
    caches: Vec<Cached<Endpoints>>,
    cursors: Vec<AtomicUsize>,
    bans: BanSet,
    pending: PendingTable,
    poll_attempts: u32,
    poll_step: Duration,
}

impl ShardManager {
    pub fn new(
        config: &ClientConfig,
        discovery: Arc<dyn ShardDiscovery>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            discovery,
            tokens,
            caches: ShardClass::ALL
                .iter()
                .map(|_| Cached::new(config.shard_cache_ttl))
                .collect(),
            cursors: ShardClass::ALL.iter().map(|_| AtomicUsize::new(0)).collect(),
            bans: BanSet::new(config.ban_ttl),
            pending: Arc::new(Mutex::new(HashMap::new())),
            poll_attempts: config.shard_poll_attempts,
            poll_step: config.shard_poll_step,
        }
    }

    /// Cached endpoint list for `class`, refreshed from discovery when stale
    pub async fn endpoints(&self, class: ShardClass) -> Result<Endpoints> {
        let cache = &self.caches[class.slot()];
        if let Some(list) = cache.get() {
            debug!(class = %class, count = list.len(), "Shard cache hit");
            return Ok(list);
        }

        cache
            .get_or_load(|| async {
                let list = self.discovery.discover_shards(class).await?;
                if list.is_empty() {
                    return Err(CirrusError::NoShardsAvailable(class.to_string()));
                }
                debug!(class = %class, count = list.len(), "Refreshed shard list");
                Ok(Arc::new(list))
            })
            .await
    }

    /// Pick the endpoint for a one-off request of `class`.
    ///
    /// Polls up to the configured attempts, expiring the cached list while
    /// every endpoint is banned. When polling is exhausted the first listed
    /// endpoint is returned even if banned.
    #[instrument(skip(self))]
    pub async fn shard_info(&self, class: ShardClass) -> Result<String> {
        let mut refreshed = false;

        for attempt in 0..self.poll_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.poll_step * attempt).await;
            }

            let list = self.endpoints(class).await?;
            if let Some(url) = list.iter().find(|url| !self.bans.is_banned(url)) {
                if refreshed {
                    self.tokens.expire_token();
                }
                return Ok(url.clone());
            }

            debug!(class = %class, attempt, "Every endpoint banned, expiring shard list");
            self.invalidate(class);
            refreshed = true;
        }

        error!(class = %class, "Cannot get working shard, falling back to first endpoint");
        let list = self.endpoints(class).await?;
        list.first()
            .cloned()
            .ok_or_else(|| CirrusError::NoShardsAvailable(class.to_string()))
    }

    /// Allocate the next endpoint of `class` in round-robin order.
    ///
    /// With `previous` (a cursor from an earlier allocation) the scan starts
    /// right after it, otherwise after the class's shared cursor. Unbanned
    /// endpoints are preferred. If every endpoint is banned the list is
    /// expired and the first candidate is allocated anyway.
    pub async fn next(
        &self,
        class: ShardClass,
        previous: Option<usize>,
    ) -> Result<ShardAllocation> {
        let list = self.endpoints(class).await?;
        let len = list.len();
        let base = match previous {
            Some(cursor) => cursor.wrapping_add(1),
            None => self.cursors[class.slot()].fetch_add(1, Ordering::Relaxed),
        };

        for offset in 0..len {
            let idx = base.wrapping_add(offset) % len;
            if !self.bans.is_banned(&list[idx]) {
                return Ok(self.allocate(class, idx, &list[idx]));
            }
        }

        warn!(class = %class, "Every endpoint banned, using one anyway");
        self.invalidate(class);
        let idx = base % len;
        Ok(self.allocate(class, idx, &list[idx]))
    }

    fn allocate(&self, class: ShardClass, cursor: usize, url: &str) -> ShardAllocation {
        *self.pending.lock().entry(url.to_string()).or_insert(0) += 1;
        ShardAllocation {
            url: url.to_string(),
            class,
            cursor,
            pending: Arc::clone(&self.pending),
            released: false,
        }
    }

    /// Release an allocation. `None` or an already released one is a no-op.
    pub fn free(&self, allocation: Option<ShardAllocation>) {
        if let Some(mut allocation) = allocation {
            allocation.release();
        }
    }

    /// Exclude an endpoint after a server failure
    pub fn ban(&self, url: &str) {
        warn!(url = %url, "Banning shard");
        self.bans.ban(url);
    }

    pub fn is_banned(&self, url: &str) -> bool {
        self.bans.is_banned(url)
    }

    pub fn bans(&self) -> &BanSet {
        &self.bans
    }

    /// In-flight allocations on `url`
    pub fn pending_count(&self, url: &str) -> usize {
        self.pending.lock().get(url).copied().unwrap_or(0)
    }

    /// In-flight allocations across all endpoints
    pub fn total_pending(&self) -> usize {
        self.pending.lock().values().sum()
    }

    pub fn invalidate(&self, class: ShardClass) {
        self.caches[class.slot()].invalidate();
    }

    pub fn invalidate_all(&self) {
        self.caches.iter().for_each(Cached::invalidate);
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("bans", &self.bans)
            .field("pending", &self.total_pending())
            .field("poll_attempts", &self.poll_attempts)
            .field("poll_step", &self.poll_step)
            .finish()
    }
}
