//! C8 Cache (spec §4.8).
//!
//! Two tiers: an in-process moka L1 (byte-weighted LRU with a TTL) and an
//! optional Redis L2. L2 is best-effort — any failure talking to Redis is
//! logged and treated as a miss, never surfaced to the coordinator.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache as MokaCache;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::CacheError;

/// Cache key namespace. Per spec §4.8: `img:<first-16-hex-of-sha256(url)>`.
pub fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("img:{hex}")
}

#[derive(Clone)]
pub struct Cache {
    l1: MokaCache<String, Arc<Vec<u8>>>,
    l2: Option<ConnectionManager>,
    l2_ttl: Duration,
}

impl Cache {
    pub fn new(max_entries: u64, max_bytes: u64, ttl: Duration) -> Self {
        let l1 = MokaCache::builder()
            .max_capacity(max_bytes)
            .weigher(|_key: &String, value: &Arc<Vec<u8>>| -> u32 {
                value.len().min(u32::MAX as usize) as u32
            })
            .time_to_live(ttl)
            .support_invalidation_closures()
            .build();
        let _ = max_entries; // moka bounds by weight; entry count is advisory only, kept for config symmetry.

        Self {
            l1,
            l2: None,
            l2_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }

    pub async fn with_redis(mut self, redis_url: &str, l2_ttl: Duration) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| CacheError::Backend(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        self.l2 = Some(manager);
        self.l2_ttl = l2_ttl;
        Ok(self)
    }

    /// Look up `key`, checking L1 first then L2. A L2 hit is promoted
    /// back into L1 before being returned.
    pub async fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        if let Some(hit) = self.l1.get(key).await {
            debug!(key, "l1 cache hit");
            return Some(hit);
        }

        let mut conn = self.l2.clone()?;
        match conn.get::<_, Option<Vec<u8>>>(key).await {
            Ok(Some(bytes)) => {
                debug!(key, "l2 cache hit, promoting to l1");
                let arc = Arc::new(bytes);
                self.l1.insert(key.to_string(), arc.clone()).await;
                Some(arc)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "l2 cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write `value` to L1, and best-effort to L2 if configured.
    pub async fn put(&self, key: &str, value: Vec<u8>) {
        let arc = Arc::new(value);
        self.l1.insert(key.to_string(), arc.clone()).await;

        if let Some(mut conn) = self.l2.clone() {
            let ttl_secs = self.l2_ttl.as_secs();
            let result: redis::RedisResult<()> = conn
                .set_ex(key, arc.as_ref().clone(), ttl_secs)
                .await;
            if let Err(e) = result {
                warn!(key, error = %e, "l2 cache write failed, continuing with l1 only");
            }
        }
    }

    pub fn l1_entry_count(&self) -> u64 {
        self.l1.entry_count()
    }

    /// Point invalidation by cache key (spec §4.8): removes `key` from L1
    /// immediately and, if configured, from L2. A subsequent `get` for
    /// this key is guaranteed to miss. L2 failures are logged, not fatal.
    pub async fn invalidate(&self, key: &str) {
        self.l1.invalidate(key).await;

        if let Some(mut conn) = self.l2.clone() {
            let result: redis::RedisResult<()> = conn.del(key).await;
            if let Err(e) = result {
                warn!(key, error = %e, "l2 cache invalidate failed");
            }
        }
    }

    /// Prefix invalidation (spec §4.8): removes every L1 entry whose key
    /// starts with `prefix`, and — via the L2 store's native key-listing
    /// capability (`KEYS prefix*`) — every matching L2 entry. `KEYS` is
    /// acceptable here because invalidation is an operator-triggered,
    /// low-frequency path, not request-path traffic.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        let owned_prefix = prefix.to_string();
        self.l1
            .invalidate_entries_if(move |k: &String, _v| k.starts_with(&owned_prefix))
            .ok();

        if let Some(mut conn) = self.l2.clone() {
            let pattern = format!("{prefix}*");
            match conn.keys::<_, Vec<String>>(pattern.as_str()).await {
                Ok(keys) if !keys.is_empty() => {
                    let result: redis::RedisResult<()> = conn.del(keys).await;
                    if let Err(e) = result {
                        warn!(prefix, error = %e, "l2 cache prefix invalidate failed");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(prefix, error = %e, "l2 cache key listing failed"),
            }
        }
    }
}
