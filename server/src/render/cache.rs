//! Bounded cache of encoded render PNGs
//!
//! Keys carry the store revision the render was produced from. Every commit
//! bumps the revision, so an entry for replaced masks is simply never looked
//! up again and ages out through TTL/TTI or size eviction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use metrics::{counter, gauge};
use moka::future::Cache;
use sha2::{Digest, Sha256};

use super::compositor::RenderInstruction;

/// Cache key: one render of one image revision
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct RenderKey {
    pub image_id: String,
    pub revision: u64,
    pub instructions_digest: [u8; 32],
}

impl RenderKey {
    pub fn new(image_id: &str, revision: u64, instructions: &[RenderInstruction]) -> Self {
        let mut hasher = Sha256::new();
        for inst in instructions {
            hasher.update(inst.mask_id.to_le_bytes());
            match inst.color {
                Some(c) => {
                    hasher.update([1u8]);
                    for channel in c {
                        hasher.update(channel.to_le_bytes());
                    }
                }
                None => hasher.update([0u8]),
            }
        }

        Self {
            image_id: image_id.to_string(),
            revision,
            instructions_digest: hasher.finalize().into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderCacheConfig {
    /// Maximum total bytes of cached PNGs (default: 64MB)
    pub max_size_bytes: u64,
    pub ttl: Duration,
    pub tti: Duration,
}

impl Default for RenderCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 64 * 1024 * 1024,
            ttl: Duration::from_secs(3600),
            tti: Duration::from_secs(600),
        }
    }
}

pub struct RenderCache {
    cache: Cache<RenderKey, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RenderCache {
    pub fn new(config: RenderCacheConfig) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &RenderKey, value: &Bytes| -> u32 {
                value.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(config.max_size_bytes)
            .time_to_live(config.ttl)
            .time_to_idle(config.tti)
            .build();

        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &RenderKey) -> Option<Bytes> {
        let result = self.cache.get(key).await;

        if result.is_some() {
            let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
            counter!("segmask_render_cache_hits_total").increment(1);
            if hits % 100 == 0 {
                self.update_gauges();
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("segmask_render_cache_misses_total").increment(1);
        }

        result
    }

    pub async fn insert(&self, key: RenderKey, value: Bytes) {
        self.cache.insert(key, value).await;
    }

    /// Look up `key`, computing and caching the value on a miss
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: RenderKey, init: F) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Bytes, E>>,
    {
        if let Some(cached) = self.get(&key).await {
            return Ok(cached);
        }

        let value = init().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    pub fn stats(&self) -> RenderCacheStats {
        RenderCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.cache.entry_count(),
            weighted_size: self.cache.weighted_size(),
        }
    }

    fn update_gauges(&self) {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total > 0 {
            gauge!("segmask_render_cache_hit_rate").set(hits as f64 / total as f64);
        }
        gauge!("segmask_render_cache_size_bytes").set(self.cache.weighted_size() as f64);
    }
}

#[derive(Debug, Clone)]
pub struct RenderCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
    /// Approximate; moka applies pending writes lazily
    pub weighted_size: u64,
}
