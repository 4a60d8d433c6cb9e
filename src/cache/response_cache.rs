//! Best-effort TTL cache in front of a [`CacheStore`]

use super::{CacheEntry, CacheMetrics, CacheStore, CacheSummary};
use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Longer TTLs are capped to this (ten years)
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    ttl_secs: u64,
    enabled: bool,
    metrics: Arc<Mutex<CacheMetrics>>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl_secs: u64) -> Self {
        Self {
            store,
            ttl_secs,
            enabled: true,
            metrics: Arc::new(Mutex::new(CacheMetrics::default())),
        }
    }

    /// A cache that never hits and never writes
    pub fn disabled(store: Arc<dyn CacheStore>) -> Self {
        Self {
            enabled: false,
            ..Self::new(store, 0)
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached value for `key`, or `None` on miss, expiry or store error
    pub async fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }

        match self.store.get(key).await {
            Ok(Some(entry)) if !entry.is_expired(Utc::now()) => {
                debug!(key = key, "cache hit");
                self.with_metrics(|m| m.record_hit());
                Some(entry.value)
            }
            Ok(Some(_)) => {
                debug!(key = key, "cache entry expired");
                self.with_metrics(|m| m.record_miss(true));
                None
            }
            Ok(None) => {
                debug!(key = key, "cache miss");
                self.with_metrics(|m| m.record_miss(false));
                None
            }
            Err(e) => {
                warn!(key = key, error = %e, "cache read failed, treating as miss");
                self.with_metrics(|m| {
                    m.record_error();
                    m.record_miss(false);
                });
                None
            }
        }
    }

    /// Store with the configured TTL
    pub async fn put(&self, key: &str, value: Value) {
        self.put_with_ttl(key, value, self.ttl_secs).await
    }

    /// Store with an explicit TTL. A zero TTL would break
    /// `expires_at > created_at`, so the write is skipped.
    pub async fn put_with_ttl(&self, key: &str, value: Value, ttl_secs: u64) {
        if !self.enabled {
            return;
        }
        if ttl_secs == 0 {
            debug!(key = key, "zero ttl, skipping cache write");
            return;
        }

        let created_at = Utc::now();
        let ttl = ttl_secs.min(MAX_TTL_SECS) as i64;
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            created_at,
            expires_at: created_at + Duration::seconds(ttl),
        };

        match self.store.put(entry).await {
            Ok(()) => self.with_metrics(|m| m.record_write()),
            Err(e) => {
                warn!(key = key, error = %e, "cache write failed, skipping");
                self.with_metrics(|m| m.record_error());
            }
        }
    }

    /// Physically remove expired entries. Meant for an external cleanup job.
    pub async fn purge_expired(&self) -> usize {
        match self.store.purge_expired(Utc::now()).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "cache purge failed");
                0
            }
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> CacheSummary {
        let metrics = self.metrics();
        CacheSummary {
            enabled: self.enabled,
            ttl_secs: self.ttl_secs,
            total_hits: metrics.cache_hits,
            total_misses: metrics.cache_misses,
            hit_rate: metrics.hit_rate,
            store_errors: metrics.store_errors,
        }
    }

    fn with_metrics(&self, f: impl FnOnce(&mut CacheMetrics)) {
        if let Ok(mut metrics) = self.metrics.lock() {
            f(&mut metrics);
        }
    }
}
