//! Cache hit/miss accounting

use serde::{Deserialize, Serialize};

/// Metrics for cache performance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Total cache hits
    pub cache_hits: u64,
    /// Total cache misses (absent or expired)
    pub cache_misses: u64,
    /// Misses caused by an entry past its expiry
    pub expired_reads: u64,
    /// Cache writes
    pub cache_writes: u64,
    /// Store errors swallowed on read or write
    pub store_errors: u64,
    /// Cache hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

impl CacheMetrics {
    pub fn record_hit(&mut self) {
        self.cache_hits += 1;
        self.update_hit_rate();
    }

    pub fn record_miss(&mut self, expired: bool) {
        self.cache_misses += 1;
        if expired {
            self.expired_reads += 1;
        }
        self.update_hit_rate();
    }

    pub fn record_write(&mut self) {
        self.cache_writes += 1;
    }

    pub fn record_error(&mut self) {
        self.store_errors += 1;
    }

    fn update_hit_rate(&mut self) {
        let total = self.cache_hits + self.cache_misses;
        self.hit_rate = if total > 0 {
            self.cache_hits as f64 / total as f64
        } else {
            0.0
        };
    }
}

impl std::fmt::Display for CacheMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Cache Metrics ===")?;
        writeln!(f, "Cache hits: {}", self.cache_hits)?;
        writeln!(f, "Cache misses: {}", self.cache_misses)?;
        writeln!(f, "Expired reads: {}", self.expired_reads)?;
        writeln!(f, "Hit rate: {:.1}%", self.hit_rate * 100.0)?;
        writeln!(f, "Writes: {}", self.cache_writes)?;
        writeln!(f, "Store errors: {}", self.store_errors)?;
        Ok(())
    }
}

/// Summary of cache state
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub hit_rate: f64,
    pub store_errors: u64,
}

impl std::fmt::Display for CacheSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Cache Summary ===")?;
        writeln!(f, "Enabled: {}", self.enabled)?;
        writeln!(f, "TTL: {}s", self.ttl_secs)?;
        writeln!(f, "Total hits: {}", self.total_hits)?;
        writeln!(f, "Total misses: {}", self.total_misses)?;
        writeln!(f, "Hit rate: {:.1}%", self.hit_rate * 100.0)?;
        writeln!(f, "Store errors: {}", self.store_errors)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_hit_rate() {
        let mut metrics = CacheMetrics::default();

        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss(false);

        assert!((metrics.hit_rate - 0.666).abs() < 0.01);
    }
}
