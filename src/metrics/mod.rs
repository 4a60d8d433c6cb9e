//! Metrics and tracking for routed requests
//!
//! In-process counters only; the durable per-day quota ledger is
//! [`crate::usage`].

use crate::api::TokenUsage;
use crate::vision::EstimationMethod;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Counters for one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderMetrics {
    pub requests: u64,
    pub tokens: u64,
    pub estimated_cost: f64,
}

/// Request metrics for a router instance
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterMetrics {
    /// Total prompt tokens across providers
    pub total_prompt_tokens: u64,
    /// Total completion tokens across providers
    pub total_completion_tokens: u64,
    /// Provider calls that completed
    pub request_count: u64,
    /// Chat requests answered from cache
    pub cache_hits: u64,
    /// Requests served by a provider other than the route's primary
    pub fallbacks_used: u64,
    /// Requests that returned `success: false`
    pub failures: u64,
    /// Total estimated cost (USD)
    pub estimated_cost: f64,
    pub providers: BTreeMap<String, ProviderMetrics>,
    /// Image recognition results by `estimationMethod`
    pub vision_methods: BTreeMap<String, u64>,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&mut self, provider_id: &str, usage: TokenUsage, cost: f64) {
        self.total_prompt_tokens += u64::from(usage.prompt_tokens);
        self.total_completion_tokens += u64::from(usage.completion_tokens);
        self.request_count += 1;
        self.estimated_cost += cost;

        let entry = self.providers.entry(provider_id.to_string()).or_default();
        entry.requests += 1;
        entry.tokens += u64::from(usage.total_tokens);
        entry.estimated_cost += cost;
    }

    pub fn record_vision(&mut self, method: EstimationMethod) {
        *self
            .vision_methods
            .entry(method.as_str().to_string())
            .or_default() += 1;
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_prompt_tokens + self.total_completion_tokens
    }

    pub fn average_tokens_per_request(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.total_tokens() as f64 / self.request_count as f64
    }
}

/// Thread-safe metrics tracker
#[derive(Clone)]
pub struct MetricsTracker {
    inner: Arc<Mutex<RouterMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RouterMetrics::new())),
        }
    }

    pub fn record_request(&self, provider_id: &str, usage: TokenUsage, cost: f64) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.record_request(provider_id, usage, cost);
        }
    }

    pub fn record_cache_hit(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.cache_hits += 1;
        }
    }

    pub fn record_fallback(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.fallbacks_used += 1;
        }
    }

    pub fn record_failure(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.failures += 1;
        }
    }

    pub fn record_vision(&self, method: EstimationMethod) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.record_vision(method);
        }
    }

    pub fn get_metrics(&self) -> RouterMetrics {
        self.inner
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> MetricsSummary {
        let metrics = self.get_metrics();
        MetricsSummary {
            total_tokens: metrics.total_tokens(),
            request_count: metrics.request_count,
            cache_hits: metrics.cache_hits,
            fallbacks_used: metrics.fallbacks_used,
            failures: metrics.failures,
            estimated_cost: metrics.estimated_cost,
            avg_tokens_per_request: metrics.average_tokens_per_request(),
            providers: metrics.providers,
            vision_methods: metrics.vision_methods,
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_tokens: u64,
    pub request_count: u64,
    pub cache_hits: u64,
    pub fallbacks_used: u64,
    pub failures: u64,
    pub estimated_cost: f64,
    pub avg_tokens_per_request: f64,
    pub providers: BTreeMap<String, ProviderMetrics>,
    pub vision_methods: BTreeMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Router Metrics Summary ===")?;
        writeln!(f, "Total tokens used: {}", self.total_tokens)?;
        writeln!(f, "Provider calls: {}", self.request_count)?;
        writeln!(f, "Avg tokens/request: {:.1}", self.avg_tokens_per_request)?;
        writeln!(f, "Cache hits: {}", self.cache_hits)?;
        writeln!(f, "Fallbacks used: {}", self.fallbacks_used)?;
        writeln!(f, "Failed requests: {}", self.failures)?;
        writeln!(f, "Estimated cost: ${:.4}", self.estimated_cost)?;
        for (id, p) in &self.providers {
            writeln!(
                f,
                "  {}: {} calls, {} tokens, ${:.4}",
                id, p.requests, p.tokens, p.estimated_cost
            )?;
        }
        if !self.vision_methods.is_empty() {
            writeln!(f, "Vision estimates:")?;
            for (method, count) in &self.vision_methods {
                writeln!(f, "  {}: {}", method, count)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request_per_provider() {
        let tracker = MetricsTracker::new();
        tracker.record_request("glm-4-free", TokenUsage::new(100, 50), 0.0);
        tracker.record_request("glm-4-free", TokenUsage::new(10, 5), 0.0);
        tracker.record_request("deepseek-chat", TokenUsage::new(1000, 1000), 0.002);

        let summary = tracker.summary();
        assert_eq!(summary.request_count, 3);
        assert_eq!(summary.total_tokens, 2165);
        assert_eq!(summary.providers["glm-4-free"].requests, 2);
        assert_eq!(summary.providers["glm-4-free"].tokens, 165);
        assert!((summary.estimated_cost - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_counters_and_display() {
        let tracker = MetricsTracker::new();
        tracker.record_cache_hit();
        tracker.record_fallback();
        tracker.record_failure();
        tracker.record_vision(EstimationMethod::IntelligentAlgorithm);
        tracker.record_vision(EstimationMethod::IntelligentAlgorithm);

        let summary = tracker.summary();
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.vision_methods["intelligent-algorithm"], 2);
        assert_eq!(summary.avg_tokens_per_request, 0.0);

        let text = summary.to_string();
        assert!(text.contains("Fallbacks used: 1"));
        assert!(text.contains("intelligent-algorithm: 2"));
    }
}
