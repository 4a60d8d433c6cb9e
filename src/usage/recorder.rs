//! Usage recording and aggregation

use super::{day_key, days_ago_key, StoreError, UsageRecord, UsageStore};
use crate::routing::ModelRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Records one usage tick per completed provider invocation.
///
/// Recording never fails the caller: the provider call has already happened,
/// so a store error is logged and dropped.
#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<dyn UsageStore>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn UsageStore> {
        Arc::clone(&self.store)
    }

    pub async fn record(&self, provider_id: &str, token_delta: u64) {
        self.record_at(provider_id, token_delta, Utc::now()).await
    }

    pub async fn record_at(&self, provider_id: &str, token_delta: u64, at: DateTime<Utc>) {
        let date = day_key(at);
        match self.store.increment(provider_id, &date, token_delta, at).await {
            Ok(record) => debug!(
                provider = provider_id,
                requests = record.request_count,
                tokens = record.token_count,
                "usage recorded"
            ),
            Err(e) => warn!(provider = provider_id, error = %e, "failed to record usage"),
        }
    }

    /// Rows for the last `days` days (today included) plus today's totals
    pub async fn stats(&self, days: u32, registry: &ModelRegistry) -> Result<UsageStats, StoreError> {
        let now = Utc::now();
        let today = day_key(now);
        let since = days_ago_key(now, days.saturating_sub(1));
        let rows = self.store.list_since(&since).await?;
        Ok(UsageStats::from_rows(rows, &today, registry))
    }
}

/// Aggregated usage for reporting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub usage: Vec<UsageRecord>,
    pub today: DailyTotals,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTotals {
    pub date: String,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
}

impl UsageStats {
    pub fn from_rows(rows: Vec<UsageRecord>, today: &str, registry: &ModelRegistry) -> Self {
        let mut totals = DailyTotals {
            date: today.to_string(),
            ..Default::default()
        };

        for row in rows.iter().filter(|r| r.date == today) {
            totals.total_requests += row.request_count;
            totals.total_tokens += row.token_count;
            if let Some(provider) = registry.get(&row.provider_id) {
                totals.estimated_cost += provider.estimate_cost(row.token_count);
            }
        }

        Self {
            usage: rows,
            today: totals,
        }
    }
}

impl std::fmt::Display for UsageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Usage ({}) ===", self.today.date)?;
        writeln!(f, "Requests today: {}", self.today.total_requests)?;
        writeln!(f, "Tokens today: {}", self.today.total_tokens)?;
        writeln!(f, "Estimated cost: ${:.4}", self.today.estimated_cost)?;
        for row in &self.usage {
            writeln!(
                f,
                "  {} {:<16} {:>6} req {:>9} tok",
                row.date, row.provider_id, row.request_count, row.token_count
            )?;
        }
        Ok(())
    }
}
