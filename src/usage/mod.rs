//! Per-provider, per-day usage bookkeeping
//!
//! One [`UsageRecord`] exists per (provider, UTC calendar day). Records are
//! created on first use of the day and only ever incremented; retention is
//! left to whoever owns the backing store.
//!
//! Quota accounting relies on [`UsageStore::increment`] being atomic for a
//! given (provider, day). The in-memory store performs the find-or-create and
//! the increment under a single write lock. A backing store without an atomic
//! increment primitive would make quotas approximate: two concurrent calls
//! could both read the same count and one increment would be lost.

mod file;
mod recorder;
mod store;

pub use file::JsonFileUsageStore;
pub use recorder::{DailyTotals, UsageRecorder, UsageStats};
pub use store::MemoryUsageStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Usage counters for one provider on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub provider_id: String,
    /// UTC calendar day, `YYYY-MM-DD`
    pub date: String,
    pub request_count: u64,
    pub token_count: u64,
    pub last_used_at: DateTime<Utc>,
}

/// Day key for a timestamp. Keys sort chronologically as strings.
pub fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

pub fn today_key() -> String {
    day_key(Utc::now())
}

/// Key of the day `days` before `at`
pub fn days_ago_key(at: DateTime<Utc>, days: u32) -> String {
    day_key(at - Duration::days(i64::from(days)))
}

/// Records dated on or after `date`, newest day first, then by provider
pub(crate) fn rows_since<'a>(
    records: impl Iterator<Item = &'a UsageRecord>,
    date: &str,
) -> Vec<UsageRecord> {
    let mut rows: Vec<UsageRecord> = records
        .filter(|r| r.date.as_str() >= date)
        .cloned()
        .collect();
    rows.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| a.provider_id.cmp(&b.provider_id))
    });
    rows
}

/// Backing store for usage records
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Fetch the record for (provider, day), if any
    async fn get(&self, provider_id: &str, date: &str) -> Result<Option<UsageRecord>, StoreError>;

    /// Find-or-create the record, add one request and `token_delta` tokens.
    /// Must be atomic per (provider, day).
    async fn increment(
        &self,
        provider_id: &str,
        date: &str,
        token_delta: u64,
        at: DateTime<Utc>,
    ) -> Result<UsageRecord, StoreError>;

    /// All records dated on or after `date`
    async fn list_since(&self, date: &str) -> Result<Vec<UsageRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_key_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 59).unwrap();
        assert_eq!(day_key(at), "2024-03-07");
    }

    #[test]
    fn test_days_ago_key() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        assert_eq!(days_ago_key(at, 1), "2024-02-29");
        assert!(days_ago_key(at, 6) < day_key(at));
    }
}
