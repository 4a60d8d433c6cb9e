//! In-process usage store

use super::{rows_since, StoreError, UsageRecord, UsageStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Usage store kept in memory, keyed by (provider, day)
#[derive(Debug, Default)]
pub struct MemoryUsageStore {
    records: RwLock<HashMap<(String, String), UsageRecord>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a record, e.g. to restore counters from a snapshot
    pub async fn insert(&self, record: UsageRecord) {
        let key = (record.provider_id.clone(), record.date.clone());
        self.records.write().await.insert(key, record);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn get(&self, provider_id: &str, date: &str) -> Result<Option<UsageRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(&(provider_id.to_string(), date.to_string()))
            .cloned())
    }

    async fn increment(
        &self,
        provider_id: &str,
        date: &str,
        token_delta: u64,
        at: DateTime<Utc>,
    ) -> Result<UsageRecord, StoreError> {
        // Lookup and increment happen under one write guard.
        let mut records = self.records.write().await;
        let record = records
            .entry((provider_id.to_string(), date.to_string()))
            .or_insert_with(|| UsageRecord {
                provider_id: provider_id.to_string(),
                date: date.to_string(),
                request_count: 0,
                token_count: 0,
                last_used_at: at,
            });

        record.request_count += 1;
        record.token_count += token_delta;
        record.last_used_at = at;

        Ok(record.clone())
    }

    async fn list_since(&self, date: &str) -> Result<Vec<UsageRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(rows_since(records.values(), date))
    }
}
