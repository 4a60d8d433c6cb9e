//! In-process cache store

use super::{CacheEntry, CacheStore};
use crate::usage::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Cache store kept in memory with an optional entry cap
#[derive(Debug)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// Maximum entries to keep (0 = unbounded)
    max_entries: usize,
}

impl MemoryCacheStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop expired entries first, then the oldest quarter if still full
    fn evict(entries: &mut HashMap<String, CacheEntry>, max_entries: usize, now: DateTime<Utc>) {
        entries.retain(|_, e| !e.is_expired(now));
        if entries.len() < max_entries {
            return;
        }

        let evict_count = (max_entries / 4).max(1);
        let mut by_age: Vec<_> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.created_at))
            .collect();
        by_age.sort_by_key(|(_, t)| *t);

        for (key, _) in by_age.into_iter().take(evict_count) {
            entries.remove(&key);
        }
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if self.max_entries > 0
            && entries.len() >= self.max_entries
            && !entries.contains_key(&entry.key)
        {
            Self::evict(&mut entries, self.max_entries, Utc::now());
        }
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn entry(key: &str, created_at: DateTime<Utc>, ttl: i64) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            value: json!(key),
            created_at,
            expires_at: created_at + Duration::seconds(ttl),
        }
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = MemoryCacheStore::new(4);
        let start = Utc::now();
        for i in 0..4 {
            store
                .put(entry(&format!("k{i}"), start + Duration::seconds(i), 3600))
                .await
                .unwrap();
        }
        store.put(entry("k4", start + Duration::seconds(10), 3600)).await.unwrap();

        assert_eq!(store.len().await, 4);
        assert!(store.get("k0").await.unwrap().is_none());
        assert!(store.get("k4").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryCacheStore::new(0);
        let now = Utc::now();
        store.put(entry("old", now - Duration::seconds(100), 10)).await.unwrap();
        store.put(entry("fresh", now, 100)).await.unwrap();

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = MemoryCacheStore::default();
        let now = Utc::now();
        let mut first = entry("k", now, 100);
        first.value = json!("first");
        let mut second = entry("k", now, 100);
        second.value = json!("second");

        store.put(first).await.unwrap();
        store.put(second).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().value, json!("second"));
    }
}
