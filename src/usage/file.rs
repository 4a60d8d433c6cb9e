//! Usage ledger persisted as a JSON file
//!
//! The whole ledger is loaded on open and rewritten after every increment
//! (temp file, then rename). Increments are atomic within one process; two
//! processes sharing a file can still lose each other's updates.

use super::{rows_since, StoreError, UsageRecord, UsageStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

type Ledger = HashMap<(String, String), UsageRecord>;

/// Usage store that survives process restarts
#[derive(Debug)]
pub struct JsonFileUsageStore {
    path: PathBuf,
    records: Mutex<Ledger>,
}

impl JsonFileUsageStore {
    /// `~/.local/share/task-router/usage.json` on Linux
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("task-router").join("usage.json"))
            .unwrap_or_else(|| PathBuf::from("usage.json"))
    }

    /// Load the ledger at `path`. A missing file is an empty ledger; an
    /// unreadable or corrupt one is an error.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let rows: Vec<UsageRecord> = serde_json::from_str(&content)?;
                rows.into_iter()
                    .map(|r| ((r.provider_id.clone(), r.date.clone()), r))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ledger::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), records = records.len(), "usage ledger opened");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &Ledger) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let rows = rows_since(records.values(), "");
        let json = serde_json::to_string_pretty(&rows)?;

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl UsageStore for JsonFileUsageStore {
    async fn get(&self, provider_id: &str, date: &str) -> Result<Option<UsageRecord>, StoreError> {
        let records = self.records.lock().await;
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
        // Held through the write so increments and file contents stay in step.
        let mut records = self.records.lock().await;
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
        let updated = record.clone();

        // The in-memory count stands even if the write fails.
        self.persist(&records).await?;
        Ok(updated)
    }

    async fn list_since(&self, date: &str) -> Result<Vec<UsageRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(rows_since(records.values(), date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_is_empty_ledger() {
        let dir = tempdir().unwrap();
        let store = JsonFileUsageStore::open(dir.path().join("usage.json"))
            .await
            .unwrap();
        assert!(store.list_since("").await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_counts_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("usage.json");

        let store = JsonFileUsageStore::open(&path).await.unwrap();
        store.increment("glm-4-free", "2024-05-01", 30, Utc::now()).await.unwrap();
        store.increment("glm-4-free", "2024-05-01", 12, Utc::now()).await.unwrap();
        store.increment("groq-fast", "2024-05-02", 5, Utc::now()).await.unwrap();
        drop(store);

        let reopened = JsonFileUsageStore::open(&path).await.unwrap();
        let record = reopened.get("glm-4-free", "2024-05-01").await.unwrap().unwrap();
        assert_eq!(record.request_count, 2);
        assert_eq!(record.token_count, 42);
        assert_eq!(reopened.list_since("2024-05-02").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("usage.json");
        let store = Arc::new(JsonFileUsageStore::open(&path).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.increment("p", "2024-01-01", 1, Utc::now()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let reopened = JsonFileUsageStore::open(&path).await.unwrap();
        let record = reopened.get("p", "2024-01-01").await.unwrap().unwrap();
        assert_eq!(record.request_count, 32);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("usage.json");
        std::fs::write(&path, "{not a ledger").unwrap();

        let result = JsonFileUsageStore::open(&path).await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }
}
