//! Response cache for idempotent chat completions
//!
//! Entries are addressed by a [`fingerprint`] of the normalized request and
//! carry an absolute expiry. Expiry is lazy: a read past `expires_at` is a
//! miss whether or not the store has purged the entry yet.
//!
//! The cache is strictly best-effort. Store errors on read degrade to a miss,
//! store errors on write are skipped, and neither reaches the caller.

mod response_cache;
mod store;
mod tracker;

pub use response_cache::ResponseCache;
pub use store::MemoryCacheStore;
pub use tracker::{CacheMetrics, CacheSummary};

use crate::api::Message;
use crate::usage::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Default TTL for cached completions
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// A cached value with its lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Backing store for cache entries. Concurrent writers to one key are
/// last-write-wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError>;

    /// Physically drop entries expired at `now`; returns how many were dropped
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Deterministic cache key for a chat request.
///
/// The request is rebuilt as a fixed structure (task type, then each
/// message's lowercased role and trimmed content) before hashing, so the key
/// does not depend on how the caller's JSON happened to be ordered or padded.
pub fn fingerprint(task_type: &str, messages: &[Message]) -> String {
    let normalized = json!({
        "task": task_type.trim(),
        "messages": messages
            .iter()
            .map(|m| json!([m.role.as_str(), m.content.trim()]))
            .collect::<Vec<_>>(),
    });

    let mut hasher = Sha256::new();
    hasher.update(normalized.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Role;

    fn msg(role: Role, content: &str) -> Message {
        Message {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint("general_chat", &[msg(Role::User, "hello")]);
        let b = fingerprint("general_chat", &[msg(Role::User, "  hello \n")]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_distinguishes_task_and_role() {
        let base = fingerprint("general_chat", &[msg(Role::User, "hello")]);
        assert_ne!(base, fingerprint("urgent_diagnosis", &[msg(Role::User, "hello")]));
        assert_ne!(base, fingerprint("general_chat", &[msg(Role::System, "hello")]));
    }

    #[test]
    fn test_fingerprint_respects_message_order() {
        let ab = fingerprint("t", &[msg(Role::User, "a"), msg(Role::User, "b")]);
        let ba = fingerprint("t", &[msg(Role::User, "b"), msg(Role::User, "a")]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_entry_expiry() {
        let now = Utc::now();
        let entry = CacheEntry {
            key: "k".into(),
            value: Value::Null,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(10),
        };
        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + chrono::Duration::seconds(10)));
    }
}
