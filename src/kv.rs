//! Keyed byte store with TTL and set primitives.
//!
//! [`KvStore`] is the trait seam over the external KV store capability.
//! [`InMemoryKvStore`] is a reference implementation used for tests and
//! local/offline operation, grounded on the teacher's `Store` trait +
//! `InMemoryStore` pattern (`context-harness-core/src/store`).
//!
//! All writes are best-effort: callers log and swallow write failures;
//! a read failure is treated as a miss. Cache entries are a strict
//! performance optimization — removing any entry must never change
//! semantics, only latency.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()>;
    async fn del(&self, key: &str) -> anyhow::Result<()>;
    async fn sadd(&self, key: &str, member: &str) -> anyhow::Result<()>;
    async fn smembers(&self, key: &str) -> anyhow::Result<HashSet<String>>;
    async fn srem(&self, key: &str, member: &str) -> anyhow::Result<()>;
    /// Delete every key starting with `prefix`. Used by `reset()` to
    /// invalidate stale cache entries immediately rather than waiting on
    /// TTL expiry — only needed by a backend that can enumerate its own
    /// keys; a real KV store without a scan primitive may implement this
    /// as a no-op and fall back to natural TTL expiry.
    async fn clear_prefix(&self, prefix: &str) -> anyhow::Result<()>;
}

/// `base64(text)` truncated to 100 characters, used by the `emb:` and
/// `knowledge:` namespaces. This intentionally collapses very long
/// near-duplicate inputs into a shared cache entry — the source relies on
/// this, so the truncation width must not change even though it reads as
/// an aliasing bug at first glance.
pub fn truncated_b64_key(namespace: &str, text: &str) -> String {
    let encoded = STANDARD.encode(text.as_bytes());
    let truncated: String = encoded.chars().take(100).collect();
    format!("{namespace}{truncated}")
}

/// Full (untruncated) `base64(query)` key used by the `query:` namespace.
pub fn query_key(query: &str) -> String {
    format!("query:{}", STANDARD.encode(query.as_bytes()))
}

pub fn embedding_key(text: &str) -> String {
    truncated_b64_key("emb:", text)
}

pub fn knowledge_key(message: &str) -> String {
    truncated_b64_key("knowledge:", message)
}

pub fn memory_key(session_id: &str) -> String {
    format!("memory:{session_id}")
}

pub fn appt_key(appt_id: &str) -> String {
    format!("appt:{appt_id}")
}

pub const APPTS_ALL_KEY: &str = "appts:all";

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// In-memory [`KvStore`] backed by a `RwLock<HashMap>`, for tests and
/// offline operation. Expiry is lazy (checked on read); entries never
/// spontaneously evict outside of a read, which is acceptable because
/// cache entries are a pure performance optimization.
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, Entry>>,
    sets: RwLock<HashMap<String, HashSet<String>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sets: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut entries = self.entries.write().unwrap();
        match entries.get(key) {
            Some(entry) => {
                if let Some(expires_at) = entry.expires_at {
                    if Instant::now() >= expires_at {
                        entries.remove(key);
                        return Ok(None);
                    }
                }
                Ok(Some(entry.value.clone()))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.entries.write().unwrap().remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> anyhow::Result<()> {
        self.sets
            .write()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<HashSet<String>> {
        Ok(self.sets.read().unwrap().get(key).cloned().unwrap_or_default())
    }

    async fn srem(&self, key: &str, member: &str) -> anyhow::Result<()> {
        if let Some(set) = self.sets.write().unwrap().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn clear_prefix(&self, prefix: &str) -> anyhow::Result<()> {
        self.entries
            .write()
            .unwrap()
            .retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let kv = InMemoryKvStore::new();
        kv.set("a", b"hello".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let kv = InMemoryKvStore::new();
        assert_eq!(kv.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires() {
        let kv = InMemoryKvStore::new();
        kv.set("a", b"x".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_primitives() {
        let kv = InMemoryKvStore::new();
        kv.sadd("appts:all", "a1").await.unwrap();
        kv.sadd("appts:all", "a2").await.unwrap();
        let members = kv.smembers("appts:all").await.unwrap();
        assert_eq!(members.len(), 2);
        kv.srem("appts:all", "a1").await.unwrap();
        let members = kv.smembers("appts:all").await.unwrap();
        assert_eq!(members.len(), 1);
        assert!(members.contains("a2"));
    }

    #[tokio::test]
    async fn clear_prefix_only_removes_matching_keys() {
        let kv = InMemoryKvStore::new();
        kv.set("query:abc", b"1".to_vec(), None).await.unwrap();
        kv.set("knowledge:abc", b"2".to_vec(), None).await.unwrap();
        kv.set("memory:s1", b"3".to_vec(), None).await.unwrap();
        kv.clear_prefix("query:").await.unwrap();
        assert_eq!(kv.get("query:abc").await.unwrap(), None);
        assert!(kv.get("knowledge:abc").await.unwrap().is_some());
        assert!(kv.get("memory:s1").await.unwrap().is_some());
    }

    #[test]
    fn truncated_key_collapses_long_near_duplicates() {
        let long_prefix = "a".repeat(200);
        let a = format!("{long_prefix}-suffix-one");
        let b = format!("{long_prefix}-suffix-two");
        assert_eq!(embedding_key(&a), embedding_key(&b));
    }

    #[test]
    fn query_key_is_not_truncated() {
        let query = "a".repeat(300);
        let key = query_key(&query);
        // base64 of 300 bytes is always longer than the 100-char truncation
        // width used by emb:/knowledge:, confirming query: keeps full length.
        assert!(key.len() > 100 + "query:".len());
    }
}
