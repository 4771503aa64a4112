//! In-process sharded key-value backend
//!
//! Reference implementation of [`KvBackend`]: N shards, each guarded by its
//! own mutex, with scope-colocated placement via the keyspace hash slot.
//! The merge transaction runs entirely inside the shard's critical section,
//! which is what makes it a single serializable round trip.
//!
//! TTL expiry is lazy on read plus an explicit purge used by the
//! reconciliation sweep.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{LetheError, Result};
use crate::keyspace::ScopedKey;
use crate::kv::{KvBackend, MergeFn};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Sharded in-memory backend with TTL support
pub struct MemoryKv {
    shards: Vec<Mutex<HashMap<String, Entry>>>,
    scopes: DashMap<String, ()>,
    atomic_merge: bool,
}

impl MemoryKv {
    /// Create a backend with `shard_count` shards
    pub fn new(shard_count: usize) -> Self {
        Self::build(shard_count.max(1), true)
    }

    /// Create a backend that refuses merge transactions. Models a substrate
    /// without server-side merge support; the atomic layer must reject it.
    pub fn without_atomic_merge(shard_count: usize) -> Self {
        Self::build(shard_count.max(1), false)
    }

    fn build(shard_count: usize, atomic_merge: bool) -> Self {
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect(),
            scopes: DashMap::new(),
            atomic_merge,
        }
    }

    fn shard_for(&self, key: &ScopedKey) -> &Mutex<HashMap<String, Entry>> {
        let index = key.slot() as usize % self.shards.len();
        &self.shards[index]
    }

    fn note_scope(&self, key: &ScopedKey) {
        self.scopes.entry(key.scope().to_string()).or_insert(());
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    fn supports_atomic_merge(&self) -> bool {
        self.atomic_merge
    }

    async fn get(&self, key: &ScopedKey) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut shard = self
            .shard_for(key)
            .lock()
            .map_err(|_| LetheError::Storage("shard lock poisoned".to_string()))?;
        let rendered = key.render();
        if let Some(entry) = shard.get(&rendered) {
            if entry.expired(now) {
                shard.remove(&rendered);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn put(&self, key: &ScopedKey, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.note_scope(key);
        let mut shard = self
            .shard_for(key)
            .lock()
            .map_err(|_| LetheError::Storage("shard lock poisoned".to_string()))?;
        shard.insert(
            key.render(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &ScopedKey) -> Result<bool> {
        let mut shard = self
            .shard_for(key)
            .lock()
            .map_err(|_| LetheError::Storage("shard lock poisoned".to_string()))?;
        Ok(shard.remove(&key.render()).is_some())
    }

    async fn merge(&self, key: &ScopedKey, apply: MergeFn<'_>) -> Result<Vec<u8>> {
        if !self.atomic_merge {
            return Err(LetheError::AtomicityUnsupported(
                "merge transactions are disabled on this backend".to_string(),
            ));
        }

        self.note_scope(key);
        let now = Instant::now();
        let mut shard = self
            .shard_for(key)
            .lock()
            .map_err(|_| LetheError::Storage("shard lock poisoned".to_string()))?;

        // Read, apply, and write all happen under the shard lock; no other
        // writer can interleave.
        let rendered = key.render();
        let current = shard
            .get(&rendered)
            .filter(|entry| !entry.expired(now))
            .map(|entry| entry.value.as_slice());
        let next = apply(current)?;
        shard.insert(
            rendered,
            Entry {
                value: next.clone(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn scan_prefix(&self, scope: &str, path_prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let now = Instant::now();
        // All keys of one scope live on one shard by construction.
        let probe = ScopedKey::new(scope, path_prefix);
        let shard = self
            .shard_for(&probe)
            .lock()
            .map_err(|_| LetheError::Storage("shard lock poisoned".to_string()))?;

        let rendered_prefix = probe.render();
        let mut out: Vec<(String, Vec<u8>)> = shard
            .iter()
            .filter(|(k, entry)| k.starts_with(&rendered_prefix) && !entry.expired(now))
            .map(|(k, entry)| (k.clone(), entry.value.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn list_scopes(&self) -> Result<Vec<String>> {
        let mut scopes: Vec<String> = self.scopes.iter().map(|e| e.key().clone()).collect();
        scopes.sort();
        Ok(scopes)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard
                .lock()
                .map_err(|_| LetheError::Storage("shard lock poisoned".to_string()))?;
            let before = shard.len();
            shard.retain(|_, entry| !entry.expired(now));
            removed += before - shard.len();
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let kv = MemoryKv::new(8);
        let key = ScopedKey::new("scope", "item");

        assert!(kv.get(&key).await.unwrap().is_none());
        kv.put(&key, b"value".to_vec(), None).await.unwrap();
        assert_eq!(kv.get(&key).await.unwrap(), Some(b"value".to_vec()));
        assert!(kv.delete(&key).await.unwrap());
        assert!(kv.get(&key).await.unwrap().is_none());
        assert!(!kv.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let kv = MemoryKv::new(4);
        let key = ScopedKey::new("scope", "ephemeral");
        kv.put(&key, b"v".to_vec(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(kv.get(&key).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(kv.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired_counts_removals() {
        let kv = MemoryKv::new(4);
        for i in 0..3 {
            let key = ScopedKey::new("scope", format!("t:{i}"));
            kv.put(&key, b"v".to_vec(), Some(Duration::from_millis(10)))
                .await
                .unwrap();
        }
        let keep = ScopedKey::new("scope", "keep");
        kv.put(&keep, b"v".to_vec(), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(kv.purge_expired().await.unwrap(), 3);
        assert!(kv.get(&keep).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_scan_prefix_scoped_and_sorted() {
        let kv = MemoryKv::new(8);
        for path in ["fact:b", "fact:a", "turn:x"] {
            kv.put(&ScopedKey::new("s1", path), path.as_bytes().to_vec(), None)
                .await
                .unwrap();
        }
        kv.put(&ScopedKey::new("s2", "fact:c"), b"other".to_vec(), None)
            .await
            .unwrap();

        let facts = kv.scan_prefix("s1", "fact:").await.unwrap();
        assert_eq!(facts.len(), 2);
        assert!(facts[0].0.ends_with("fact:a"));
        assert!(facts[1].0.ends_with("fact:b"));
    }

    #[tokio::test]
    async fn test_list_scopes() {
        let kv = MemoryKv::new(8);
        kv.put(&ScopedKey::new("b", "x"), vec![], None).await.unwrap();
        kv.put(&ScopedKey::new("a", "x"), vec![], None).await.unwrap();
        assert_eq!(kv.list_scopes().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_merge_refused_without_atomic_support() {
        let kv = MemoryKv::without_atomic_merge(4);
        let key = ScopedKey::new("scope", "item");
        let err = kv.merge(&key, &|_| Ok(vec![1])).await.unwrap_err();
        assert!(matches!(err, LetheError::AtomicityUnsupported(_)));
    }

    #[tokio::test]
    async fn test_merge_sees_previous_value() {
        let kv = MemoryKv::new(4);
        let key = ScopedKey::new("scope", "counter");

        for expected in 1u8..=3 {
            let result = kv
                .merge(&key, &|current| {
                    let next = current.map_or(0, |bytes| bytes[0]) + 1;
                    Ok(vec![next])
                })
                .await
                .unwrap();
            assert_eq!(result, vec![expected]);
        }
    }
}
