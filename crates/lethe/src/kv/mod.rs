//! Sharded key-value substrate and the atomic state-transition layer
//!
//! Every mutation of shared tier state goes through a single server-side
//! merge transaction: the backend reads the current value, applies a pure
//! merge function, and writes the result inside one per-shard critical
//! section. There is no client-side read-modify-write round trip and no
//! optimistic-lock retry loop; concurrent writers within a scope are
//! serialized by the shard.
//!
//! Distributed mutual-exclusion locks are deliberately absent from routine
//! state updates.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{LetheError, Result};
use crate::keyspace::ScopedKey;

pub use memory::MemoryKv;

/// Sentinel used by [`AtomicStateLayer::update_record`] to abort a merge
/// against an absent key without writing
const MERGE_TARGET_ABSENT: &str = "merge target absent";

/// Pure merge function applied inside the backend's critical section.
/// Receives the current value (if any) and returns the replacement bytes.
pub type MergeFn<'a> = &'a (dyn Fn(Option<&[u8]>) -> Result<Vec<u8>> + Send + Sync);

/// Contract for the sharded storage substrate.
///
/// Implementations must colocate all keys of one scope on one shard (see
/// [`crate::keyspace`]) so that `merge` and `scan_prefix` within a scope
/// observe a serialized history.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Whether this backend can execute `merge` as a single atomic
    /// server-side operation. Backends answering `false` are rejected by
    /// [`AtomicStateLayer::new`].
    fn supports_atomic_merge(&self) -> bool;

    /// Read a value
    async fn get(&self, key: &ScopedKey) -> Result<Option<Vec<u8>>>;

    /// Write a value, optionally with a time-to-live
    async fn put(&self, key: &ScopedKey, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Delete a value; returns whether it existed
    async fn delete(&self, key: &ScopedKey) -> Result<bool>;

    /// Atomically read-apply-write in one round trip. The merge function
    /// must be pure; it may run more than once only if the backend retries
    /// internally, never interleaved with another writer on the same key.
    async fn merge(&self, key: &ScopedKey, apply: MergeFn<'_>) -> Result<Vec<u8>>;

    /// List `(rendered_key, value)` pairs under a scope whose resource path
    /// starts with `path_prefix`
    async fn scan_prefix(&self, scope: &str, path_prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// All scopes this backend has seen
    async fn list_scopes(&self) -> Result<Vec<String>>;

    /// Drop expired entries; returns how many were removed
    async fn purge_expired(&self) -> Result<usize>;
}

/// A version-stamped append-only history, used to verify the no-lost-updates
/// invariant: after N concurrent merges the version equals N and the history
/// holds N entries.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VersionedHistory<T> {
    /// Bumped once per merge
    pub version: u64,
    /// One entry per merge, in commit order
    pub entries: Vec<T>,
}

impl<T> Default for VersionedHistory<T> {
    fn default() -> Self {
        Self {
            version: 0,
            entries: Vec::new(),
        }
    }
}

impl<T> VersionedHistory<T> {
    /// Append an entry and bump the version
    pub fn push(mut self, entry: T) -> Self {
        self.version += 1;
        self.entries.push(entry);
        self
    }
}

/// Typed facade over a [`KvBackend`] that enforces the atomicity contract.
///
/// Construction fails closed: a backend that cannot merge atomically is
/// rejected with a configuration error rather than silently degrading to
/// non-atomic read-modify-write.
#[derive(Clone)]
pub struct AtomicStateLayer {
    kv: Arc<dyn KvBackend>,
}

impl std::fmt::Debug for AtomicStateLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicStateLayer").finish_non_exhaustive()
    }
}

impl AtomicStateLayer {
    pub fn new(kv: Arc<dyn KvBackend>) -> Result<Self> {
        if !kv.supports_atomic_merge() {
            return Err(LetheError::AtomicityUnsupported(
                "backend cannot execute merge transactions atomically; refusing to start"
                    .to_string(),
            ));
        }
        Ok(Self { kv })
    }

    /// The underlying backend
    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.kv
    }

    /// Read and deserialize a record
    pub async fn get_record<T: DeserializeOwned>(&self, key: &ScopedKey) -> Result<Option<T>> {
        match self.kv.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a record
    pub async fn put_record<T: Serialize>(
        &self,
        key: &ScopedKey,
        record: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.kv.put(key, serde_json::to_vec(record)?, ttl).await
    }

    /// Delete a record; returns whether it existed
    pub async fn delete(&self, key: &ScopedKey) -> Result<bool> {
        self.kv.delete(key).await
    }

    /// Execute a typed merge transaction and return the committed record.
    ///
    /// `apply` sees the current record (`None` on first write) and returns
    /// its replacement; serialization happens inside the transaction.
    pub async fn merge_record<T, F>(&self, key: &ScopedKey, apply: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(Option<T>) -> T + Send + Sync,
    {
        let raw = self
            .kv
            .merge(key, &|current: Option<&[u8]>| {
                let parsed = match current {
                    Some(bytes) => Some(serde_json::from_slice::<T>(bytes)?),
                    None => None,
                };
                let next = apply(parsed);
                Ok(serde_json::to_vec(&next)?)
            })
            .await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Execute a typed merge transaction against an existing record.
    ///
    /// Returns `Ok(None)` without writing when the key is absent; the merge
    /// never materializes records out of nothing. Used for mutations like
    /// reinforcement that only make sense on a live record.
    pub async fn update_record<T, F>(&self, key: &ScopedKey, apply: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T) -> T + Send + Sync,
    {
        let outcome = self
            .kv
            .merge(key, &|current: Option<&[u8]>| match current {
                Some(bytes) => {
                    let parsed = serde_json::from_slice::<T>(bytes)?;
                    Ok(serde_json::to_vec(&apply(parsed))?)
                }
                None => Err(LetheError::Storage(MERGE_TARGET_ABSENT.to_string())),
            })
            .await;

        match outcome {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(LetheError::Storage(msg)) if msg == MERGE_TARGET_ABSENT => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Scan typed records under a scope by path prefix
    pub async fn scan_records<T: DeserializeOwned>(
        &self,
        scope: &str,
        path_prefix: &str,
    ) -> Result<Vec<T>> {
        let pairs = self.kv.scan_prefix(scope, path_prefix).await?;
        let mut records = Vec::with_capacity(pairs.len());
        for (_, bytes) in pairs {
            records.push(serde_json::from_slice(&bytes)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_layer_accepts_atomic_backend() {
        let kv: Arc<dyn KvBackend> = Arc::new(MemoryKv::new(8));
        assert!(AtomicStateLayer::new(kv).is_ok());
    }

    #[tokio::test]
    async fn test_layer_fails_closed_on_non_atomic_backend() {
        let kv: Arc<dyn KvBackend> = Arc::new(MemoryKv::without_atomic_merge(8));
        let err = AtomicStateLayer::new(kv).unwrap_err();
        assert!(matches!(err, LetheError::AtomicityUnsupported(_)));
    }

    #[tokio::test]
    async fn test_merge_record_roundtrip() {
        let layer = AtomicStateLayer::new(Arc::new(MemoryKv::new(8))).unwrap();
        let key = ScopedKey::new("scope", "history");

        let first: VersionedHistory<String> = layer
            .merge_record(&key, |current: Option<VersionedHistory<String>>| {
                current.unwrap_or_default().push("a".to_string())
            })
            .await
            .unwrap();
        assert_eq!(first.version, 1);

        let second: VersionedHistory<String> = layer
            .merge_record(&key, |current: Option<VersionedHistory<String>>| {
                current.unwrap_or_default().push("b".to_string())
            })
            .await
            .unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.entries, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_update_record_absent_key_is_noop() {
        let layer = AtomicStateLayer::new(Arc::new(MemoryKv::new(8))).unwrap();
        let key = ScopedKey::new("scope", "missing");

        let updated: Option<u32> = layer.update_record(&key, |v: u32| v + 1).await.unwrap();
        assert!(updated.is_none());
        assert!(layer.get_record::<u32>(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_record_present_key() {
        let layer = AtomicStateLayer::new(Arc::new(MemoryKv::new(8))).unwrap();
        let key = ScopedKey::new("scope", "counter");
        layer.put_record(&key, &41u32, None).await.unwrap();

        let updated = layer.update_record(&key, |v: u32| v + 1).await.unwrap();
        assert_eq!(updated, Some(42));
    }

    #[tokio::test]
    async fn test_versioned_history_push() {
        let history: VersionedHistory<u32> = VersionedHistory::default().push(1).push(2);
        assert_eq!(history.version, 2);
        assert_eq!(history.entries, vec![1, 2]);
    }
}
