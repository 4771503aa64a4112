//! Active-context tier: raw turns with TTL eviction
//!
//! The only tier the agent's synchronous path writes to. Turns expire after
//! the retention window; a per-scope promoted-set (maintained through the
//! merge layer) records which turns the promotion engine has consumed, which
//! is what makes promotion idempotent.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use uuid::Uuid;

use crate::config::ActiveContextConfig;
use crate::error::{LetheError, Result};
use crate::keyspace::ScopedKey;
use crate::kv::AtomicStateLayer;
use crate::memory::types::Turn;
use crate::store::TierStore;

/// Query filter for turns
#[derive(Debug, Clone, Default)]
pub struct TurnFilter {
    /// Only turns the promotion engine has not consumed yet
    pub unpromoted_only: bool,
    /// Cap on returned turns (oldest first)
    pub limit: Option<usize>,
}

/// Ephemeral tier holding raw interaction turns
pub struct ActiveContextStore {
    layer: AtomicStateLayer,
    config: ActiveContextConfig,
    cache: Mutex<LruCache<Uuid, Turn>>,
}

fn turn_key(scope: &str, id: Uuid) -> ScopedKey {
    ScopedKey::new(scope, format!("turn:{id}"))
}

fn promoted_key(scope: &str) -> ScopedKey {
    ScopedKey::new(scope, "turns:promoted")
}

impl ActiveContextStore {
    pub fn new(layer: AtomicStateLayer, config: ActiveContextConfig) -> Self {
        let cache_size = NonZeroUsize::new(config.turn_cache_size.max(1))
            .expect("cache size is at least one");
        Self {
            layer,
            config,
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.turn_ttl_secs)
    }

    fn cache_put(&self, turn: &Turn) -> Result<()> {
        self.cache
            .lock()
            .map_err(|_| LetheError::Storage("turn cache lock poisoned".to_string()))?
            .put(turn.turn_id, turn.clone());
        Ok(())
    }

    /// Ids the promotion engine has already consumed in this scope
    pub async fn promoted_ids(&self, scope: &str) -> Result<HashSet<Uuid>> {
        Ok(self
            .layer
            .get_record(&promoted_key(scope))
            .await?
            .unwrap_or_default())
    }

    /// Record turns as consumed by promotion, atomically
    pub async fn mark_promoted(&self, scope: &str, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.layer
            .merge_record(&promoted_key(scope), |current: Option<HashSet<Uuid>>| {
                let mut set = current.unwrap_or_default();
                set.extend(ids.iter().copied());
                set
            })
            .await?;
        Ok(())
    }

    /// Drop promoted-set entries whose turns have expired, so the set does
    /// not grow past the retention window. Called by the sweep.
    pub async fn prune_promoted(&self, scope: &str) -> Result<usize> {
        let live: HashSet<Uuid> = self
            .layer
            .scan_records::<Turn>(scope, "turn:")
            .await?
            .into_iter()
            .map(|t| t.turn_id)
            .collect();

        let pruned = self
            .layer
            .merge_record(&promoted_key(scope), move |current: Option<HashSet<Uuid>>| {
                let mut set = current.unwrap_or_default();
                set.retain(|id| live.contains(id));
                set
            })
            .await?;
        Ok(pruned.len())
    }

    /// Number of turns awaiting promotion in a scope
    pub async fn unpromoted_count(&self, scope: &str) -> Result<usize> {
        let filter = TurnFilter {
            unpromoted_only: true,
            limit: None,
        };
        Ok(self.query(scope, &filter).await?.len())
    }

    /// Whether the unpromoted backlog has crossed the buffer threshold
    pub async fn over_threshold(&self, scope: &str) -> Result<bool> {
        Ok(self.unpromoted_count(scope).await? >= self.config.buffer_threshold)
    }
}

#[async_trait]
impl TierStore for ActiveContextStore {
    type Record = Turn;
    type Filter = TurnFilter;

    async fn store(&self, turn: Turn) -> Result<Uuid> {
        if turn.session_id.is_empty() {
            return Err(LetheError::Validation(
                "turn session_id must not be empty".to_string(),
            ));
        }
        if turn.content.trim().is_empty() {
            return Err(LetheError::Validation(
                "turn content must not be empty".to_string(),
            ));
        }

        let id = turn.turn_id;
        let key = turn_key(&turn.session_id, id);
        self.layer.put_record(&key, &turn, Some(self.ttl())).await?;
        self.cache_put(&turn)?;
        Ok(id)
    }

    async fn retrieve(&self, scope: &str, id: Uuid) -> Result<Option<Turn>> {
        {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| LetheError::Storage("turn cache lock poisoned".to_string()))?;
            if let Some(turn) = cache.get(&id) {
                if turn.session_id == scope {
                    return Ok(Some(turn.clone()));
                }
            }
        }
        self.layer.get_record(&turn_key(scope, id)).await
    }

    async fn query(&self, scope: &str, filter: &TurnFilter) -> Result<Vec<Turn>> {
        let mut turns: Vec<Turn> = self.layer.scan_records(scope, "turn:").await?;

        if filter.unpromoted_only {
            let promoted = self.promoted_ids(scope).await?;
            turns.retain(|t| !promoted.contains(&t.turn_id));
        }

        turns.sort_by_key(|t| t.timestamp);
        if let Some(limit) = filter.limit {
            turns.truncate(limit);
        }
        Ok(turns)
    }
}
