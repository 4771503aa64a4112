//! Episodic tier: bi-temporal narrative episodes with dual indexing
//!
//! Every stored episode is written to the record store and to both
//! secondary indexes (similarity and relationship) under the same episode
//! id, so either index resolves to the same record. Contradicted episodes
//! are invalidated in place by closing their validity interval; nothing in
//! this tier is ever deleted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{LetheError, Result};
use crate::index::{RelationGraph, SimilarityIndex};
use crate::keyspace::ScopedKey;
use crate::kv::AtomicStateLayer;
use crate::memory::types::Episode;
use crate::store::TierStore;

/// Query filter for episodes
#[derive(Debug, Clone, Default)]
pub struct EpisodeFilter {
    /// Only episodes mentioning this entity
    pub entity: Option<String>,
    /// Only episodes asserting this relation identity key
    pub identity_key: Option<String>,
    /// Only episodes whose validity interval is still open
    pub current_only: bool,
    /// Only episodes not yet covered by a knowledge document
    pub unmined_only: bool,
    /// Rank by similarity to this vector and keep the top k
    pub similar_to: Option<(Vec<f32>, usize)>,
}

/// Episodic tier with similarity and relationship indexes
pub struct EpisodeStore {
    layer: AtomicStateLayer,
    similarity: Arc<SimilarityIndex>,
    graph: Arc<RelationGraph>,
}

fn episode_key(scope: &str, id: Uuid) -> ScopedKey {
    ScopedKey::new(scope, format!("episode:{id}"))
}

impl EpisodeStore {
    pub fn new(
        layer: AtomicStateLayer,
        similarity: Arc<SimilarityIndex>,
        graph: Arc<RelationGraph>,
    ) -> Self {
        Self {
            layer,
            similarity,
            graph,
        }
    }

    /// The similarity index, shared with the consolidation engine
    pub fn similarity(&self) -> &Arc<SimilarityIndex> {
        &self.similarity
    }

    /// The relationship index, shared with the consolidation engine
    pub fn graph(&self) -> &Arc<RelationGraph> {
        &self.graph
    }

    /// Currently valid episodes asserting the given relation identity
    pub async fn current_for_identity(&self, scope: &str, identity_key: &str) -> Result<Vec<Episode>> {
        let ids = self.graph.episodes_for_identity(identity_key)?;
        let mut episodes = Vec::new();
        for id in ids {
            if let Some(episode) = self.layer.get_record::<Episode>(&episode_key(scope, id)).await? {
                if episode.is_current() {
                    episodes.push(episode);
                }
            }
        }
        Ok(episodes)
    }

    /// Close an episode's validity interval. The record stays queryable;
    /// provenance is permanent.
    pub async fn invalidate(&self, scope: &str, id: Uuid, at: DateTime<Utc>) -> Result<Option<Episode>> {
        self.layer
            .update_record(&episode_key(scope, id), move |mut episode: Episode| {
                if episode.is_current() {
                    episode.invalidate(at);
                }
                episode
            })
            .await
    }

    /// Mark episodes as mined by the distillation engine
    pub async fn mark_mined(&self, scope: &str, ids: &[Uuid]) -> Result<()> {
        for id in ids {
            self.layer
                .update_record(&episode_key(scope, *id), |mut episode: Episode| {
                    episode.mined = true;
                    episode
                })
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TierStore for EpisodeStore {
    type Record = Episode;
    type Filter = EpisodeFilter;

    /// Store the record and dual-write both indexes under one id
    async fn store(&self, episode: Episode) -> Result<Uuid> {
        if episode.session_id.is_empty() {
            return Err(LetheError::Validation(
                "episode session_id must not be empty".to_string(),
            ));
        }
        if episode.summary.trim().is_empty() {
            return Err(LetheError::Validation(
                "episode summary must not be empty".to_string(),
            ));
        }
        if let Some(valid_to) = episode.valid_to {
            if valid_to < episode.valid_from {
                return Err(LetheError::Validation(format!(
                    "episode valid_to {} precedes valid_from {}",
                    valid_to, episode.valid_from
                )));
            }
        }

        let id = episode.episode_id;
        let scope = episode.session_id.clone();
        let record = episode.clone();
        self.layer
            .merge_record(&episode_key(&scope, id), move |_: Option<Episode>| {
                record.clone()
            })
            .await?;

        self.similarity.insert(id, episode.embedding.clone());
        self.graph.index_episode(&episode)?;
        Ok(id)
    }

    async fn retrieve(&self, scope: &str, id: Uuid) -> Result<Option<Episode>> {
        self.layer.get_record(&episode_key(scope, id)).await
    }

    async fn query(&self, scope: &str, filter: &EpisodeFilter) -> Result<Vec<Episode>> {
        let mut episodes: Vec<Episode> = self.layer.scan_records(scope, "episode:").await?;

        if let Some(entity) = &filter.entity {
            let ids = self.graph.episodes_for_entity(entity)?;
            episodes.retain(|e| ids.contains(&e.episode_id));
        }
        if let Some(identity_key) = &filter.identity_key {
            let ids = self.graph.episodes_for_identity(identity_key)?;
            episodes.retain(|e| ids.contains(&e.episode_id));
        }
        if filter.current_only {
            episodes.retain(|e| e.is_current());
        }
        if filter.unmined_only {
            episodes.retain(|e| !e.mined);
        }

        if let Some((query, k)) = &filter.similar_to {
            let ranked = self.similarity.search(query, episodes.len().max(*k));
            let order: Vec<Uuid> = ranked.iter().map(|(id, _)| *id).collect();
            episodes.sort_by_key(|e| {
                order
                    .iter()
                    .position(|id| *id == e.episode_id)
                    .unwrap_or(usize::MAX)
            });
            episodes.truncate(*k);
        } else {
            episodes.sort_by_key(|e| e.observed_at);
        }
        Ok(episodes)
    }
}
