//! Consolidation engine: Pending -> Clustered -> Summarized -> Indexed
//!
//! Sweeps unconsolidated facts, clusters them into candidate episode
//! segments by temporal and semantic proximity, summarizes each segment
//! through the language capability, resolves temporal contradictions by
//! invalidating superseded episodes in place, and dual-writes the episode
//! into the similarity and relationship indexes under one id.
//!
//! A segment whose summarization fails stays pending; the next sweep picks
//! it up again.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::bus::LifecycleBus;
use crate::config::ConsolidationConfig;
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::Result;
use crate::extract::{LanguageCapability, SegmentSummary};
use crate::memory::types::{
    Episode, EpisodeSource, EventKind, Fact, LifecycleEvent, Participant, Relation,
};
use crate::store::{EpisodeStore, FactFilter, FactStore, TierStore};

/// Outcome of one consolidation run
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolidationReport {
    pub segments: usize,
    pub episodes_written: usize,
    pub invalidated: usize,
    pub linked: usize,
}

/// Clusters significant facts into dual-indexed narrative episodes
pub struct ConsolidationEngine {
    facts: Arc<FactStore>,
    episodes: Arc<EpisodeStore>,
    capability: Arc<dyn LanguageCapability>,
    embedder: Arc<dyn Embedder>,
    bus: Arc<LifecycleBus>,
    config: ConsolidationConfig,
}

impl ConsolidationEngine {
    pub fn new(
        facts: Arc<FactStore>,
        episodes: Arc<EpisodeStore>,
        capability: Arc<dyn LanguageCapability>,
        embedder: Arc<dyn Embedder>,
        bus: Arc<LifecycleBus>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            facts,
            episodes,
            capability,
            embedder,
            bus,
            config,
        }
    }

    /// Group facts into segments by temporal gap and similarity to the
    /// segment centroid. Facts arrive sorted by creation time.
    fn cluster(&self, facts: Vec<Fact>) -> Result<Vec<Vec<Fact>>> {
        let gap = Duration::minutes(self.config.cluster_gap_minutes as i64);
        let mut segments: Vec<Vec<Fact>> = Vec::new();
        let mut centroid: Vec<f32> = Vec::new();

        for fact in facts {
            let embedding = self.embedder.embed(&fact.content)?;
            let joins_current = match segments.last() {
                Some(segment) => {
                    let last = segment.last().expect("segments are never empty");
                    let close_in_time = fact.created_at - last.created_at <= gap;
                    let close_in_meaning =
                        cosine_similarity(&embedding, &centroid) >= self.config.similarity_threshold;
                    close_in_time && close_in_meaning
                }
                None => false,
            };

            if joins_current {
                let segment = segments.last_mut().expect("checked above");
                let n = segment.len() as f32;
                for (c, e) in centroid.iter_mut().zip(embedding.iter()) {
                    *c = (*c * n + e) / (n + 1.0);
                }
                segment.push(fact);
            } else {
                centroid = embedding;
                segments.push(vec![fact]);
            }
        }
        Ok(segments)
    }

    fn build_episode(&self, scope: &str, segment: &[Fact], summary: SegmentSummary) -> Result<Episode> {
        let earliest = segment
            .iter()
            .map(|f| f.created_at)
            .min()
            .unwrap_or_else(Utc::now);
        let observed_at = Utc::now();

        let relations = summary
            .relations
            .into_iter()
            .map(|draft| {
                Relation::new(
                    draft.predicate,
                    draft
                        .participants
                        .into_iter()
                        .map(|p| Participant::new(p.role, p.entity))
                        .collect(),
                )
            })
            .collect();

        Ok(Episode {
            episode_id: uuid::Uuid::new_v4(),
            session_id: scope.to_string(),
            summary: summary.summary.clone(),
            entities: summary.entities,
            relations,
            embedding: self.embedder.embed(&summary.summary)?,
            valid_from: summary.valid_from.unwrap_or(earliest),
            valid_to: summary.valid_to,
            observed_at,
            source_type: EpisodeSource::Conversation,
            source_fact_ids: segment.iter().map(|f| f.fact_id).collect(),
            mined: false,
        })
    }

    /// Invalidate currently valid episodes contradicted by the new one:
    /// same relation identity, overlapping validity. The old record's
    /// `valid_to` becomes the new episode's `observed_at`.
    async fn resolve_contradictions(&self, scope: &str, episode: &Episode) -> Result<usize> {
        let mut invalidated = 0;
        for relation in &episode.relations {
            let existing = self
                .episodes
                .current_for_identity(scope, &relation.identity_key())
                .await?;
            for old in existing {
                if old.episode_id == episode.episode_id {
                    continue;
                }
                if old.valid_from <= episode.observed_at {
                    debug!(
                        "Invalidating episode {} superseded on {}",
                        old.episode_id,
                        relation.identity_key()
                    );
                    self.episodes
                        .invalidate(scope, old.episode_id, episode.observed_at)
                        .await?;
                    invalidated += 1;
                }
            }
        }
        Ok(invalidated)
    }

    /// Link the new episode to its nearest prior episodes in the graph
    async fn look_back_link(&self, episode: &Episode) -> Result<usize> {
        if self.config.lookback_k == 0 {
            return Ok(0);
        }

        let mut linked = 0;
        // Fetch one extra: the episode itself is already indexed.
        let nearest = self
            .episodes
            .similarity()
            .search(&episode.embedding, self.config.lookback_k + 1);
        for (other, score) in nearest {
            if other == episode.episode_id || score < self.config.similarity_threshold {
                continue;
            }
            self.episodes
                .graph()
                .link_episodes(episode.episode_id, other, "relates_to")?;
            linked += 1;
        }
        Ok(linked)
    }

    /// Consolidate all pending facts for a scope
    pub async fn run_once(&self, scope: &str) -> Result<ConsolidationReport> {
        let filter = FactFilter {
            unconsolidated_only: true,
            ..FactFilter::default()
        };
        let pending = self.facts.query(scope, &filter).await?;
        if pending.is_empty() {
            return Ok(ConsolidationReport::default());
        }

        let segments = self.cluster(pending)?;
        let mut report = ConsolidationReport {
            segments: segments.len(),
            ..ConsolidationReport::default()
        };

        for segment in segments {
            let text = segment
                .iter()
                .map(|f| f.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            let summary = match self.capability.summarize_segment(&text).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!("Summarization failed, segment stays pending: {e}");
                    continue;
                }
            };

            let episode = self.build_episode(scope, &segment, summary)?;
            let episode_id = episode.episode_id;

            // Resolution first, so the new episode is the single current
            // record for each of its relations the moment it lands.
            report.invalidated += self.resolve_contradictions(scope, &episode).await?;
            self.episodes.store(episode.clone()).await?;
            report.linked += self.look_back_link(&episode).await?;

            let fact_ids: Vec<_> = segment.iter().map(|f| f.fact_id).collect();
            self.facts.mark_consolidated(scope, &fact_ids).await?;

            self.bus.publish(LifecycleEvent::new(
                EventKind::EpisodeConsolidated,
                scope,
                serde_json::json!({ "episode_id": episode_id }),
            ))?;
            report.episodes_written += 1;
        }

        info!(
            "Scope {scope}: consolidated {} episodes from {} segments ({} invalidated, {} linked)",
            report.episodes_written, report.segments, report.invalidated, report.linked
        );
        Ok(report)
    }
}
