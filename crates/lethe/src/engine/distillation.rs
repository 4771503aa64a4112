//! Distillation engine: Unmined -> Mined -> Synthesized -> Archived
//!
//! Low-priority sweep across episodes. Mines themes (relation predicates
//! and entities) recurring in enough episodes, synthesizes one generalized,
//! explicitly scoped rule per theme through the language capability, and
//! archives it in the semantic tier with provenance back to its source
//! episodes. Themes already covered by an archived document are skipped;
//! failed synthesis leaves the episodes unmined for a later sweep.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::bus::LifecycleBus;
use crate::config::DistillationConfig;
use crate::error::Result;
use crate::extract::LanguageCapability;
use crate::memory::types::{Episode, EventKind, KnowledgeDocument, LifecycleEvent};
use crate::store::{EpisodeFilter, EpisodeStore, KnowledgeFilter, KnowledgeStore, TierStore};

/// Outcome of one distillation run
#[derive(Debug, Clone, Copy, Default)]
pub struct DistillationReport {
    pub themes_mined: usize,
    pub documents_archived: usize,
}

/// Mines recurring patterns across episodes into knowledge documents
pub struct DistillationEngine {
    episodes: Arc<EpisodeStore>,
    knowledge: Arc<KnowledgeStore>,
    capability: Arc<dyn LanguageCapability>,
    bus: Arc<LifecycleBus>,
    config: DistillationConfig,
}

impl DistillationEngine {
    pub fn new(
        episodes: Arc<EpisodeStore>,
        knowledge: Arc<KnowledgeStore>,
        capability: Arc<dyn LanguageCapability>,
        bus: Arc<LifecycleBus>,
        config: DistillationConfig,
    ) -> Self {
        Self {
            episodes,
            knowledge,
            capability,
            bus,
            config,
        }
    }

    /// Theme keys an episode contributes to: one per relation predicate,
    /// one per entity
    fn theme_keys(episode: &Episode) -> Vec<String> {
        let mut keys: Vec<String> = episode
            .relations
            .iter()
            .map(|r| format!("predicate:{}", r.predicate))
            .collect();
        keys.extend(episode.entities.iter().map(|e| format!("entity:{e}")));
        keys.sort();
        keys.dedup();
        keys
    }

    /// Find a prior document over an overlapping episode set, if any, so
    /// the new one can reference what it supersedes.
    async fn find_superseded(&self, scope: &str, provenance: &[uuid::Uuid]) -> Result<Option<uuid::Uuid>> {
        let docs = self.knowledge.query(scope, &KnowledgeFilter::default()).await?;
        Ok(docs
            .iter()
            .rev()
            .find(|doc| {
                doc.provenance_episode_ids
                    .iter()
                    .any(|id| provenance.contains(id))
            })
            .map(|doc| doc.doc_id))
    }

    /// Mine all scopes' episodes once
    pub async fn run_once(&self, scope: &str) -> Result<DistillationReport> {
        let filter = EpisodeFilter {
            unmined_only: true,
            ..EpisodeFilter::default()
        };
        let unmined = self.episodes.query(scope, &filter).await?;
        if unmined.is_empty() {
            return Ok(DistillationReport::default());
        }

        // Support counts include already-mined episodes; a theme keeps
        // recurring even after part of it was archived.
        let all = self.episodes.query(scope, &EpisodeFilter::default()).await?;
        let mut themes: BTreeMap<String, Vec<&Episode>> = BTreeMap::new();
        for episode in &all {
            for key in Self::theme_keys(episode) {
                themes.entry(key).or_default().push(episode);
            }
        }

        let mut report = DistillationReport::default();
        for (theme, group) in themes {
            if group.len() < self.config.min_support {
                continue;
            }
            if !group.iter().any(|e| !e.mined) {
                continue;
            }
            report.themes_mined += 1;

            let provenance: Vec<_> = group.iter().map(|e| e.episode_id).collect();
            if self.knowledge.covers_episodes(scope, &provenance).await? {
                debug!("Theme {theme} already covered, marking episodes mined");
                self.episodes.mark_mined(scope, &provenance).await?;
                continue;
            }

            let text = group
                .iter()
                .map(|e| e.summary.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let draft = match self.capability.synthesize_rule(&text).await {
                Ok(draft) => draft,
                Err(e) => {
                    warn!("Synthesis failed for theme {theme}, episodes stay unmined: {e}");
                    continue;
                }
            };

            let doc = KnowledgeDocument {
                doc_id: uuid::Uuid::new_v4(),
                session_id: scope.to_string(),
                rule_text: draft.rule_text,
                scope: draft.scope,
                exceptions: draft.exceptions,
                confidence: draft.confidence,
                provenance_episode_ids: provenance.clone(),
                created_at: Utc::now(),
                supersedes: self.find_superseded(scope, &provenance).await?,
            };
            let doc_id = self.knowledge.store(doc).await?;
            self.episodes.mark_mined(scope, &provenance).await?;

            self.bus.publish(LifecycleEvent::new(
                EventKind::KnowledgeArchived,
                scope,
                serde_json::json!({ "doc_id": doc_id }),
            ))?;
            report.documents_archived += 1;
        }

        if report.documents_archived > 0 {
            info!(
                "Scope {scope}: archived {} documents from {} recurring themes",
                report.documents_archived, report.themes_mined
            );
        }
        Ok(report)
    }
}
