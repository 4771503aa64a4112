//! Reconciliation sweep
//!
//! The correctness backstop behind the event bus: a periodic scan that
//! finds items whose triggering event was dropped or trimmed and forces
//! them through the pipeline. Also owns the housekeeping the tiers need,
//! expired-turn purging, promoted-set pruning, and fact re-scoring with
//! retention-floor deletion.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::config::SweepConfig;
use crate::engine::consolidation::ConsolidationEngine;
use crate::engine::distillation::DistillationEngine;
use crate::engine::promotion::PromotionEngine;
use crate::error::Result;
use crate::kv::KvBackend;
use crate::scoring::ScoringParams;
use crate::store::{
    ActiveContextStore, EpisodeFilter, EpisodeStore, FactFilter, FactStore, TierStore, TurnFilter,
};

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub scopes_swept: usize,
    pub expired_purged: usize,
    pub stranded_promotions: usize,
    pub stranded_consolidations: usize,
    pub stranded_distillations: usize,
    pub facts_rescored: usize,
    pub facts_deleted: usize,
}

/// Periodic fallback scan across every scope
pub struct ReconciliationSweep {
    kv: Arc<dyn KvBackend>,
    active: Arc<ActiveContextStore>,
    facts: Arc<FactStore>,
    episodes: Arc<EpisodeStore>,
    promotion: Arc<PromotionEngine>,
    consolidation: Arc<ConsolidationEngine>,
    distillation: Arc<DistillationEngine>,
    scoring: ScoringParams,
    config: SweepConfig,
}

impl ReconciliationSweep {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kv: Arc<dyn KvBackend>,
        active: Arc<ActiveContextStore>,
        facts: Arc<FactStore>,
        episodes: Arc<EpisodeStore>,
        promotion: Arc<PromotionEngine>,
        consolidation: Arc<ConsolidationEngine>,
        distillation: Arc<DistillationEngine>,
        scoring: ScoringParams,
        config: SweepConfig,
    ) -> Self {
        Self {
            kv,
            active,
            facts,
            episodes,
            promotion,
            consolidation,
            distillation,
            scoring,
            config,
        }
    }

    /// One full reconciliation pass over every known scope
    pub async fn run_once(&self) -> Result<SweepReport> {
        let mut report = SweepReport {
            expired_purged: self.kv.purge_expired().await?,
            ..SweepReport::default()
        };

        let now = Utc::now();
        let stranded_cutoff = now - Duration::seconds(self.config.stranded_after_secs as i64);

        for scope in self.kv.list_scopes().await? {
            report.scopes_swept += 1;
            self.active.prune_promoted(&scope).await?;

            // Turns whose buffer-threshold event was lost: promote anything
            // that has waited past the stranded window, batch size be damned.
            let stranded_turns = self
                .active
                .query(
                    &scope,
                    &TurnFilter {
                        unpromoted_only: true,
                        limit: None,
                    },
                )
                .await?
                .into_iter()
                .any(|t| t.timestamp < stranded_cutoff);
            if stranded_turns {
                debug!("Scope {scope}: stranded turns found, forcing promotion");
                self.promotion.run_once(&scope, true).await?;
                report.stranded_promotions += 1;
            }

            // Scheduled re-scoring and retention-floor deletion.
            let rescore = self.facts.rescore_all(&scope, &self.scoring, now).await?;
            report.facts_rescored += rescore.rescored;
            report.facts_deleted += rescore.deleted;

            // Facts whose promoted event was trimmed before consolidation.
            let stale_facts = self
                .facts
                .query(
                    &scope,
                    &FactFilter {
                        unconsolidated_only: true,
                        created_before: Some(stranded_cutoff),
                        ..FactFilter::default()
                    },
                )
                .await?;
            if !stale_facts.is_empty() {
                debug!("Scope {scope}: {} stale facts, forcing consolidation", stale_facts.len());
                self.consolidation.run_once(&scope).await?;
                report.stranded_consolidations += 1;
            }

            // Episodes that have gone unmined past the stranded window.
            let stale_episodes = self
                .episodes
                .query(
                    &scope,
                    &EpisodeFilter {
                        unmined_only: true,
                        ..EpisodeFilter::default()
                    },
                )
                .await?
                .into_iter()
                .any(|e| e.observed_at < stranded_cutoff);
            if stale_episodes {
                self.distillation.run_once(&scope).await?;
                report.stranded_distillations += 1;
            }
        }

        info!(
            "Sweep: {} scopes, {} expired purged, {} stranded promotions, {} rescored, {} deleted",
            report.scopes_swept,
            report.expired_purged,
            report.stranded_promotions,
            report.facts_rescored,
            report.facts_deleted
        );
        Ok(report)
    }
}
