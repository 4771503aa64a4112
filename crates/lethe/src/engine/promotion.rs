//! Promotion engine: Buffered -> Scored -> {Promoted, Discarded}
//!
//! Consumes batches of unpromoted turns, extracts candidate facts through
//! the language capability, scores each with the significance formula, and
//! writes survivors into working memory. The threshold predicate is the
//! only gate; nothing is added to or blended into the score. Discards are
//! logged, never retried; turns are marked consumed either way, and the
//! digest-keyed fact store makes re-processing idempotent.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::bus::LifecycleBus;
use crate::config::PromotionConfig;
use crate::error::Result;
use crate::extract::LanguageCapability;
use crate::memory::types::{EventKind, Fact, LifecycleEvent, Turn};
use crate::scoring::{promotes, significance, ScoringParams};
use crate::store::{ActiveContextStore, FactStore, TierStore, TurnFilter};

/// Outcome of one promotion run
#[derive(Debug, Clone, Copy, Default)]
pub struct PromotionReport {
    pub turns_processed: usize,
    pub promoted: usize,
    pub discarded: usize,
}

/// Moves raw interaction data from the ephemeral tier into working memory
pub struct PromotionEngine {
    active: Arc<ActiveContextStore>,
    facts: Arc<FactStore>,
    capability: Arc<dyn LanguageCapability>,
    bus: Arc<LifecycleBus>,
    scoring: ScoringParams,
    config: PromotionConfig,
}

/// Format a turn batch as the conversation context the capability consumes
fn format_conversation(turns: &[Turn]) -> String {
    if turns.is_empty() {
        return "<conversation></conversation>".to_string();
    }

    let mut result = String::with_capacity(turns.iter().map(|t| t.content.len() + 32).sum());
    result.push_str("<conversation>\n");
    for turn in turns {
        result.push_str(&format!(
            "<turn role=\"{}\">{}</turn>\n",
            turn.role.as_str(),
            escape_xml(&turn.content)
        ));
    }
    result.push_str("</conversation>");
    result
}

/// Escape special XML characters in content
fn escape_xml(content: &str) -> String {
    content
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl PromotionEngine {
    pub fn new(
        active: Arc<ActiveContextStore>,
        facts: Arc<FactStore>,
        capability: Arc<dyn LanguageCapability>,
        bus: Arc<LifecycleBus>,
        scoring: ScoringParams,
        config: PromotionConfig,
    ) -> Result<Self> {
        scoring.validate()?;
        Ok(Self {
            active,
            facts,
            capability,
            bus,
            scoring,
            config,
        })
    }

    /// Process one batch for a scope. With `force` false, a batch smaller
    /// than `min_batch` stays buffered for a later run; the reconciliation
    /// sweep forces stranded remainders through.
    pub async fn run_once(&self, scope: &str, force: bool) -> Result<PromotionReport> {
        let filter = TurnFilter {
            unpromoted_only: true,
            limit: Some(self.config.max_batch),
        };
        let turns = self.active.query(scope, &filter).await?;

        if turns.is_empty() {
            return Ok(PromotionReport::default());
        }
        if !force && turns.len() < self.config.min_batch {
            debug!(
                "Scope {scope}: {} buffered turns below min batch {}, waiting",
                turns.len(),
                self.config.min_batch
            );
            return Ok(PromotionReport::default());
        }

        let context = format_conversation(&turns);
        let candidates = self.capability.extract_facts(&context).await?;
        let turn_ids: Vec<_> = turns.iter().map(|t| t.turn_id).collect();

        let mut report = PromotionReport {
            turns_processed: turns.len(),
            ..PromotionReport::default()
        };

        for candidate in candidates {
            // Candidates are scored at age zero with no accesses; decay and
            // reinforcement only matter for facts already in the tier.
            let score = match significance(candidate.certainty, candidate.impact, 0.0, 0, &self.scoring)
            {
                Ok(score) => score,
                Err(e) => {
                    warn!("Rejecting candidate with invalid estimates: {e}");
                    report.discarded += 1;
                    continue;
                }
            };

            if !promotes(score, &self.scoring) {
                debug!(
                    "Discarded candidate (score {score:.3} < {}): {}",
                    self.scoring.promotion_threshold, candidate.content
                );
                report.discarded += 1;
                continue;
            }

            let mut fact = Fact::new(
                scope,
                candidate.content,
                candidate.certainty,
                candidate.impact,
                turn_ids.clone(),
            );
            fact.significance = score;
            let fact_id = self.facts.store(fact).await?;

            self.bus.publish(LifecycleEvent::new(
                EventKind::FactPromoted,
                scope,
                serde_json::json!({ "fact_id": fact_id }),
            ))?;
            report.promoted += 1;
        }

        self.active.mark_promoted(scope, &turn_ids).await?;
        info!(
            "Scope {scope}: promoted {} and discarded {} from {} turns",
            report.promoted, report.discarded, report.turns_processed
        );
        Ok(report)
    }
}
