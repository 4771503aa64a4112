//! Working-memory tier: significant facts
//!
//! The only tier multiple writers mutate concurrently, so every mutation
//! goes through the merge-transaction layer; direct read-then-write from
//! engine code is prohibited. Retrieval reinforces the fact (access count
//! and recency) atomically before returning it.
//!
//! Facts are deduplicated by a digest of their normalized content, which
//! makes promotion idempotent: re-promoting an already-promoted batch
//! upserts onto the same entries instead of duplicating them.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LetheError, Result};
use crate::keyspace::ScopedKey;
use crate::kv::AtomicStateLayer;
use crate::memory::types::Fact;
use crate::scoring::{score_fact, ScoringParams};
use crate::store::TierStore;

/// Query filter for facts
#[derive(Debug, Clone, Default)]
pub struct FactFilter {
    /// Only facts no episode has consolidated yet
    pub unconsolidated_only: bool,
    /// Minimum stored significance
    pub min_significance: Option<f64>,
    /// Only facts created before this instant
    pub created_before: Option<DateTime<Utc>>,
}

/// Outcome of a re-scoring pass over one scope
#[derive(Debug, Clone, Copy, Default)]
pub struct RescoreReport {
    pub rescored: usize,
    pub deleted: usize,
}

/// Filtered significant-fact tier
pub struct FactStore {
    layer: AtomicStateLayer,
}

fn fact_key(scope: &str, id: Uuid) -> ScopedKey {
    ScopedKey::new(scope, format!("fact:{id}"))
}

fn digests_key(scope: &str) -> ScopedKey {
    ScopedKey::new(scope, "facts:digests")
}

/// Digest of a fact's identity: scope plus normalized content
pub fn content_digest(scope: &str, content: &str) -> String {
    let normalized = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = DefaultHasher::new();
    scope.hash(&mut hasher);
    normalized.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

impl FactStore {
    pub fn new(layer: AtomicStateLayer) -> Self {
        Self { layer }
    }

    fn validate(fact: &Fact) -> Result<()> {
        if fact.session_id.is_empty() {
            return Err(LetheError::Validation(
                "fact session_id must not be empty".to_string(),
            ));
        }
        if fact.content.trim().is_empty() {
            return Err(LetheError::Validation(
                "fact content must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&fact.certainty) || !(0.0..=1.0).contains(&fact.impact) {
            return Err(LetheError::Validation(format!(
                "fact certainty/impact out of range: {}/{}",
                fact.certainty, fact.impact
            )));
        }
        Ok(())
    }

    /// Mark facts as covered by a consolidated episode
    pub async fn mark_consolidated(&self, scope: &str, ids: &[Uuid]) -> Result<()> {
        for id in ids {
            self.layer
                .update_record(&fact_key(scope, *id), |mut fact: Fact| {
                    fact.consolidated = true;
                    fact
                })
                .await?;
        }
        Ok(())
    }

    /// Delete a fact and release its digest claim
    pub async fn delete(&self, scope: &str, fact: &Fact) -> Result<bool> {
        let digest = content_digest(scope, &fact.content);
        self.layer
            .merge_record(&digests_key(scope), move |current: Option<HashMap<String, Uuid>>| {
                let mut map = current.unwrap_or_default();
                map.remove(&digest);
                map
            })
            .await?;
        self.layer.delete(&fact_key(scope, fact.fact_id)).await
    }

    /// Re-score every fact in a scope and delete those below the retention
    /// floor for longer than the grace window. Significance is always
    /// derived here, never hand-set.
    pub async fn rescore_all(
        &self,
        scope: &str,
        params: &ScoringParams,
        now: DateTime<Utc>,
    ) -> Result<RescoreReport> {
        let grace = Duration::hours(params.retention_grace_hours as i64);
        let mut report = RescoreReport::default();
        let facts: Vec<Fact> = self.layer.scan_records(scope, "fact:").await?;

        for fact in facts {
            let score = match score_fact(&fact, now, params) {
                Ok(score) => score,
                Err(e) => {
                    warn!("Skipping re-score of fact {}: {e}", fact.fact_id);
                    continue;
                }
            };

            let floor = params.retention_floor;
            let updated = self
                .layer
                .update_record(&fact_key(scope, fact.fact_id), move |mut fact: Fact| {
                    fact.significance = score;
                    fact.below_floor_since = if score < floor {
                        fact.below_floor_since.or(Some(now))
                    } else {
                        None
                    };
                    fact
                })
                .await?;
            report.rescored += 1;

            if let Some(updated) = updated {
                if let Some(since) = updated.below_floor_since {
                    if now - since >= grace {
                        debug!(
                            "Deleting fact {} after {}h below retention floor",
                            updated.fact_id,
                            (now - since).num_hours()
                        );
                        self.delete(scope, &updated).await?;
                        report.deleted += 1;
                        report.rescored -= 1;
                    }
                }
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl TierStore for FactStore {
    type Record = Fact;
    type Filter = FactFilter;

    /// Upsert by content digest. The digest claim is a merge transaction,
    /// so two concurrent writers with the same content converge on one fact.
    async fn store(&self, mut fact: Fact) -> Result<Uuid> {
        Self::validate(&fact)?;

        let scope = fact.session_id.clone();
        let digest = content_digest(&scope, &fact.content);
        let proposed_id = fact.fact_id;

        let claims = {
            let digest = digest.clone();
            self.layer
                .merge_record(
                    &digests_key(&scope),
                    move |current: Option<HashMap<String, Uuid>>| {
                        let mut map = current.unwrap_or_default();
                        map.entry(digest.clone()).or_insert(proposed_id);
                        map
                    },
                )
                .await?
        };

        let owner_id = claims.get(&digest).copied().unwrap_or(proposed_id);
        if owner_id != proposed_id {
            debug!("Fact digest already claimed by {owner_id}, skipping duplicate");
            return Ok(owner_id);
        }

        fact.fact_id = owner_id;
        let stored = self
            .layer
            .merge_record(&fact_key(&scope, owner_id), move |current: Option<Fact>| {
                match current {
                    // Keep provenance and the monotonic access counter on
                    // re-promotion of identical content.
                    Some(existing) => existing,
                    None => fact.clone(),
                }
            })
            .await?;
        Ok(stored.fact_id)
    }

    /// Retrieval is the reinforcement mechanism: access_count and
    /// last_accessed_at are bumped in the same merge transaction that reads
    /// the record.
    async fn retrieve(&self, scope: &str, id: Uuid) -> Result<Option<Fact>> {
        self.layer
            .update_record(&fact_key(scope, id), |mut fact: Fact| {
                fact.reinforce();
                fact
            })
            .await
    }

    async fn query(&self, scope: &str, filter: &FactFilter) -> Result<Vec<Fact>> {
        let mut facts: Vec<Fact> = self.layer.scan_records(scope, "fact:").await?;

        if filter.unconsolidated_only {
            facts.retain(|f| !f.consolidated);
        }
        if let Some(min) = filter.min_significance {
            facts.retain(|f| f.significance >= min);
        }
        if let Some(before) = filter.created_before {
            facts.retain(|f| f.created_at < before);
        }

        facts.sort_by_key(|f| f.created_at);
        Ok(facts)
    }
}
