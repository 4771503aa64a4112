//! Significance scoring for promotion between tiers
//!
//! Implements the certainty-impact-age-recency formula that gates promotion
//! from the ephemeral tier into working memory:
//!
//! `score = (certainty × impact) × exp(-λ × age_days) × (1 + α × access_count)`
//!
//! clamped to `[0, 1]`. Certainty and impact multiply, so either being zero
//! vetoes the score outright. The promotion gate is the threshold predicate
//! and nothing else; additive weighting would break the veto.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{LetheError, Result};
use crate::memory::types::Fact;

/// Tunable scoring parameters. Configuration, never hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScoringParams {
    /// Exponential decay rate per day (default 0.0231 ≈ 30-day half-life)
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    /// Linear reinforcement rate per access (default 0.1)
    #[serde(default = "default_reinforcement_rate")]
    pub reinforcement_rate: f64,
    /// Minimum score for promotion into working memory (default 0.6)
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: f64,
    /// Score below which a fact becomes eligible for deletion (default 0.05)
    #[serde(default = "default_retention_floor")]
    pub retention_floor: f64,
    /// Hours a fact may stay below the floor before deletion (default 72)
    #[serde(default = "default_retention_grace_hours")]
    pub retention_grace_hours: u64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            decay_rate: default_decay_rate(),
            reinforcement_rate: default_reinforcement_rate(),
            promotion_threshold: default_promotion_threshold(),
            retention_floor: default_retention_floor(),
            retention_grace_hours: default_retention_grace_hours(),
        }
    }
}

fn default_decay_rate() -> f64 {
    0.0231
}

fn default_reinforcement_rate() -> f64 {
    0.1
}

fn default_promotion_threshold() -> f64 {
    0.6
}

fn default_retention_floor() -> f64 {
    0.05
}

fn default_retention_grace_hours() -> u64 {
    72
}

impl ScoringParams {
    /// Validate parameter ranges. Called once at engine construction.
    pub fn validate(&self) -> Result<()> {
        if self.decay_rate < 0.0 {
            return Err(LetheError::Validation(format!(
                "decay_rate must be non-negative, got {}",
                self.decay_rate
            )));
        }
        if self.reinforcement_rate < 0.0 {
            return Err(LetheError::Validation(format!(
                "reinforcement_rate must be non-negative, got {}",
                self.reinforcement_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.promotion_threshold) {
            return Err(LetheError::Validation(format!(
                "promotion_threshold must be in [0, 1], got {}",
                self.promotion_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.retention_floor) {
            return Err(LetheError::Validation(format!(
                "retention_floor must be in [0, 1], got {}",
                self.retention_floor
            )));
        }
        Ok(())
    }
}

/// Compute the significance score for a candidate fact.
///
/// Pure function, no I/O. Rejects out-of-range certainty/impact and negative
/// age (future timestamps) with a validation error rather than clamping the
/// inputs silently. Only the final score is clamped to `[0, 1]`.
pub fn significance(
    certainty: f64,
    impact: f64,
    age_days: f64,
    access_count: u32,
    params: &ScoringParams,
) -> Result<f64> {
    if !(0.0..=1.0).contains(&certainty) || !certainty.is_finite() {
        return Err(LetheError::Validation(format!(
            "certainty must be in [0, 1], got {certainty}"
        )));
    }
    if !(0.0..=1.0).contains(&impact) || !impact.is_finite() {
        return Err(LetheError::Validation(format!(
            "impact must be in [0, 1], got {impact}"
        )));
    }
    if age_days < 0.0 || !age_days.is_finite() {
        return Err(LetheError::Validation(format!(
            "age_days must be non-negative, got {age_days}"
        )));
    }

    let base = certainty * impact;
    let decay = (-params.decay_rate * age_days).exp();
    let reinforcement = 1.0 + params.reinforcement_rate * access_count as f64;

    Ok((base * decay * reinforcement).clamp(0.0, 1.0))
}

/// Score a stored fact as of `now`
pub fn score_fact(fact: &Fact, now: DateTime<Utc>, params: &ScoringParams) -> Result<f64> {
    let age_days = (now - fact.created_at).num_milliseconds() as f64 / 86_400_000.0;
    significance(
        fact.certainty,
        fact.impact,
        age_days,
        fact.access_count,
        params,
    )
}

/// The promotion gate. This predicate is the only filter between a scored
/// candidate and the working-memory tier.
pub fn promotes(score: f64, params: &ScoringParams) -> bool {
    score >= params.promotion_threshold
}
