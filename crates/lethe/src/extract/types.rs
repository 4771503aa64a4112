//! Types for the external language capability
//!
//! Structured results returned by extraction, summarization, and synthesis
//! requests, plus the capability-specific error type.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A candidate fact produced by extraction, before scoring
#[derive(Debug, Clone)]
pub struct CandidateFact {
    /// Statement content
    pub content: String,
    /// Extractor's certainty estimate, in [0, 1]
    pub certainty: f64,
    /// Extractor's impact estimate, in [0, 1]
    pub impact: f64,
    /// Entities mentioned in the statement
    pub entities: Vec<String>,
}

impl CandidateFact {
    /// Estimates are carried verbatim; the significance scorer rejects
    /// out-of-range values rather than clamping them silently.
    pub fn new(
        content: impl Into<String>,
        certainty: f64,
        impact: f64,
        entities: Vec<String>,
    ) -> Self {
        Self {
            content: content.into(),
            certainty,
            impact,
            entities,
        }
    }
}

/// A relation draft inside a segment summary
#[derive(Debug, Clone, Deserialize)]
pub struct RelationDraft {
    pub predicate: String,
    #[serde(default)]
    pub participants: Vec<ParticipantDraft>,
}

/// One participant in a relation draft
#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantDraft {
    pub role: String,
    pub entity: String,
}

/// Narrative summary of one episode segment
#[derive(Debug, Clone)]
pub struct SegmentSummary {
    /// Narrative text
    pub summary: String,
    /// Entities mentioned
    pub entities: Vec<String>,
    /// Structured relations asserted by the segment
    pub relations: Vec<RelationDraft>,
    /// When the summarized state began holding, if stated
    pub valid_from: Option<DateTime<Utc>>,
    /// When it stopped holding, if stated
    pub valid_to: Option<DateTime<Utc>>,
}

/// A generalized rule produced by synthesis
#[derive(Debug, Clone)]
pub struct RuleDraft {
    /// The rule statement
    pub rule_text: String,
    /// Where the rule applies; synthesis must never return an empty scope
    pub scope: String,
    /// Known exceptions
    pub exceptions: Vec<String>,
    /// Confidence in the rule, in [0, 1]
    pub confidence: f64,
}

/// Capability-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Capability unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for capability operations
pub type Result<T> = std::result::Result<T, CapabilityError>;

impl From<CapabilityError> for crate::error::LetheError {
    fn from(e: CapabilityError) -> Self {
        crate::error::LetheError::Capability(e.to_string())
    }
}
