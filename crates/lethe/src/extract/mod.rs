//! External language capability: extraction, summarization, synthesis
//!
//! The engines consume language understanding through one abstract trait.
//! Implementations: a remote OpenAI-compatible API, a deterministic
//! rule-based fallback, and a guarded composition of both behind a circuit
//! breaker.

pub mod breaker;
pub mod fallback;
pub mod guard;
pub mod prompts;
pub mod remote;
pub mod types;

use async_trait::async_trait;

pub use breaker::CircuitBreaker;
pub use fallback::RuleBasedExtractor;
pub use guard::GuardedCapability;
pub use remote::RemoteCapability;
pub use types::{
    CandidateFact, CapabilityError, ParticipantDraft, RelationDraft, RuleDraft, SegmentSummary,
};

/// Abstract language capability consumed by the lifecycle engines.
///
/// Every call is expected to respect a timeout internally; callers treat a
/// failure as "no result this run" and rely on idempotent reprocessing.
#[async_trait]
pub trait LanguageCapability: Send + Sync {
    /// Extract candidate facts with certainty/impact estimates from a
    /// formatted conversation context
    async fn extract_facts(&self, conversation: &str) -> types::Result<Vec<CandidateFact>>;

    /// Produce a narrative summary with entities and relations for one
    /// segment of related facts (one statement per line)
    async fn summarize_segment(&self, facts: &str) -> types::Result<SegmentSummary>;

    /// Synthesize a generalized, explicitly scoped rule from recurring
    /// episode summaries (one per line)
    async fn synthesize_rule(&self, episodes: &str) -> types::Result<RuleDraft>;

    /// Whether the capability can currently serve requests
    async fn is_available(&self) -> bool;

    /// Capability name for logging
    fn name(&self) -> &'static str;
}
