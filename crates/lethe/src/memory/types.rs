//! Record types for the four memory tiers
//!
//! Defines the typed records owned by each tier (Turn, Fact, Episode,
//! KnowledgeDocument) plus the lifecycle event envelope. Every tier store
//! returns these records fully validated; untyped maps never cross a tier
//! boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a conversation participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// User message
    User,
    /// Assistant message
    Assistant,
    /// System message
    System,
}

impl Role {
    /// Convert role to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A single raw interaction turn, owned by the ephemeral active-context tier.
///
/// Turns are immutable once recorded and expire after the configured
/// retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique identifier for this turn
    pub turn_id: Uuid,
    /// Session (scope) this turn belongs to
    pub session_id: String,
    /// Who produced the turn
    pub role: Role,
    /// Message content
    pub content: String,
    /// When the turn was recorded
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a new turn with current timestamp
    pub fn new(session_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A significant fact, owned by the filtered working-memory tier.
///
/// `significance` is always derived from certainty, impact, age, and
/// access_count; it is never hand-set. `access_count` only increases until
/// the fact is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    /// Unique identifier for this fact
    pub fact_id: Uuid,
    /// Session (scope) this fact belongs to
    pub session_id: String,
    /// Statement content
    pub content: String,
    /// How certain the extractor was that this is true, in [0, 1]
    pub certainty: f64,
    /// How much this matters to future behavior, in [0, 1]
    pub impact: f64,
    /// When the fact was promoted
    pub created_at: DateTime<Utc>,
    /// When the fact was last retrieved
    pub last_accessed_at: DateTime<Utc>,
    /// How many times the fact has been retrieved
    pub access_count: u32,
    /// Turns this fact was extracted from
    pub source_turn_ids: Vec<Uuid>,
    /// Derived significance score at the last scoring pass
    pub significance: f64,
    /// Set when the score first dipped below the retention floor; cleared
    /// when it recovers. Facts below the floor past the grace window are
    /// deleted by the reconciliation sweep.
    pub below_floor_since: Option<DateTime<Utc>>,
    /// Whether a consolidated episode already covers this fact
    pub consolidated: bool,
}

impl Fact {
    /// Create a new fact with zero accesses
    pub fn new(
        session_id: impl Into<String>,
        content: impl Into<String>,
        certainty: f64,
        impact: f64,
        source_turn_ids: Vec<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            fact_id: Uuid::new_v4(),
            session_id: session_id.into(),
            content: content.into(),
            certainty,
            impact,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            source_turn_ids,
            significance: 0.0,
            below_floor_since: None,
            consolidated: false,
        }
    }

    /// Mark this fact as accessed, updating access count and timestamp
    pub fn reinforce(&mut self) {
        self.access_count += 1;
        self.last_accessed_at = Utc::now();
    }
}

/// One participant in a relation, with its role in the event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Role label (e.g., "buyer", "seller", "subject")
    pub role: String,
    /// Entity name
    pub entity: String,
}

impl Participant {
    pub fn new(role: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            entity: entity.into(),
        }
    }
}

/// A relation node. Multi-party events are modeled as one relation node with
/// an edge per participant rather than pairwise links, so an N-ary event is
/// representable in a binary-edge graph without loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    /// Unique identifier for this relation node
    pub relation_id: Uuid,
    /// Predicate name (e.g., "works_at", "purchased")
    pub predicate: String,
    /// Participants with role labels; two or more for real events
    pub participants: Vec<Participant>,
}

impl Relation {
    pub fn new(predicate: impl Into<String>, participants: Vec<Participant>) -> Self {
        Self {
            relation_id: Uuid::new_v4(),
            predicate: predicate.into(),
            participants,
        }
    }

    /// Stable identity key for contradiction detection: same predicate over
    /// the same participant set (order-insensitive) is the same relation.
    pub fn identity_key(&self) -> String {
        let mut parts: Vec<String> = self
            .participants
            .iter()
            .map(|p| format!("{}={}", p.role, p.entity))
            .collect();
        parts.sort();
        format!("{}({})", self.predicate, parts.join(","))
    }
}

/// Where an episode's underlying observations came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeSource {
    /// Consolidated from conversation-derived facts
    Conversation,
    /// Direct observation by the agent
    Observation,
    /// Imported from an external system
    Import,
}

/// A narrative episode, owned by the episodic tier. Bi-temporal:
/// `valid_from`/`valid_to` model when the underlying facts held in the
/// world, `observed_at` models when the system learned them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Shared identifier across the similarity and relation indexes
    pub episode_id: Uuid,
    /// Session (scope) this episode belongs to
    pub session_id: String,
    /// Narrative summary
    pub summary: String,
    /// Entities mentioned in the episode
    pub entities: Vec<String>,
    /// Structured relations asserted by the episode
    pub relations: Vec<Relation>,
    /// Vector representation of the summary
    pub embedding: Vec<f32>,
    /// Start of real-world validity
    pub valid_from: DateTime<Utc>,
    /// End of real-world validity; `None` while the episode is current
    pub valid_to: Option<DateTime<Utc>>,
    /// When the system learned this
    pub observed_at: DateTime<Utc>,
    /// Provenance category
    pub source_type: EpisodeSource,
    /// Facts this episode consolidates
    pub source_fact_ids: Vec<Uuid>,
    /// Whether a distilled knowledge document already covers this episode
    pub mined: bool,
}

impl Episode {
    /// Whether this episode is currently valid
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Close the validity interval. Invalidation never deletes; provenance
    /// is permanent.
    pub fn invalidate(&mut self, at: DateTime<Utc>) {
        self.valid_to = Some(at.max(self.valid_from));
    }
}

/// A generalized knowledge document, owned by the semantic tier.
/// Append-only; superseding documents reference prior ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    /// Unique identifier for this document
    pub doc_id: Uuid,
    /// Session (scope) this document belongs to
    pub session_id: String,
    /// The generalized rule
    pub rule_text: String,
    /// Where the rule applies; never empty (no unscoped universal claims)
    pub scope: String,
    /// Known exceptions to the rule
    pub exceptions: Vec<String>,
    /// Confidence in the rule, in [0, 1]
    pub confidence: f64,
    /// Episodes this rule was distilled from
    pub provenance_episode_ids: Vec<Uuid>,
    /// When the document was archived
    pub created_at: DateTime<Utc>,
    /// Prior document this one supersedes, if any
    pub supersedes: Option<Uuid>,
}

/// Kinds of lifecycle events carried by the event bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Unpromoted turn count crossed the buffer threshold
    BufferThresholdReached,
    /// A fact was written into the working-memory tier
    FactPromoted,
    /// An episode was written into the episodic tier
    EpisodeConsolidated,
    /// A knowledge document was archived
    KnowledgeArchived,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BufferThresholdReached => "buffer-threshold-reached",
            EventKind::FactPromoted => "fact-promoted",
            EventKind::EpisodeConsolidated => "episode-consolidated",
            EventKind::KnowledgeArchived => "knowledge-archived",
        }
    }
}

/// A lifecycle event: a latency optimization, not the source of correctness.
/// The reconciliation sweep recovers anything whose event was lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// What happened
    pub event_type: EventKind,
    /// Scope the event belongs to
    pub scope_id: String,
    /// Event-specific payload
    pub payload: serde_json::Value,
    /// When the event was emitted
    pub emitted_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(event_type: EventKind, scope_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            scope_id: scope_id.into(),
            payload,
            emitted_at: Utc::now(),
        }
    }
}
