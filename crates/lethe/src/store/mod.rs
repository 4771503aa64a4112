//! Tier store abstraction
//!
//! One behavioral contract implemented once per tier, each bound to its own
//! typed record. Engines consume typed records only; validation happens at
//! the tier boundary, and access-pattern side effects (like reinforcement on
//! fact retrieval) live in exactly one place.

pub mod active;
pub mod episodes;
pub mod facts;
pub mod knowledge;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

pub use active::{ActiveContextStore, TurnFilter};
pub use episodes::{EpisodeFilter, EpisodeStore};
pub use facts::{FactFilter, FactStore, RescoreReport};
pub use knowledge::{KnowledgeFilter, KnowledgeStore};

/// Uniform contract over one memory tier
#[async_trait]
pub trait TierStore: Send + Sync {
    /// The record type this tier owns
    type Record: Send + Sync;
    /// Query filter for this tier
    type Filter: Send + Sync;

    /// Persist a record; returns its id
    async fn store(&self, record: Self::Record) -> Result<Uuid>;

    /// Fetch a record by id within a scope
    async fn retrieve(&self, scope: &str, id: Uuid) -> Result<Option<Self::Record>>;

    /// List records in a scope matching a filter
    async fn query(&self, scope: &str, filter: &Self::Filter) -> Result<Vec<Self::Record>>;
}
