//! Record types shared across tiers and engines

pub mod types;

pub use types::{
    Episode, EpisodeSource, EventKind, Fact, KnowledgeDocument, LifecycleEvent, Participant,
    Relation, Role, Turn,
};
