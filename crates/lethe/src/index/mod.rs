//! Secondary indexes over the episodic and semantic tiers

pub mod graph;
pub mod keyword;
pub mod similarity;

pub use graph::RelationGraph;
pub use keyword::KeywordIndex;
pub use similarity::SimilarityIndex;
