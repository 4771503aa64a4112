//! Vector representations for episode summaries
//!
//! The default embedder is deterministic and dependency-free, which keeps
//! the engine hermetic; the `embed-fastembed` feature switches in real model
//! embeddings with the same dimensionality.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::Result;

/// Embedding dimensionality shared by all implementations
pub const EMBEDDING_DIMENSION: usize = 384;

/// Produces a fixed-dimension vector for a piece of text
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic hash-seeded embedder. Identical inputs produce identical
/// vectors; token overlap produces correlated vectors, which is enough for
/// clustering and nearest-neighbor ordering in tests and offline use.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn new() -> Self {
        Self
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; EMBEDDING_DIMENSION];

        // Accumulate one pseudo-random unit contribution per token so that
        // texts sharing tokens land near each other.
        let mut tokens = 0usize;
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            tokens += 1;
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let seed = hasher.finish();
            for (i, slot) in vector.iter_mut().enumerate() {
                let x = seed
                    .wrapping_mul(i as u64 + 1)
                    .wrapping_add(0x9e3779b97f4a7c15);
                *slot += ((x as f32) / (u64::MAX as f32)) * 2.0 - 1.0;
            }
        }

        if tokens > 0 {
            let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                for v in &mut vector {
                    *v /= norm;
                }
            }
        }
        Ok(vector)
    }
}

/// Real model embeddings via fastembed
#[cfg(feature = "embed-fastembed")]
pub struct FastEmbedder {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
}

#[cfg(feature = "embed-fastembed")]
impl FastEmbedder {
    pub fn new() -> Result<Self> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
        let model = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::MultilingualE5Small))
            .map_err(|e| crate::error::LetheError::General(e.to_string()))?;
        Ok(Self {
            model: std::sync::Mutex::new(model),
        })
    }
}

#[cfg(feature = "embed-fastembed")]
impl Embedder for FastEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| crate::error::LetheError::General("embedder lock poisoned".to_string()))?;
        let embeddings = model
            .embed(vec![text.to_string()], None)
            .map_err(|e| crate::error::LetheError::General(e.to_string()))?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| crate::error::LetheError::General("no embedding returned".to_string()))
    }
}

/// Cosine similarity between two vectors; 0.0 when either has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
