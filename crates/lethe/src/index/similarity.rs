//! In-process similarity index over episode embeddings
//!
//! Brute-force cosine scan. The tier-store seam keeps this swappable for an
//! external vector index without touching engine code.

use dashmap::DashMap;
use uuid::Uuid;

use crate::embedding::cosine_similarity;

/// Nearest-neighbor index keyed by episode id
#[derive(Default)]
pub struct SimilarityIndex {
    vectors: DashMap<Uuid, Vec<f32>>,
}

impl SimilarityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the vector for an id
    pub fn insert(&self, id: Uuid, embedding: Vec<f32>) {
        self.vectors.insert(id, embedding);
    }

    /// Remove an id; returns whether it was present
    pub fn remove(&self, id: &Uuid) -> bool {
        self.vectors.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Top-k ids by cosine similarity to the query, best first
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(Uuid, f32)> {
        let mut scored: Vec<(Uuid, f32)> = self
            .vectors
            .iter()
            .map(|entry| (*entry.key(), cosine_similarity(query, entry.value())))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_search_orders_by_similarity() {
        let index = SimilarityIndex::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        index.insert(a, vec![1.0, 0.0, 0.0]);
        index.insert(b, vec![0.9, 0.1, 0.0]);
        index.insert(c, vec![0.0, 0.0, 1.0]);

        let results = index.search(&[1.0, 0.0, 0.0], 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, a);
        assert_eq!(results[1].0, b);
    }

    #[test]
    fn test_search_k_larger_than_index() {
        let index = SimilarityIndex::new();
        index.insert(Uuid::new_v4(), vec![1.0, 0.0]);
        assert_eq!(index.search(&[1.0, 0.0], 10).len(), 1);
    }

    #[test]
    fn test_remove() {
        let index = SimilarityIndex::new();
        let id = Uuid::new_v4();
        index.insert(id, vec![1.0]);
        assert!(index.remove(&id));
        assert!(!index.remove(&id));
        assert!(index.is_empty());
    }

    #[test]
    fn test_insert_replaces() {
        let index = SimilarityIndex::new();
        let id = Uuid::new_v4();
        index.insert(id, vec![1.0, 0.0]);
        index.insert(id, vec![0.0, 1.0]);
        assert_eq!(index.len(), 1);
        let results = index.search(&[0.0, 1.0], 1);
        assert!((results[0].1 - 1.0).abs() < 1e-6);
    }
}
