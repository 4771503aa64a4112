//! Semantic tier: distilled knowledge documents
//!
//! Append-only. A document that refines an earlier rule references it via
//! `supersedes` instead of overwriting it, and every document carries
//! provenance back to the episodes it generalizes.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{LetheError, Result};
use crate::index::KeywordIndex;
use crate::keyspace::ScopedKey;
use crate::kv::AtomicStateLayer;
use crate::memory::types::KnowledgeDocument;
use crate::store::TierStore;

/// Query filter for knowledge documents
#[derive(Debug, Clone, Default)]
pub struct KnowledgeFilter {
    /// Keyword search across rule text and scope
    pub keyword: Option<String>,
    /// Minimum confidence
    pub min_confidence: Option<f64>,
}

/// Searchable semantic tier
pub struct KnowledgeStore {
    layer: AtomicStateLayer,
    keywords: Arc<KeywordIndex>,
}

fn doc_key(scope: &str, id: Uuid) -> ScopedKey {
    ScopedKey::new(scope, format!("doc:{id}"))
}

impl KnowledgeStore {
    pub fn new(layer: AtomicStateLayer, keywords: Arc<KeywordIndex>) -> Self {
        Self { layer, keywords }
    }

    /// Whether any existing document generalizes over the same episodes.
    /// Used by the distillation engine to avoid re-archiving a theme.
    pub async fn covers_episodes(&self, scope: &str, episode_ids: &[Uuid]) -> Result<bool> {
        let wanted: HashSet<Uuid> = episode_ids.iter().copied().collect();
        let docs: Vec<KnowledgeDocument> = self.layer.scan_records(scope, "doc:").await?;
        Ok(docs.iter().any(|doc| {
            let have: HashSet<Uuid> = doc.provenance_episode_ids.iter().copied().collect();
            !wanted.is_disjoint(&have) && wanted.is_subset(&have)
        }))
    }
}

#[async_trait]
impl TierStore for KnowledgeStore {
    type Record = KnowledgeDocument;
    type Filter = KnowledgeFilter;

    async fn store(&self, doc: KnowledgeDocument) -> Result<Uuid> {
        if doc.session_id.is_empty() {
            return Err(LetheError::Validation(
                "document session_id must not be empty".to_string(),
            ));
        }
        if doc.rule_text.trim().is_empty() {
            return Err(LetheError::Validation(
                "document rule_text must not be empty".to_string(),
            ));
        }
        // An unscoped universal claim never reaches the semantic tier.
        if doc.scope.trim().is_empty() {
            return Err(LetheError::Validation(
                "document scope must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&doc.confidence) {
            return Err(LetheError::Validation(format!(
                "document confidence out of range: {}",
                doc.confidence
            )));
        }
        if doc.provenance_episode_ids.is_empty() {
            return Err(LetheError::Validation(
                "document must carry provenance episode ids".to_string(),
            ));
        }

        let id = doc.doc_id;
        let key = doc_key(&doc.session_id, id);
        if self.layer.get_record::<KnowledgeDocument>(&key).await?.is_some() {
            return Err(LetheError::Validation(format!(
                "document {id} already archived; the tier is append-only"
            )));
        }

        self.keywords
            .index(id, &format!("{} {}", doc.rule_text, doc.scope))?;
        self.layer.put_record(&key, &doc, None).await?;
        Ok(id)
    }

    async fn retrieve(&self, scope: &str, id: Uuid) -> Result<Option<KnowledgeDocument>> {
        self.layer.get_record(&doc_key(scope, id)).await
    }

    async fn query(&self, scope: &str, filter: &KnowledgeFilter) -> Result<Vec<KnowledgeDocument>> {
        let mut docs: Vec<KnowledgeDocument> = self.layer.scan_records(scope, "doc:").await?;

        if let Some(keyword) = &filter.keyword {
            let hits: HashSet<Uuid> = self.keywords.search(keyword)?.into_iter().collect();
            docs.retain(|d| hits.contains(&d.doc_id));
        }
        if let Some(min) = filter.min_confidence {
            docs.retain(|d| d.confidence >= min);
        }

        docs.sort_by_key(|d| d.created_at);
        Ok(docs)
    }
}
