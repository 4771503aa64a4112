//! Inverted keyword index for the semantic tier
//!
//! Lowercased alphanumeric tokens mapped to document ids. Enough for the
//! knowledge store's keyword queries; a full-text engine would sit behind
//! the same seam.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use uuid::Uuid;

use crate::error::{LetheError, Result};

/// Token -> document id index
#[derive(Default)]
pub struct KeywordIndex {
    postings: RwLock<HashMap<String, BTreeSet<Uuid>>>,
}

/// Split text into lowercase alphanumeric tokens
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a document's text under its id
    pub fn index(&self, id: Uuid, text: &str) -> Result<()> {
        let mut postings = self
            .postings
            .write()
            .map_err(|_| LetheError::Storage("keyword index lock poisoned".to_string()))?;
        for token in tokenize(text) {
            postings.entry(token).or_default().insert(id);
        }
        Ok(())
    }

    /// Documents containing every token of the query, in id order
    pub fn search(&self, query: &str) -> Result<Vec<Uuid>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let postings = self
            .postings
            .read()
            .map_err(|_| LetheError::Storage("keyword index lock poisoned".to_string()))?;

        let mut result: Option<BTreeSet<Uuid>> = None;
        for token in tokens {
            let ids = postings.get(&token).cloned().unwrap_or_default();
            result = Some(match result {
                None => ids,
                Some(acc) => acc.intersection(&ids).copied().collect(),
            });
            if result.as_ref().is_some_and(|r| r.is_empty()) {
                break;
            }
        }
        Ok(result.unwrap_or_default().into_iter().collect())
    }
}
