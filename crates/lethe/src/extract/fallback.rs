//! Deterministic rule-based fallback extractor
//!
//! No external dependency, lower recall. Used when the remote capability
//! fails or the circuit breaker is open, so promotion keeps draining the
//! buffer instead of blocking on a failing dependency.

use async_trait::async_trait;
use tracing::debug;

use crate::extract::types::{CandidateFact, CapabilityError, Result, RuleDraft, SegmentSummary};
use crate::extract::LanguageCapability;

/// Verb phrases that mark a sentence as a durable statement
const SIGNAL_WORDS: &[&str] = &[
    "prefer", "prefers", "is", "are", "was", "works", "work", "uses", "use", "lives", "decided",
    "needs", "need", "always", "never", "wants", "want", "owns", "likes", "dislikes",
];

/// Hedging words that lower certainty
const HEDGE_WORDS: &[&str] = &["maybe", "perhaps", "might", "probably", "possibly", "guess"];

/// Minimum characters for a sentence to be considered
const MIN_SENTENCE_LENGTH: usize = 20;

/// Heuristic extractor over raw conversation text
#[derive(Debug, Clone, Default)]
pub struct RuleBasedExtractor;

impl RuleBasedExtractor {
    pub fn new() -> Self {
        Self
    }
}

/// Remove turn markup so heuristics see plain sentences
fn strip_markup(conversation: &str) -> String {
    let mut out = String::with_capacity(conversation.len());
    let mut in_tag = false;
    for c in conversation.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Capitalized tokens that are not sentence-initial, as entity candidates
fn capitalized_entities(sentence: &str) -> Vec<String> {
    let mut entities = Vec::new();
    for (i, token) in sentence.split_whitespace().enumerate() {
        let cleaned: String = token.chars().filter(|c| c.is_alphanumeric()).collect();
        if i == 0 || cleaned.len() < 2 {
            continue;
        }
        if cleaned.chars().next().is_some_and(|c| c.is_uppercase())
            && !entities.contains(&cleaned)
        {
            entities.push(cleaned);
        }
    }
    entities
}

fn split_sentences(text: &str) -> Vec<String> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
impl LanguageCapability for RuleBasedExtractor {
    async fn extract_facts(&self, conversation: &str) -> Result<Vec<CandidateFact>> {
        let text = strip_markup(conversation);
        let mut facts = Vec::new();

        for sentence in split_sentences(&text) {
            if sentence.len() < MIN_SENTENCE_LENGTH {
                continue;
            }
            let lower = sentence.to_lowercase();
            let has_signal = SIGNAL_WORDS
                .iter()
                .any(|w| lower.split_whitespace().any(|t| t == *w));
            if !has_signal {
                continue;
            }

            let hedged = HEDGE_WORDS.iter().any(|w| lower.contains(w));
            let certainty = if hedged { 0.45 } else { 0.7 };

            let entities = capitalized_entities(&sentence);
            let impact = (0.4 + 0.1 * entities.len() as f64).min(0.8);

            facts.push(CandidateFact::new(sentence, certainty, impact, entities));
        }

        debug!("Rule-based extractor produced {} candidates", facts.len());
        Ok(facts)
    }

    async fn summarize_segment(&self, facts: &str) -> Result<SegmentSummary> {
        // Degraded mode: join the statements, no structured relations.
        let lines: Vec<&str> = facts.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if lines.is_empty() {
            return Err(CapabilityError::ParseError("empty segment".to_string()));
        }

        let mut entities = Vec::new();
        for line in &lines {
            for entity in capitalized_entities(line) {
                if !entities.contains(&entity) {
                    entities.push(entity);
                }
            }
        }

        Ok(SegmentSummary {
            summary: lines.join("; "),
            entities,
            relations: Vec::new(),
            valid_from: None,
            valid_to: None,
        })
    }

    async fn synthesize_rule(&self, _episodes: &str) -> Result<RuleDraft> {
        // Generalization without a language model would produce unscoped
        // noise; leave episodes unmined for a later sweep instead.
        Err(CapabilityError::Unavailable(
            "rule synthesis requires the remote capability".to_string(),
        ))
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "rule-based"
    }
}
