//! Test utilities - shared mocks for the lifecycle engines
//!
//! [`MockCapability`] stands in for the external language capability with
//! scripted, deterministic results and optional failure injection, so
//! engine tests run hermetically.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::extract::types::{
    CandidateFact, CapabilityError, ParticipantDraft, RelationDraft, Result, RuleDraft,
    SegmentSummary,
};
use crate::extract::LanguageCapability;

/// Scripted language capability for tests
pub struct MockCapability {
    facts: Vec<CandidateFact>,
    summary: Option<SegmentSummary>,
    rule: Option<RuleDraft>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockCapability {
    /// Return these `(content, certainty, impact)` candidates on extraction
    pub fn with_facts(facts: Vec<(&str, f64, f64)>) -> Self {
        Self::with_raw_facts(
            facts
                .into_iter()
                .map(|(content, certainty, impact)| CandidateFact {
                    content: content.to_string(),
                    certainty,
                    impact,
                    entities: vec![],
                })
                .collect(),
        )
    }

    /// Return these exact candidates, estimates unclamped
    pub fn with_raw_facts(facts: Vec<CandidateFact>) -> Self {
        Self {
            facts,
            summary: None,
            rule: None,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Return this summary for every segment
    pub fn with_summary(
        summary: &str,
        entities: Vec<&str>,
        relations: Vec<(&str, Vec<(&str, &str)>)>,
    ) -> Self {
        Self {
            facts: Vec::new(),
            summary: Some(SegmentSummary {
                summary: summary.to_string(),
                entities: entities.into_iter().map(String::from).collect(),
                relations: relations
                    .into_iter()
                    .map(|(predicate, participants)| RelationDraft {
                        predicate: predicate.to_string(),
                        participants: participants
                            .into_iter()
                            .map(|(role, entity)| ParticipantDraft {
                                role: role.to_string(),
                                entity: entity.to_string(),
                            })
                            .collect(),
                    })
                    .collect(),
                valid_from: None,
                valid_to: None,
            }),
            rule: None,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Return this rule for every synthesis request
    pub fn with_rule(rule_text: &str, scope: &str) -> Self {
        Self {
            facts: Vec::new(),
            summary: None,
            rule: Some(RuleDraft {
                rule_text: rule_text.to_string(),
                scope: scope.to_string(),
                exceptions: vec![],
                confidence: 0.8,
            }),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every request
    pub fn failing() -> Self {
        Self {
            facts: Vec::new(),
            summary: None,
            rule: None,
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// How many requests this mock has served
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(CapabilityError::ApiError("mock capability down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LanguageCapability for MockCapability {
    async fn extract_facts(&self, _conversation: &str) -> Result<Vec<CandidateFact>> {
        self.check()?;
        Ok(self.facts.clone())
    }

    async fn summarize_segment(&self, facts: &str) -> Result<SegmentSummary> {
        self.check()?;
        match &self.summary {
            Some(summary) => Ok(summary.clone()),
            None => Ok(SegmentSummary {
                summary: facts.lines().next().unwrap_or("segment").to_string(),
                entities: vec![],
                relations: vec![],
                valid_from: None,
                valid_to: None,
            }),
        }
    }

    async fn synthesize_rule(&self, _episodes: &str) -> Result<RuleDraft> {
        self.check()?;
        self.rule.clone().ok_or_else(|| {
            CapabilityError::Unavailable("mock has no scripted rule".to_string())
        })
    }

    async fn is_available(&self) -> bool {
        !self.fail
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_returns_scripted_facts() {
        let mock = MockCapability::with_facts(vec![("Alice works at Acme", 0.9, 0.8)]);
        let facts = mock.extract_facts("ignored").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_mock_fails_everything() {
        let mock = MockCapability::failing();
        assert!(mock.extract_facts("x").await.is_err());
        assert!(mock.summarize_segment("x").await.is_err());
        assert!(mock.synthesize_rule("x").await.is_err());
        assert!(!mock.is_available().await);
    }

    #[tokio::test]
    async fn test_default_summary_uses_first_line() {
        let mock = MockCapability::with_facts(vec![]);
        let summary = mock.summarize_segment("first\nsecond").await.unwrap();
        assert_eq!(summary.summary, "first");
    }
}
