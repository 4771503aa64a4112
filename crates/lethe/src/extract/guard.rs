//! Guarded capability composition
//!
//! Routes each request through the primary capability unless the circuit
//! breaker refuses it, falling back to the deterministic extractor on
//! failure. Engines only see one capability; degradation is invisible to
//! them beyond lower recall.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::CapabilityConfig;
use crate::extract::breaker::CircuitBreaker;
use crate::extract::types::{CandidateFact, Result, RuleDraft, SegmentSummary};
use crate::extract::LanguageCapability;

/// Primary capability with breaker protection and a fallback
pub struct GuardedCapability {
    primary: Option<Arc<dyn LanguageCapability>>,
    fallback: Arc<dyn LanguageCapability>,
    breaker: CircuitBreaker,
}

impl GuardedCapability {
    pub fn new(
        primary: Option<Arc<dyn LanguageCapability>>,
        fallback: Arc<dyn LanguageCapability>,
        config: &CapabilityConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            breaker: CircuitBreaker::new(
                config.breaker_threshold,
                Duration::from_secs(config.breaker_cooldown_secs),
            ),
        }
    }

    /// Fallback-only composition (no remote capability configured)
    pub fn fallback_only(fallback: Arc<dyn LanguageCapability>) -> Self {
        Self {
            primary: None,
            fallback,
            breaker: CircuitBreaker::new(1, Duration::from_secs(1)),
        }
    }

    /// Whether the breaker is currently suspending the primary
    pub fn breaker_open(&self) -> bool {
        self.breaker.is_open()
    }

    async fn run_guarded<T, Fut, F>(&self, call: F, what: &str) -> Option<Result<T>>
    where
        F: Fn(Arc<dyn LanguageCapability>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let primary = self.primary.as_ref()?;
        if !self.breaker.allow() {
            debug!("Breaker open, skipping primary capability for {what}");
            return None;
        }
        match call(primary.clone()).await {
            Ok(value) => {
                self.breaker.record_success();
                Some(Ok(value))
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!("Primary capability failed for {what}: {e}, using fallback");
                None
            }
        }
    }
}

#[async_trait]
impl LanguageCapability for GuardedCapability {
    async fn extract_facts(&self, conversation: &str) -> Result<Vec<CandidateFact>> {
        if let Some(result) = self
            .run_guarded(|p| async move { p.extract_facts(conversation).await }, "extraction")
            .await
        {
            return result;
        }
        self.fallback.extract_facts(conversation).await
    }

    async fn summarize_segment(&self, facts: &str) -> Result<SegmentSummary> {
        if let Some(result) = self
            .run_guarded(|p| async move { p.summarize_segment(facts).await }, "summarization")
            .await
        {
            return result;
        }
        self.fallback.summarize_segment(facts).await
    }

    async fn synthesize_rule(&self, episodes: &str) -> Result<RuleDraft> {
        if let Some(result) = self
            .run_guarded(|p| async move { p.synthesize_rule(episodes).await }, "synthesis")
            .await
        {
            return result;
        }
        self.fallback.synthesize_rule(episodes).await
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "guarded"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::fallback::RuleBasedExtractor;
    use crate::extract::types::CapabilityError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingCapability {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LanguageCapability for FailingCapability {
        async fn extract_facts(&self, _c: &str) -> Result<Vec<CandidateFact>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CapabilityError::ApiError("down".to_string()))
        }

        async fn summarize_segment(&self, _f: &str) -> Result<SegmentSummary> {
            Err(CapabilityError::ApiError("down".to_string()))
        }

        async fn synthesize_rule(&self, _e: &str) -> Result<RuleDraft> {
            Err(CapabilityError::ApiError("down".to_string()))
        }

        async fn is_available(&self) -> bool {
            false
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn config_with_threshold(threshold: u32) -> CapabilityConfig {
        CapabilityConfig {
            breaker_threshold: threshold,
            breaker_cooldown_secs: 3600,
            ..CapabilityConfig::default()
        }
    }

    #[tokio::test]
    async fn test_falls_back_on_primary_failure() {
        let guarded = GuardedCapability::new(
            Some(Arc::new(FailingCapability {
                calls: AtomicU32::new(0),
            })),
            Arc::new(RuleBasedExtractor::new()),
            &config_with_threshold(5),
        );

        let facts = guarded
            .extract_facts("Alice works at Acme as an engineer.")
            .await
            .unwrap();
        assert_eq!(facts.len(), 1, "fallback should still produce candidates");
    }

    #[tokio::test]
    async fn test_breaker_suspends_primary_after_repeated_failures() {
        let primary = Arc::new(FailingCapability {
            calls: AtomicU32::new(0),
        });
        let guarded = GuardedCapability::new(
            Some(primary.clone()),
            Arc::new(RuleBasedExtractor::new()),
            &config_with_threshold(2),
        );

        for _ in 0..5 {
            let _ = guarded.extract_facts("Alice works at Acme daily.").await;
        }

        // Two failures trip the breaker; subsequent calls skip the primary.
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
        assert!(guarded.breaker_open());
    }

    #[tokio::test]
    async fn test_fallback_only_never_touches_breaker() {
        let guarded = GuardedCapability::fallback_only(Arc::new(RuleBasedExtractor::new()));
        let facts = guarded
            .extract_facts("Carol prefers coffee every morning.")
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert!(!guarded.breaker_open());
    }
}
