//! Remote capability over OpenAI-compatible chat APIs
//!
//! Configurable endpoint, model, and API key (via environment variable).
//! Retries with exponential backoff on rate limiting; every request carries
//! the configured timeout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CapabilityConfig;
use crate::extract::prompts::{EXTRACTION_PROMPT, SUMMARIZATION_PROMPT, SYNTHESIS_PROMPT};
use crate::extract::types::{
    CandidateFact, CapabilityError, RelationDraft, Result, RuleDraft, SegmentSummary,
};
use crate::extract::LanguageCapability;

/// Remote language capability over HTTP
#[derive(Debug)]
pub struct RemoteCapability {
    client: Client,
    config: CapabilityConfig,
    api_key: String,
}

/// OpenAI-compatible chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// JSON representation of an extracted fact
#[derive(Debug, Deserialize)]
struct ExtractedFactJson {
    content: String,
    certainty: f64,
    impact: f64,
    #[serde(default)]
    entities: Vec<String>,
}

/// JSON representation of a segment summary
#[derive(Debug, Deserialize)]
struct SegmentSummaryJson {
    summary: String,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    relations: Vec<RelationDraft>,
    #[serde(default)]
    valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    valid_to: Option<DateTime<Utc>>,
}

/// JSON representation of a synthesized rule
#[derive(Debug, Deserialize)]
struct RuleDraftJson {
    rule_text: String,
    scope: String,
    #[serde(default)]
    exceptions: Vec<String>,
    confidence: f64,
}

impl RemoteCapability {
    /// Create a remote capability from configuration.
    ///
    /// Reads the API key from the environment variable named in
    /// `config.api_key_env`; validates the endpoint URL.
    pub fn new(config: &CapabilityConfig) -> Result<Self> {
        if config.api_url.is_empty() {
            return Err(CapabilityError::ConfigError(
                "capability api_url is not configured".to_string(),
            ));
        }
        url::Url::parse(&config.api_url)
            .map_err(|e| CapabilityError::ConfigError(format!("invalid api_url: {e}")))?;

        let api_key = env::var(&config.api_key_env).map_err(|_| {
            CapabilityError::ConfigError(format!("API key env var '{}' not set", config.api_key_env))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CapabilityError::ApiError(e.to_string()))?;

        info!(
            "RemoteCapability initialized with model: {}, api_url: {}",
            config.model, config.api_url
        );

        Ok(Self {
            client,
            config: config.clone(),
            api_key,
        })
    }

    /// Call the chat endpoint with exponential backoff on 429.
    ///
    /// Up to 3 attempts with delays of 1s and 2s between them.
    async fn call_api(&self, prompt: &str) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: "You are a precise information extraction engine.".to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.2,
            max_tokens: 1024,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.api_url.trim_end_matches('/')
        );
        debug!("Calling capability API at: {}", url);

        let mut last_error = None;
        let mut delay = Duration::from_secs(1);
        const MAX_RETRIES: u32 = 3;

        for attempt in 0..MAX_RETRIES {
            match self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status == 429 {
                        warn!(
                            "Rate limited on attempt {}/{}, waiting {:?}",
                            attempt + 1,
                            MAX_RETRIES,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        continue;
                    }

                    if !status.is_success() {
                        let error_text = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unknown error".to_string());
                        return Err(CapabilityError::ApiError(format!(
                            "API returned {status}: {error_text}"
                        )));
                    }

                    let completion: ChatCompletionResponse = response
                        .json()
                        .await
                        .map_err(|e| CapabilityError::ParseError(e.to_string()))?;

                    return completion
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or_else(|| CapabilityError::ApiError("Empty response".to_string()));
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    last_error = Some(err_msg.clone());
                    if attempt < MAX_RETRIES - 1 {
                        warn!(
                            "Request failed on attempt {}/{}, retrying: {}",
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(CapabilityError::ApiError(format!(
            "Failed after {} retries: {}",
            MAX_RETRIES,
            last_error.unwrap_or_else(|| "Unknown error".to_string())
        )))
    }
}

/// Strip markdown code fences some models wrap JSON responses in
fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

#[async_trait]
impl LanguageCapability for RemoteCapability {
    async fn extract_facts(&self, conversation: &str) -> Result<Vec<CandidateFact>> {
        let prompt = EXTRACTION_PROMPT.replace("{conversation}", conversation);
        let response = self.call_api(&prompt).await?;
        debug!("Extraction response: {}", response);

        let extracted: Vec<ExtractedFactJson> =
            serde_json::from_str(strip_code_fences(&response)).map_err(|e| {
                CapabilityError::ParseError(format!("Failed to parse extraction JSON: {e}"))
            })?;

        Ok(extracted
            .into_iter()
            .map(|f| CandidateFact::new(f.content, f.certainty, f.impact, f.entities))
            .collect())
    }

    async fn summarize_segment(&self, facts: &str) -> Result<SegmentSummary> {
        let prompt = SUMMARIZATION_PROMPT.replace("{facts}", facts);
        let response = self.call_api(&prompt).await?;
        debug!("Summarization response: {}", response);

        let parsed: SegmentSummaryJson = serde_json::from_str(strip_code_fences(&response))
            .map_err(|e| {
                CapabilityError::ParseError(format!("Failed to parse summary JSON: {e}"))
            })?;

        Ok(SegmentSummary {
            summary: parsed.summary,
            entities: parsed.entities,
            relations: parsed.relations,
            valid_from: parsed.valid_from,
            valid_to: parsed.valid_to,
        })
    }

    async fn synthesize_rule(&self, episodes: &str) -> Result<RuleDraft> {
        let prompt = SYNTHESIS_PROMPT.replace("{episodes}", episodes);
        let response = self.call_api(&prompt).await?;
        debug!("Synthesis response: {}", response);

        let parsed: RuleDraftJson = serde_json::from_str(strip_code_fences(&response))
            .map_err(|e| CapabilityError::ParseError(format!("Failed to parse rule JSON: {e}")))?;

        if parsed.scope.trim().is_empty() {
            return Err(CapabilityError::ParseError(
                "synthesis returned an unscoped rule".to_string(),
            ));
        }

        Ok(RuleDraft {
            rule_text: parsed.rule_text,
            scope: parsed.scope,
            exceptions: parsed.exceptions,
            confidence: parsed.confidence.clamp(0.0, 1.0),
        })
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty() && !self.config.api_url.is_empty()
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_url: String, key_env: &str) -> CapabilityConfig {
        CapabilityConfig {
            api_url,
            api_key_env: key_env.to_string(),
            model: "test-model".to_string(),
            timeout_secs: 5,
            breaker_threshold: 3,
            breaker_cooldown_secs: 60,
        }
    }

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"content": content}}]
        })
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("[1]"), "[1]");
        assert_eq!(strip_code_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  [1, 2]  "), "[1, 2]");
    }

    #[tokio::test]
    async fn test_new_missing_api_key() {
        unsafe { env::remove_var("LETHE_TEST_KEY_MISSING") };
        let config = test_config(
            "https://api.example.com/v1".to_string(),
            "LETHE_TEST_KEY_MISSING",
        );
        let err = RemoteCapability::new(&config).unwrap_err();
        assert!(err.to_string().contains("LETHE_TEST_KEY_MISSING"));
    }

    #[tokio::test]
    async fn test_new_rejects_empty_url() {
        let config = test_config(String::new(), "LETHE_TEST_KEY_EMPTY_URL");
        assert!(RemoteCapability::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_extract_facts_parses_response() {
        let mock_server = MockServer::start().await;

        let payload = r#"[
            {"content": "Alice works at Acme", "certainty": 0.95, "impact": 0.7, "entities": ["Alice", "Acme"]}
        ]"#;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(payload)))
            .mount(&mock_server)
            .await;

        unsafe { env::set_var("LETHE_TEST_KEY_EXTRACT", "test-key") };
        let config = test_config(mock_server.uri(), "LETHE_TEST_KEY_EXTRACT");
        let capability = RemoteCapability::new(&config).unwrap();

        let facts = capability.extract_facts("<conversation/>").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "Alice works at Acme");
        assert_eq!(facts[0].certainty, 0.95);
        assert_eq!(facts[0].entities, vec!["Alice", "Acme"]);
    }

    #[tokio::test]
    async fn test_extract_facts_handles_fenced_json() {
        let mock_server = MockServer::start().await;

        let payload = "```json\n[{\"content\": \"c\", \"certainty\": 0.5, \"impact\": 0.5}]\n```";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(payload)))
            .mount(&mock_server)
            .await;

        unsafe { env::set_var("LETHE_TEST_KEY_FENCED", "test-key") };
        let config = test_config(mock_server.uri(), "LETHE_TEST_KEY_FENCED");
        let capability = RemoteCapability::new(&config).unwrap();

        let facts = capability.extract_facts("x").await.unwrap();
        assert_eq!(facts.len(), 1);
    }

    #[tokio::test]
    async fn test_summarize_segment_parses_relations() {
        let mock_server = MockServer::start().await;

        let payload = r#"{
            "summary": "Alice joined Acme",
            "entities": ["Alice", "Acme"],
            "relations": [
                {"predicate": "works_at", "participants": [
                    {"role": "subject", "entity": "Alice"},
                    {"role": "org", "entity": "Acme"}
                ]}
            ],
            "valid_from": null,
            "valid_to": null
        }"#;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(payload)))
            .mount(&mock_server)
            .await;

        unsafe { env::set_var("LETHE_TEST_KEY_SUMMARIZE", "test-key") };
        let config = test_config(mock_server.uri(), "LETHE_TEST_KEY_SUMMARIZE");
        let capability = RemoteCapability::new(&config).unwrap();

        let summary = capability.summarize_segment("Alice works at Acme").await.unwrap();
        assert_eq!(summary.summary, "Alice joined Acme");
        assert_eq!(summary.relations.len(), 1);
        assert_eq!(summary.relations[0].participants.len(), 2);
    }

    #[tokio::test]
    async fn test_synthesize_rejects_unscoped_rule() {
        let mock_server = MockServer::start().await;

        let payload = r#"{"rule_text": "always", "scope": "  ", "exceptions": [], "confidence": 0.9}"#;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(payload)))
            .mount(&mock_server)
            .await;

        unsafe { env::set_var("LETHE_TEST_KEY_UNSCOPED", "test-key") };
        let config = test_config(mock_server.uri(), "LETHE_TEST_KEY_UNSCOPED");
        let capability = RemoteCapability::new(&config).unwrap();

        let err = capability.synthesize_rule("episodes").await.unwrap_err();
        assert!(matches!(err, CapabilityError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_api_error_surfaces_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        unsafe { env::set_var("LETHE_TEST_KEY_500", "test-key") };
        let config = test_config(mock_server.uri(), "LETHE_TEST_KEY_500");
        let capability = RemoteCapability::new(&config).unwrap();

        let err = capability.extract_facts("x").await.unwrap_err();
        assert!(matches!(err, CapabilityError::ApiError(_)));
        assert!(err.to_string().contains("500"));
    }
}
