//! Prompts for the external language capability
//!
//! Shared by every capability implementation so degraded modes and the
//! remote API see the same instructions.

/// Fact extraction prompt.
///
/// Placeholder: {conversation} - the conversation context to analyze
pub const EXTRACTION_PROMPT: &str = r#"Extract durable facts from the following conversation.

For each fact you identify, provide:
1. Content: the specific statement worth remembering (concise but complete)
2. Certainty: 0.0-1.0, how certain you are the statement is true
3. Impact: 0.0-1.0, how much this should influence future behavior
4. Entities: key nouns mentioned (people, organizations, projects, places)

Skip small talk, transient details, and restatements of earlier facts.

Conversation:
{conversation}

Respond with a JSON array in this exact format:
[
  {
    "content": "Alice works at Acme as a data engineer",
    "certainty": 0.95,
    "impact": 0.7,
    "entities": ["Alice", "Acme"]
  }
]

Only include the JSON array, no other text."#;

/// Segment summarization prompt.
///
/// Placeholder: {facts} - the fact statements of one segment, one per line
pub const SUMMARIZATION_PROMPT: &str = r#"Summarize the following related facts into one short narrative episode.

Also extract:
1. Entities: every person, organization, or object involved
2. Relations: structured statements with a predicate and role-labeled
   participants. A multi-party event is ONE relation listing every
   participant, never several pairwise relations.
3. valid_from / valid_to: ISO-8601 instants when the described state began
   and stopped holding, or null if unknown / still holding

Facts:
{facts}

Respond with a JSON object in this exact format:
{
  "summary": "Alice joined Acme's data team and relocated to Berlin",
  "entities": ["Alice", "Acme", "Berlin"],
  "relations": [
    {
      "predicate": "works_at",
      "participants": [
        {"role": "subject", "entity": "Alice"},
        {"role": "org", "entity": "Acme"}
      ]
    }
  ],
  "valid_from": null,
  "valid_to": null
}

Only include the JSON object, no other text."#;

/// Rule synthesis prompt.
///
/// Placeholder: {episodes} - episode summaries sharing a recurring theme
pub const SYNTHESIS_PROMPT: &str = r#"The following episode summaries share a recurring theme. Synthesize ONE generalized rule from them.

Requirements:
- State the rule plainly.
- Give an explicit scope: the situations where the rule applies. Never
  produce an unscoped universal claim.
- List known exceptions, if the episodes show any.
- Give a confidence between 0.0 and 1.0 reflecting how consistently the
  episodes support the rule.

Episodes:
{episodes}

Respond with a JSON object in this exact format:
{
  "rule_text": "Deploys on Friday afternoons tend to cause weekend incidents",
  "scope": "production deploys of the payments service",
  "exceptions": ["documentation-only changes"],
  "confidence": 0.8
}

Only include the JSON object, no other text."#;
