//! Data types that flow through the pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Submission as received from the caller, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawSubmission {
    /// Design write-up, as received (validated as UTF-8 later).
    pub text: Vec<u8>,

    /// Optional structured description of the design.
    pub metadata: Option<SubmissionMetadata>,
}

impl RawSubmission {
    pub fn new(text: impl Into<Vec<u8>>) -> Self {
        Self {
            text: text.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: SubmissionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A validated submission. Only [`crate::validate::SubmissionValidator`] creates these.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    text: String,
    metadata: SubmissionMetadata,
}

impl Submission {
    pub(crate) fn new(text: String, metadata: SubmissionMetadata) -> Self {
        Self { text, metadata }
    }

    /// Trimmed design text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn metadata(&self) -> &SubmissionMetadata {
        &self.metadata
    }
}

/// Structured context accompanying the free-form text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionMetadata {
    /// Components drawn in the diagram.
    pub components: Vec<DeclaredComponent>,

    /// Edges between components, by component id.
    pub connections: Vec<Connection>,

    /// The problem this design answers.
    pub problem: Option<ProblemContext>,

    /// Requirements, when no problem context carries them.
    pub requirements: Option<String>,

    /// Constraints, when no problem context carries them.
    pub constraints: Option<String>,

    #[serde(alias = "keyPoints")]
    pub key_points: Vec<String>,

    /// Expected load, e.g. "10k requests/s, 50M users".
    pub expected_scale: Option<String>,

    /// Domain emphasis for the reviewer.
    pub focus: Option<DesignFocus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredComponent {
    pub id: String,

    /// Component type, e.g. "database" or "load-balancer".
    #[serde(alias = "type")]
    pub kind: String,

    pub label: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Free-form properties, kept sorted so prompts render deterministically.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub source: String,
    pub target: String,

    #[serde(default)]
    pub label: Option<String>,

    /// Protocol or interaction style, e.g. "HTTP" or "async".
    #[serde(default, alias = "type")]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemContext {
    pub title: String,
    pub description: String,

    #[serde(default)]
    pub requirements: Option<String>,

    #[serde(default)]
    pub constraints: Option<String>,

    #[serde(default)]
    pub difficulty: Option<String>,

    #[serde(default)]
    pub category: Option<String>,
}

/// Domain emphasis appended to the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DesignFocus {
    Microservices,
    DataIntensive,
    RealTime,
    SecurityCritical,
}

/// Rendered instructions for the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PromptPayload {
    /// System message.
    pub system: String,

    /// User message: rubric, response format and the submission.
    pub user: String,

    /// Version of the rubric template the prompt was rendered from.
    pub rubric_version: String,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,

    #[serde(default)]
    pub completion_tokens: u32,

    #[serde(default)]
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Sum two optional usages; `None` only when both are unknown.
    pub fn combine(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (None, None) => None,
            (a, b) => {
                let a = a.unwrap_or_default();
                let b = b.unwrap_or_default();
                Some(Self {
                    prompt_tokens: a.prompt_tokens.saturating_add(b.prompt_tokens),
                    completion_tokens: a.completion_tokens.saturating_add(b.completion_tokens),
                    total_tokens: a.total_tokens.saturating_add(b.total_tokens),
                })
            }
        }
    }
}

/// Unparsed model output from one gateway invocation.
#[derive(Debug, Clone)]
pub struct RawModelResponse {
    pub text: String,

    /// Model that produced the text, as reported by the provider.
    pub model: String,

    /// Wall time of the invocation, retries and backoff included.
    pub latency: Duration,

    pub usage: Option<TokenUsage>,

    /// Attempts made by the gateway (1 when the first call succeeded).
    pub attempts: u32,
}

/// Score and justification for one rubric criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub score: f64,
    pub justification: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Success,
    Warning,
    Error,
    Info,
}

/// One piece of targeted feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackItem {
    #[serde(rename = "type")]
    pub kind: FeedbackType,
    pub message: String,
    pub category: String,
    /// 1 (highest) to 5.
    pub priority: u8,
}

/// Bookkeeping attached to every assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentMeta {
    pub assessment_id: Uuid,
    pub rubric_version: String,
    pub model: String,

    /// Gateway attempts across all invocations.
    pub gateway_attempts: u32,

    /// Gateway invocations (2 when a malformed response was re-requested).
    pub invocations: u32,

    pub processing_time_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,

    pub assessed_at: DateTime<Utc>,
}

/// The scored result of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub overall_score: f64,

    /// Overall score reached the configured passing score.
    pub passed: bool,

    /// Exactly one entry per rubric criterion.
    pub criteria: BTreeMap<String, CriterionScore>,

    pub summary: String,

    #[serde(default)]
    pub feedback: Vec<FeedbackItem>,

    #[serde(default)]
    pub strengths: Vec<String>,

    #[serde(default)]
    pub improvements: Vec<String>,

    #[serde(default)]
    pub missing_components: Vec<String>,

    #[serde(default)]
    pub suggestions: Vec<String>,

    pub meta: AssessmentMeta,
}

impl Assessment {
    pub fn criterion(&self, name: &str) -> Option<&CriterionScore> {
        self.criteria.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_accepts_alias_field_names() {
        let metadata: SubmissionMetadata = serde_json::from_value(serde_json::json!({
            "components": [
                {"id": "db", "type": "database", "label": "Postgres"}
            ],
            "connections": [
                {"source": "api", "target": "db", "type": "TCP"}
            ],
            "keyPoints": ["sharded by user id"],
            "focus": "data-intensive"
        }))
        .unwrap();

        assert_eq!(metadata.components[0].kind, "database");
        assert_eq!(metadata.connections[0].protocol.as_deref(), Some("TCP"));
        assert_eq!(metadata.key_points, vec!["sharded by user id"]);
        assert_eq!(metadata.focus, Some(DesignFocus::DataIntensive));
    }

    #[test]
    fn usage_combine() {
        let a = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        assert_eq!(TokenUsage::combine(None, None), None);
        assert_eq!(TokenUsage::combine(Some(a), None), Some(a));
        assert_eq!(TokenUsage::combine(Some(a), Some(a)).unwrap().total_tokens, 30);
    }
}
