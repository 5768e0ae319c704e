//! Error types for the assessment pipeline.
//!
//! Each stage has its own error enum. They meet at the orchestrator boundary,
//! where they are translated into [`AssessmentError`], the only error type that
//! leaves this crate through [`crate::Assessor::assess`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Submission rejected before any external call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Empty or whitespace-only text.
    #[error("submission is empty")]
    Empty,

    /// Text exceeds the configured maximum length (in characters).
    #[error("submission is too long: {len} characters (max {max})")]
    TooLong { len: usize, max: usize },

    /// Metadata text (descriptions, labels, properties, ...) exceeds its own limit.
    #[error("submission metadata is too long: {len} characters (max {max})")]
    MetadataTooLong { len: usize, max: usize },

    /// Text is not valid UTF-8 or contains NUL characters.
    #[error("submission is not valid text: {reason}")]
    InvalidEncoding { reason: String },

    /// A connection points at a component id that was never declared.
    #[error("connection {connection} references unknown component '{component}'")]
    UnknownComponent {
        connection: String,
        component: String,
    },

    /// Two declared components share an id.
    #[error("duplicate component id '{id}'")]
    DuplicateComponent { id: String },
}

/// Failure of a single call to the model provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The attempt did not complete within its timeout.
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure.
    #[error("network error: {message}")]
    Network { message: String },

    /// 5xx from the provider.
    #[error("server error: HTTP {status}: {message}")]
    Server { status: u16, message: String },

    /// 429 from the provider.
    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Credential missing, invalid or lacking permission.
    #[error("unauthorized: HTTP {status}")]
    Unauthorized { status: u16 },

    /// Any other 4xx; the request itself is wrong.
    #[error("request rejected: HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// A success status with a body that is not a completion.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },
}

impl ProviderError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Network { .. } | Self::Server { .. } | Self::RateLimited { .. }
        )
    }

    /// Short description without provider body text, safe to hand to callers.
    pub fn summary(&self) -> String {
        match self {
            Self::Timeout => "timeout".to_string(),
            Self::Network { .. } => "network error".to_string(),
            Self::Server { status, .. } => format!("HTTP {}", status),
            Self::RateLimited { .. } => "rate limited".to_string(),
            Self::Unauthorized { status } => format!("authentication failed (HTTP {})", status),
            Self::Rejected { status, .. } => format!("request rejected (HTTP {})", status),
            Self::InvalidResponse { .. } => "unrecognized response body".to_string(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network {
                message: err.to_string(),
            }
        }
    }
}

/// Failure of a full gateway invocation (after the retry loop).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Every allowed attempt failed with a transient error.
    #[error("exhausted retries after {attempts} attempts: {last}")]
    ExhaustedRetries { attempts: u32, last: ProviderError },

    /// The provider refused the request; no retry was made.
    #[error("upstream rejected request: {cause}")]
    Rejected { cause: ProviderError },
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Why a model response could not be turned into an assessment.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseFailure {
    #[error("no JSON object found in model output")]
    NoJson,

    #[error("invalid JSON: {message}")]
    InvalidJson { message: String },

    #[error("expected a JSON object")]
    NotAnObject,

    #[error("no per-criterion scores found")]
    MissingScores,

    #[error("required criterion is missing")]
    MissingCriterion,

    #[error("criterion appears more than once")]
    DuplicateCriterion,

    #[error("overall score is missing")]
    MissingOverall,

    #[error("not a number: {value}")]
    NotANumber { value: String },

    #[error("score {value} is outside the valid range {min}..={max}")]
    OutOfRange { value: f64, min: f64, max: f64 },
}

/// Parser failure tagged with the offending field.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ParseError {
    pub field: String,
    pub reason: ParseFailure,
}

impl ParseError {
    pub fn new(field: impl Into<String>, reason: ParseFailure) -> Self {
        Self {
            field: field.into(),
            reason,
        }
    }

    /// True when the text could not be mapped to the expected structure at all.
    ///
    /// Only structural failures trigger the orchestrator's re-invocation.
    pub fn is_structural(&self) -> bool {
        matches!(
            self.reason,
            ParseFailure::NoJson
                | ParseFailure::InvalidJson { .. }
                | ParseFailure::NotAnObject
                | ParseFailure::MissingScores
        )
    }
}

/// Public error classification. Stable; the HTTP layer maps it to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Submission failed validation. Caller-fixable.
    InvalidInput,
    /// Model service still failing after all retries. Caller may retry later.
    UpstreamUnavailable,
    /// Model service refused the request (auth, malformed request).
    UpstreamRejected,
    /// Model output had no usable structure, even after one re-invocation.
    MalformedResponse,
    /// Model output was structured but a score was missing or out of range.
    InvalidScore,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid-input",
            Self::UpstreamUnavailable => "upstream-unavailable",
            Self::UpstreamRejected => "upstream-rejected",
            Self::MalformedResponse => "malformed-response",
            Self::InvalidScore => "invalid-score",
        }
    }

    /// Whether the caller can fix the problem by changing the submission.
    pub fn is_caller_fixable(&self) -> bool {
        matches!(self, Self::InvalidInput)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error half of an assessment result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct AssessmentError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl AssessmentError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub(crate) fn deadline_exceeded(deadline: Duration) -> Self {
        Self::new(
            ErrorKind::UpstreamUnavailable,
            format!(
                "assessment did not complete within {}s",
                deadline.as_secs_f64()
            ),
        )
    }
}

impl From<ValidationError> for AssessmentError {
    fn from(err: ValidationError) -> Self {
        Self::new(ErrorKind::InvalidInput, err.to_string())
    }
}

impl From<GatewayError> for AssessmentError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::ExhaustedRetries { attempts, last } => Self::new(
                ErrorKind::UpstreamUnavailable,
                format!(
                    "model service unavailable after {} attempts (last error: {})",
                    attempts,
                    last.summary()
                ),
            ),
            GatewayError::Rejected { cause } => Self::new(
                ErrorKind::UpstreamRejected,
                format!("model service rejected the request: {}", cause.summary()),
            ),
        }
    }
}

impl From<ParseError> for AssessmentError {
    fn from(err: ParseError) -> Self {
        let kind = if err.is_structural() {
            ErrorKind::MalformedResponse
        } else {
            ErrorKind::InvalidScore
        };
        let detail = match &err.reason {
            // Model JSON error text can quote the response; keep the position only.
            ParseFailure::InvalidJson { .. } => format!("{}: model output is not valid JSON", err.field),
            _ => err.to_string(),
        };
        Self::new(kind, detail)
    }
}

/// Configuration problems found at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing API key: set DESIGNCHECK_API_KEY or OPENAI_API_KEY")]
    MissingApiKey,

    #[error("invalid configuration for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_provider_errors() {
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Server {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!ProviderError::Unauthorized { status: 401 }.is_retryable());
        assert!(!ProviderError::Rejected {
            status: 400,
            message: String::new()
        }
        .is_retryable());
    }

    #[test]
    fn gateway_errors_map_to_kinds_without_provider_body() {
        let err: AssessmentError = GatewayError::ExhaustedRetries {
            attempts: 3,
            last: ProviderError::Server {
                status: 502,
                message: "<html>internal stack trace</html>".to_string(),
            },
        }
        .into();
        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
        assert!(err.detail.contains("3 attempts"));
        assert!(!err.detail.contains("stack trace"));

        let err: AssessmentError = GatewayError::Rejected {
            cause: ProviderError::Unauthorized { status: 401 },
        }
        .into();
        assert_eq!(err.kind, ErrorKind::UpstreamRejected);
    }

    #[test]
    fn parse_errors_split_by_structure() {
        let malformed: AssessmentError = ParseError::new("response", ParseFailure::NoJson).into();
        assert_eq!(malformed.kind, ErrorKind::MalformedResponse);

        let invalid: AssessmentError = ParseError::new(
            "security",
            ParseFailure::OutOfRange {
                value: 150.0,
                min: 0.0,
                max: 100.0,
            },
        )
        .into();
        assert_eq!(invalid.kind, ErrorKind::InvalidScore);
        assert!(invalid.detail.starts_with("security:"));
    }

    #[test]
    fn kind_serializes_kebab_case() {
        let json = serde_json::to_string(&AssessmentError::new(ErrorKind::InvalidInput, "x")).unwrap();
        assert_eq!(json, r#"{"kind":"invalid-input","detail":"x"}"#);
        assert_eq!(ErrorKind::UpstreamUnavailable.to_string(), "upstream-unavailable");
    }
}
