//! Process-wide configuration, read once at startup.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::gateway::RetryPolicy;
use crate::validate::{DEFAULT_MAX_METADATA_CHARS, DEFAULT_MAX_SUBMISSION_CHARS};

/// Configuration consumed by the assessment pipeline.
///
/// Built once (usually with [`AssessorConfig::from_env`]), checked with
/// [`AssessorConfig::validate`], then shared read-only.
#[derive(Clone, Serialize, Deserialize)]
pub struct AssessorConfig {
    /// API credential for the model provider.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on completion tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Total attempts per gateway invocation (first call included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    #[serde(default = "default_max_submission_chars")]
    pub max_submission_chars: usize,

    /// Limit on metadata text rendered into the prompt, in characters.
    #[serde(default = "default_max_metadata_chars")]
    pub max_metadata_chars: usize,

    /// Overall score at or above which an assessment counts as passed.
    #[serde(default = "default_passing_score")]
    pub passing_score: f64,

    /// Re-invoke the model once when its first response has no usable structure.
    #[serde(default = "default_reinvoke")]
    pub reinvoke_on_malformed: bool,

    /// Deadline for a whole assessment, in seconds.
    #[serde(default)]
    pub request_deadline_secs: Option<u64>,

    /// Rubric YAML; the built-in rubric when unset.
    #[serde(default)]
    pub rubric_path: Option<PathBuf>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_cap_ms() -> u64 {
    8_000
}

fn default_max_submission_chars() -> usize {
    DEFAULT_MAX_SUBMISSION_CHARS
}

fn default_max_metadata_chars() -> usize {
    DEFAULT_MAX_METADATA_CHARS
}

fn default_passing_score() -> f64 {
    50.0
}

fn default_reinvoke() -> bool {
    true
}

impl Default for AssessorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_submission_chars: default_max_submission_chars(),
            max_metadata_chars: default_max_metadata_chars(),
            passing_score: default_passing_score(),
            reinvoke_on_malformed: default_reinvoke(),
            request_deadline_secs: None,
            rubric_path: None,
        }
    }
}

impl fmt::Debug for AssessorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssessorConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("backoff_cap_ms", &self.backoff_cap_ms)
            .field("max_submission_chars", &self.max_submission_chars)
            .field("max_metadata_chars", &self.max_metadata_chars)
            .field("passing_score", &self.passing_score)
            .field("reinvoke_on_malformed", &self.reinvoke_on_malformed)
            .field("request_deadline_secs", &self.request_deadline_secs)
            .field("rubric_path", &self.rubric_path)
            .finish()
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_var(key).and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env_var(key).map(|v| {
        let v = v.trim();
        v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
    })
}

impl AssessorConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `DESIGNCHECK_API_KEY` | API credential (falls back to `OPENAI_API_KEY`) |
    /// | `DESIGNCHECK_BASE_URL` | API base URL |
    /// | `DESIGNCHECK_MODEL` | Model name |
    /// | `DESIGNCHECK_TEMPERATURE` | Sampling temperature |
    /// | `DESIGNCHECK_MAX_TOKENS` | Completion token bound |
    /// | `DESIGNCHECK_TIMEOUT_SECS` | Per-attempt timeout |
    /// | `DESIGNCHECK_MAX_ATTEMPTS` | Attempts per invocation |
    /// | `DESIGNCHECK_BACKOFF_BASE_MS` | First backoff delay |
    /// | `DESIGNCHECK_BACKOFF_CAP_MS` | Maximum backoff delay |
    /// | `DESIGNCHECK_MAX_SUBMISSION_CHARS` | Submission length limit |
    /// | `DESIGNCHECK_MAX_METADATA_CHARS` | Metadata text limit |
    /// | `DESIGNCHECK_PASSING_SCORE` | Pass threshold for the overall score |
    /// | `DESIGNCHECK_REINVOKE_ON_MALFORMED` | Allow one re-invocation on malformed output |
    /// | `DESIGNCHECK_REQUEST_DEADLINE_SECS` | Whole-request deadline |
    /// | `DESIGNCHECK_RUBRIC` | Rubric YAML path |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env_var("DESIGNCHECK_API_KEY").or_else(|| env_var("OPENAI_API_KEY")),
            base_url: env_var("DESIGNCHECK_BASE_URL").unwrap_or(defaults.base_url),
            model: env_var("DESIGNCHECK_MODEL").unwrap_or(defaults.model),
            temperature: env_parse("DESIGNCHECK_TEMPERATURE").unwrap_or(defaults.temperature),
            max_tokens: env_parse("DESIGNCHECK_MAX_TOKENS").unwrap_or(defaults.max_tokens),
            timeout_secs: env_parse("DESIGNCHECK_TIMEOUT_SECS").unwrap_or(defaults.timeout_secs),
            max_attempts: env_parse("DESIGNCHECK_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            backoff_base_ms: env_parse("DESIGNCHECK_BACKOFF_BASE_MS")
                .unwrap_or(defaults.backoff_base_ms),
            backoff_cap_ms: env_parse("DESIGNCHECK_BACKOFF_CAP_MS")
                .unwrap_or(defaults.backoff_cap_ms),
            max_submission_chars: env_parse("DESIGNCHECK_MAX_SUBMISSION_CHARS")
                .unwrap_or(defaults.max_submission_chars),
            max_metadata_chars: env_parse("DESIGNCHECK_MAX_METADATA_CHARS")
                .unwrap_or(defaults.max_metadata_chars),
            passing_score: env_parse("DESIGNCHECK_PASSING_SCORE")
                .unwrap_or(defaults.passing_score),
            reinvoke_on_malformed: env_flag("DESIGNCHECK_REINVOKE_ON_MALFORMED")
                .unwrap_or(defaults.reinvoke_on_malformed),
            request_deadline_secs: env_parse("DESIGNCHECK_REQUEST_DEADLINE_SECS"),
            rubric_path: env_var("DESIGNCHECK_RUBRIC").map(PathBuf::from),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff_ms(mut self, base_ms: u64, cap_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_cap_ms = cap_ms;
        self
    }

    pub fn with_max_submission_chars(mut self, max: usize) -> Self {
        self.max_submission_chars = max;
        self
    }

    pub fn with_max_metadata_chars(mut self, max: usize) -> Self {
        self.max_metadata_chars = max;
        self
    }

    pub fn with_rubric_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rubric_path = Some(path.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn request_deadline(&self) -> Option<Duration> {
        self.request_deadline_secs.map(Duration::from_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_cap_ms),
            attempt_timeout: self.timeout(),
        }
    }

    /// Check value ranges. The API key is checked by the provider that needs it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "base_url",
                format!("'{}' is not an http(s) URL", self.base_url),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::invalid("model", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::invalid("temperature", "must be within 0.0..=2.0"));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::invalid("max_tokens", "must be at least 1"));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::invalid("timeout_secs", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if self.backoff_cap_ms == 0 || self.backoff_base_ms > self.backoff_cap_ms {
            return Err(ConfigError::invalid(
                "backoff_cap_ms",
                format!(
                    "cap {}ms must be non-zero and not below base {}ms",
                    self.backoff_cap_ms, self.backoff_base_ms
                ),
            ));
        }
        if self.max_submission_chars == 0 {
            return Err(ConfigError::invalid("max_submission_chars", "must be at least 1"));
        }
        if self.max_metadata_chars == 0 {
            return Err(ConfigError::invalid("max_metadata_chars", "must be at least 1"));
        }
        if !self.passing_score.is_finite() {
            return Err(ConfigError::invalid("passing_score", "must be a finite number"));
        }
        if self.request_deadline_secs == Some(0) {
            return Err(ConfigError::invalid("request_deadline_secs", "must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DESIGNCHECK_API_KEY",
        "OPENAI_API_KEY",
        "DESIGNCHECK_BASE_URL",
        "DESIGNCHECK_MAX_ATTEMPTS",
        "DESIGNCHECK_BACKOFF_CAP_MS",
        "DESIGNCHECK_REINVOKE_ON_MALFORMED",
        "DESIGNCHECK_REQUEST_DEADLINE_SECS",
        "DESIGNCHECK_TIMEOUT_SECS",
        "DESIGNCHECK_MAX_METADATA_CHARS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = AssessorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_policy().max_delay, Duration::from_millis(8_000));
    }

    #[test]
    #[serial]
    fn from_env_reads_overrides() {
        clear_env();
        std::env::set_var("OPENAI_API_KEY", "sk-fallback");
        std::env::set_var("DESIGNCHECK_BASE_URL", "http://localhost:9999/v1");
        std::env::set_var("DESIGNCHECK_MAX_ATTEMPTS", "5");
        std::env::set_var("DESIGNCHECK_REINVOKE_ON_MALFORMED", "false");
        std::env::set_var("DESIGNCHECK_REQUEST_DEADLINE_SECS", "90");
        std::env::set_var("DESIGNCHECK_TIMEOUT_SECS", "not-a-number");
        std::env::set_var("DESIGNCHECK_MAX_METADATA_CHARS", "4096");

        let config = AssessorConfig::from_env();
        clear_env();

        assert_eq!(config.api_key.as_deref(), Some("sk-fallback"));
        assert_eq!(config.base_url, "http://localhost:9999/v1");
        assert_eq!(config.max_attempts, 5);
        assert!(!config.reinvoke_on_malformed);
        assert_eq!(config.request_deadline(), Some(Duration::from_secs(90)));
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_metadata_chars, 4096);
    }

    #[test]
    #[serial]
    fn primary_api_key_wins() {
        clear_env();
        std::env::set_var("DESIGNCHECK_API_KEY", "sk-primary");
        std::env::set_var("OPENAI_API_KEY", "sk-fallback");
        let config = AssessorConfig::from_env();
        clear_env();
        assert_eq!(config.api_key.as_deref(), Some("sk-primary"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let bad = AssessorConfig::default().with_max_attempts(0);
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid { field, .. }) if field == "max_attempts"));

        let bad = AssessorConfig::default().with_backoff_ms(5_000, 1_000);
        assert!(bad.validate().is_err());

        let bad = AssessorConfig::default().with_base_url("ftp://example.com");
        assert!(bad.validate().is_err());

        let bad = AssessorConfig::default().with_max_metadata_chars(0);
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid { field, .. }) if field == "max_metadata_chars"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AssessorConfig::default().with_api_key("sk-secret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
