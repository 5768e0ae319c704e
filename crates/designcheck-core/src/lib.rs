//! Assessment pipeline for system-design submissions.
//!
//! A submission (free text plus optional structured metadata) is validated,
//! rendered into a rubric-driven prompt, sent to an external language model
//! through a retrying gateway, and the model's reply is parsed into a scored
//! [`Assessment`]. Every failure surfaces as an [`AssessmentError`] with a
//! stable [`ErrorKind`]; no score is ever invented.
//!
//! # Quick Start
//!
//! ```no_run
//! use designcheck_core::{Assessor, AssessorConfig, RawSubmission};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AssessorConfig::from_env();
//! let assessor = Assessor::from_config(&config)?;
//!
//! let submission = RawSubmission::new("API gateway, three stateless services, Postgres.");
//! match assessor.assess(&submission).await {
//!     Ok(assessment) => println!("overall: {}", assessment.overall_score),
//!     Err(e) => eprintln!("{}: {}", e.kind, e.detail),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Pipeline
//!
//! | Stage | Type | Failure kind |
//! |-------|------|--------------|
//! | validate | [`SubmissionValidator`] | `invalid-input` |
//! | prompt | [`PromptBuilder`] | none |
//! | invoke | [`LlmGateway`] over a [`CompletionClient`] | `upstream-unavailable`, `upstream-rejected` |
//! | parse | [`ResponseParser`] | `malformed-response`, `invalid-score` |
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `DESIGNCHECK_API_KEY` | API key (falls back to `OPENAI_API_KEY`) |
//! | `DESIGNCHECK_BASE_URL` | API base URL (default: `https://api.openai.com/v1`) |
//! | `DESIGNCHECK_MODEL` | Model name (default: `gpt-4o-mini`) |
//! | `DESIGNCHECK_TIMEOUT_SECS` | Per-attempt timeout in seconds (default: 30) |
//! | `DESIGNCHECK_MAX_ATTEMPTS` | Attempts per model invocation (default: 3) |
//! | `DESIGNCHECK_MAX_METADATA_CHARS` | Metadata text limit (default: 20000) |
//! | `DESIGNCHECK_RUBRIC` | Rubric YAML file (default: built-in `v1`) |
//!
//! See [`AssessorConfig::from_env`] for the full list.

pub mod assess;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod parse;
pub mod prompt;
pub mod providers;
pub mod rubric;
pub mod validate;

pub use assess::{Assessor, Stage};
pub use config::AssessorConfig;
pub use error::{
    AssessmentError, ConfigError, ErrorKind, GatewayError, GatewayResult, ParseError,
    ParseFailure, ProviderError, ValidationError,
};
pub use gateway::{Completion, CompletionClient, CompletionRequest, LlmGateway, RetryPolicy};
pub use model::{
    Assessment, AssessmentMeta, Connection, CriterionScore, DeclaredComponent, DesignFocus,
    FeedbackItem, FeedbackType, ProblemContext, PromptPayload, RawModelResponse, RawSubmission,
    Submission, SubmissionMetadata, TokenUsage,
};
pub use parse::ResponseParser;
pub use prompt::PromptBuilder;
pub use providers::{OpenAiClient, ScriptedClient, ScriptedReply};
pub use rubric::{Criterion, RubricError, RubricTemplate, ScoreRange};
pub use validate::SubmissionValidator;
