//! Assessment orchestrator: validate → build prompt → invoke → parse.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AssessorConfig;
use crate::error::{AssessmentError, ConfigError};
use crate::gateway::{CompletionClient, LlmGateway};
use crate::model::{Assessment, RawSubmission, TokenUsage};
use crate::parse::ResponseParser;
use crate::prompt::PromptBuilder;
use crate::providers::OpenAiClient;
use crate::rubric::RubricTemplate;
use crate::validate::SubmissionValidator;

/// Gateway invocations per assessment: the first, plus one re-invocation
/// after a structurally malformed response.
const MAX_INVOCATIONS: u32 = 2;

/// Pipeline position of an assessment, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Prompting,
    Invoking,
    Parsing,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Prompting => "prompting",
            Self::Invoking => "invoking",
            Self::Parsing => "parsing",
            Self::Done => "done",
        }
    }
}

/// Runs one submission through the pipeline.
///
/// Holds only read-only state; share it behind an `Arc` and call
/// [`Assessor::assess`] from as many tasks as needed.
#[derive(Debug, Clone)]
pub struct Assessor {
    validator: SubmissionValidator,
    builder: PromptBuilder,
    gateway: LlmGateway,
    parser: ResponseParser,
    reinvoke_on_malformed: bool,
    request_deadline: Option<Duration>,
}

impl Assessor {
    pub fn new(
        config: &AssessorConfig,
        rubric: Arc<RubricTemplate>,
        client: Arc<dyn CompletionClient>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        rubric
            .validate()
            .map_err(|e| ConfigError::invalid("rubric", e.to_string()))?;

        Ok(Self {
            validator: SubmissionValidator::from_config(config),
            builder: PromptBuilder::new(rubric.clone()),
            gateway: LlmGateway::from_config(client, config),
            parser: ResponseParser::new(rubric, config.passing_score),
            reinvoke_on_malformed: config.reinvoke_on_malformed,
            request_deadline: config.request_deadline(),
        })
    }

    /// Live assessor: rubric from `config.rubric_path` (or built-in), OpenAI client.
    pub fn from_config(config: &AssessorConfig) -> anyhow::Result<Self> {
        let rubric = RubricTemplate::load_or_builtin(config.rubric_path.as_deref())
            .context("failed to load rubric")?;
        let client = OpenAiClient::new(config).context("failed to create model client")?;
        let assessor = Self::new(config, Arc::new(rubric), Arc::new(client))
            .context("invalid assessor configuration")?;
        Ok(assessor)
    }

    pub fn rubric(&self) -> &RubricTemplate {
        self.builder.rubric()
    }

    /// Assess one submission.
    ///
    /// Exactly one of `Ok` / `Err` comes back; there is no partial result.
    /// With a request deadline configured, expiry cancels the in-flight model
    /// call and yields `upstream-unavailable`.
    pub async fn assess(&self, raw: &RawSubmission) -> Result<Assessment, AssessmentError> {
        let assessment_id = Uuid::new_v4();
        let span = info_span!("assess", %assessment_id);

        async move {
            let outcome = match self.request_deadline {
                Some(deadline) => {
                    match tokio::time::timeout(deadline, self.run(assessment_id, raw)).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(AssessmentError::deadline_exceeded(deadline)),
                    }
                }
                None => self.run(assessment_id, raw).await,
            };

            match &outcome {
                Ok(assessment) => info!(
                    overall_score = assessment.overall_score,
                    passed = assessment.passed,
                    invocations = assessment.meta.invocations,
                    gateway_attempts = assessment.meta.gateway_attempts,
                    latency_ms = assessment.meta.processing_time_ms,
                    "assessment completed"
                ),
                Err(e) if e.kind.is_caller_fixable() => {
                    info!(kind = %e.kind, detail = %e.detail, "submission rejected")
                }
                Err(e) => warn!(kind = %e.kind, detail = %e.detail, "assessment failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        assessment_id: Uuid,
        raw: &RawSubmission,
    ) -> Result<Assessment, AssessmentError> {
        let started = Instant::now();

        debug!(stage = Stage::Validating.as_str());
        let submission = self.validator.validate(raw)?;

        debug!(stage = Stage::Prompting.as_str(), chars = submission.text().chars().count());
        let prompt = self.builder.build(&submission);

        let mut invocations = 0;
        let mut gateway_attempts = 0;
        let mut usage = None;

        loop {
            invocations += 1;
            debug!(stage = Stage::Invoking.as_str(), invocation = invocations);
            let response = self.gateway.invoke(&prompt).await?;
            gateway_attempts += response.attempts;
            usage = TokenUsage::combine(usage, response.usage);

            debug!(stage = Stage::Parsing.as_str(), invocation = invocations);
            match self.parser.parse(&response) {
                Ok(mut assessment) => {
                    assessment.meta.assessment_id = assessment_id;
                    assessment.meta.invocations = invocations;
                    assessment.meta.gateway_attempts = gateway_attempts;
                    assessment.meta.usage = usage;
                    assessment.meta.processing_time_ms = started.elapsed().as_millis() as u64;
                    debug!(stage = Stage::Done.as_str());
                    return Ok(assessment);
                }
                Err(e)
                    if e.is_structural()
                        && self.reinvoke_on_malformed
                        && invocations < MAX_INVOCATIONS =>
                {
                    warn!(error = %e.reason, invocation = invocations, "malformed model output, re-invoking");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
