//! LLM gateway: one logical "complete this prompt" with timeout and retry.
//!
//! [`CompletionClient`] is the provider capability and makes exactly one
//! call. [`LlmGateway`] owns the retry loop; it is the ONLY place that
//! decides whether to try again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::AssessorConfig;
use crate::error::{GatewayError, GatewayResult, ProviderError};
use crate::model::{PromptPayload, RawModelResponse, TokenUsage};

/// One completion call as seen by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Text returned by a provider for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Provider capability: complete a prompt once, without retrying.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;

    fn provider_name(&self) -> &'static str;
}

/// Bounds for a single gateway invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first call included.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay, jitter included.
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        AssessorConfig::default().retry_policy()
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    ///
    /// `min(max_delay, base·2^(attempt-1) + jitter)` with jitter uniform in
    /// `[0, base·2^(attempt-1) / 10]`. A rate limit with `Retry-After` uses
    /// that value instead, still capped at `max_delay`.
    pub fn backoff<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        error: &ProviderError,
        rng: &mut R,
    ) -> Duration {
        if let ProviderError::RateLimited {
            retry_after: Some(retry_after),
        } = error
        {
            return (*retry_after).min(self.max_delay);
        }

        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let exponential = self.base_delay.saturating_mul(factor).min(self.max_delay);

        let jitter_ceiling_ms = (exponential.as_millis() / 10) as u64;
        let jitter_ms = if jitter_ceiling_ms > 0 {
            rng.gen_range(0..=jitter_ceiling_ms)
        } else {
            0
        };

        (exponential + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }

    /// Worst-case total backoff sleep for one invocation.
    pub fn max_total_delay(&self) -> Duration {
        self.max_delay
            .saturating_mul(self.max_attempts.saturating_sub(1))
    }
}

/// Sends prompts to the model service with bounded retries.
#[derive(Clone)]
pub struct LlmGateway {
    client: Arc<dyn CompletionClient>,
    policy: RetryPolicy,
    max_tokens: u32,
}

impl std::fmt::Debug for LlmGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmGateway")
            .field("provider", &self.client.provider_name())
            .field("policy", &self.policy)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl LlmGateway {
    pub fn new(client: Arc<dyn CompletionClient>, policy: RetryPolicy, max_tokens: u32) -> Self {
        Self {
            client,
            policy,
            max_tokens,
        }
    }

    pub fn from_config(client: Arc<dyn CompletionClient>, config: &AssessorConfig) -> Self {
        Self::new(client, config.retry_policy(), config.max_tokens)
    }

    /// Invoke the model for one prompt.
    ///
    /// Makes at most `max_attempts` calls. Transient failures (timeout,
    /// network, 5xx, 429) are retried after [`RetryPolicy::backoff`]; any
    /// other failure returns immediately. Dropping the returned future
    /// cancels the in-flight call and any pending backoff.
    pub async fn invoke(&self, prompt: &PromptPayload) -> GatewayResult<RawModelResponse> {
        let max_attempts = self.policy.max_attempts.max(1);
        let request = CompletionRequest {
            system: prompt.system.clone(),
            prompt: prompt.user.clone(),
            max_tokens: self.max_tokens,
            timeout: self.policy.attempt_timeout,
        };
        let provider = self.client.provider_name();
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result =
                match tokio::time::timeout(self.policy.attempt_timeout, self.client.complete(&request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout),
                };

            match result {
                Ok(completion) => {
                    let latency = started.elapsed();
                    debug!(
                        provider,
                        attempt,
                        latency_ms = latency.as_millis() as u64,
                        "model call succeeded"
                    );
                    return Ok(RawModelResponse {
                        text: completion.text,
                        model: completion.model,
                        latency,
                        usage: completion.usage,
                        attempts: attempt,
                    });
                }
                Err(e) if !e.is_retryable() => {
                    warn!(provider, attempt, error = %e, "model call rejected, not retrying");
                    return Err(GatewayError::Rejected { cause: e });
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(
                        provider,
                        attempts = attempt,
                        error = %e,
                        "model call failed, retries exhausted"
                    );
                    return Err(GatewayError::ExhaustedRetries {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    let backoff = self.policy.backoff(attempt, &e, &mut rand::thread_rng());

                    warn!(
                        provider,
                        error = %e,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying model call"
                    );

                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::scripted::{ScriptedClient, ScriptedReply};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn prompt() -> PromptPayload {
        PromptPayload {
            system: "sys".to_string(),
            user: "user".to_string(),
            rubric_version: "v1".to_string(),
        }
    }

    fn server_error() -> ScriptedReply {
        ScriptedReply::Fail(ProviderError::Server {
            status: 503,
            message: "busy".to_string(),
        })
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy(10);
        let mut rng = StdRng::seed_from_u64(7);
        let err = ProviderError::Timeout;

        for attempt in 1..=10 {
            let delay = policy.backoff(attempt, &err, &mut rng);
            let exponential = Duration::from_millis(100 * (1u64 << (attempt - 1)))
                .min(Duration::from_millis(1_000));
            assert!(delay >= exponential, "attempt {attempt}: {delay:?}");
            assert!(delay <= exponential + exponential / 10);
            assert!(delay <= policy.max_delay);
        }
    }

    #[test]
    fn backoff_honors_retry_after_within_cap() {
        let policy = policy(3);
        let mut rng = StdRng::seed_from_u64(1);
        let short = ProviderError::RateLimited {
            retry_after: Some(Duration::from_millis(300)),
        };
        let long = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(policy.backoff(1, &short, &mut rng), Duration::from_millis(300));
        assert_eq!(policy.backoff(1, &long, &mut rng), policy.max_delay);
    }

    #[test]
    fn backoff_survives_huge_attempt_numbers() {
        let policy = policy(u32::MAX);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(
            policy.backoff(u32::MAX, &ProviderError::Timeout, &mut rng),
            policy.max_delay
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_then_succeeds() {
        let client = Arc::new(ScriptedClient::new(vec![
            server_error(),
            ScriptedReply::Fail(ProviderError::RateLimited { retry_after: None }),
            ScriptedReply::text("{}"),
        ]));
        let gateway = LlmGateway::new(client.clone(), policy(3), 100);

        let raw = gateway.invoke(&prompt()).await.unwrap();
        assert_eq!(raw.attempts, 3);
        assert_eq!(raw.text, "{}");
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fails_immediately() {
        let client = Arc::new(ScriptedClient::new(vec![
            ScriptedReply::Fail(ProviderError::Unauthorized { status: 401 }),
            ScriptedReply::text("{}"),
        ]));
        let gateway = LlmGateway::new(client.clone(), policy(3), 100);

        let err = gateway.invoke(&prompt()).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Rejected {
                cause: ProviderError::Unauthorized { status: 401 }
            }
        );
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_exhaust_after_exactly_max_attempts() {
        let client = Arc::new(ScriptedClient::repeating(ScriptedReply::Hang));
        let gateway = LlmGateway::new(client.clone(), policy(3), 100);

        let err = gateway.invoke(&prompt()).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::ExhaustedRetries {
                attempts: 3,
                last: ProviderError::Timeout
            }
        );
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn total_backoff_is_bounded() {
        let policy = policy(4);
        let client = Arc::new(ScriptedClient::repeating(server_error()));
        let gateway = LlmGateway::new(client.clone(), policy, 100);

        let started = Instant::now();
        let err = gateway.invoke(&prompt()).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, GatewayError::ExhaustedRetries { attempts: 4, .. }));
        assert_eq!(client.calls(), 4);
        // Failures are instant, so elapsed time is pure backoff: 100 + 200 + 400 ms plus jitter.
        assert!(elapsed >= Duration::from_millis(700));
        assert!(elapsed <= policy.max_total_delay());
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_never_sleeps() {
        let client = Arc::new(ScriptedClient::repeating(server_error()));
        let gateway = LlmGateway::new(client.clone(), policy(1), 100);

        let started = Instant::now();
        let err = gateway.invoke(&prompt()).await.unwrap_err();
        assert!(matches!(err, GatewayError::ExhaustedRetries { attempts: 1, .. }));
        assert!(started.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test]
    async fn request_carries_prompt_and_limits() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptedReply::text("ok")]));
        let gateway = LlmGateway::new(client.clone(), policy(1), 321);
        gateway.invoke(&prompt()).await.unwrap();

        let seen = client.last_request().unwrap();
        assert_eq!(seen.system, "sys");
        assert_eq!(seen.prompt, "user");
        assert_eq!(seen.max_tokens, 321);
        assert_eq!(seen.timeout, Duration::from_secs(5));
    }
}
