//! OpenAI-compatible chat-completions client.
//!
//! All HTTP status handling for the provider lives in this file; the gateway
//! only sees [`ProviderError`] variants.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::json;
use tracing::debug;

use crate::config::AssessorConfig;
use crate::error::{ConfigError, ProviderError};
use crate::gateway::{Completion, CompletionClient, CompletionRequest};
use crate::model::TokenUsage;

const USER_AGENT_VALUE: &str = concat!("designcheck/", env!("CARGO_PKG_VERSION"));

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    pub fn new(config: &AssessorConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigError::invalid("http_client", e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
            "temperature": self.temperature,
            "max_tokens": request.max_tokens,
            "response_format": { "type": "json_object" },
        });

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        debug!(status = status.as_u16(), model = %self.model, "chat completion response");

        match status.as_u16() {
            200..=299 => {}

            401 | 403 => {
                return Err(ProviderError::Unauthorized {
                    status: status.as_u16(),
                })
            }

            408 => return Err(ProviderError::Timeout),

            429 => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);

                return Err(ProviderError::RateLimited { retry_after });
            }

            500..=599 => {
                let message = error_body(response).await;
                return Err(ProviderError::Server {
                    status: status.as_u16(),
                    message,
                });
            }

            _ => {
                let message = error_body(response).await;
                return Err(ProviderError::Rejected {
                    status: status.as_u16(),
                    message,
                });
            }
        }

        // A body that stalls or breaks off is a transport failure; only a
        // complete body that is not JSON is an invalid response.
        let body = response.bytes().await?;
        let json: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| ProviderError::InvalidResponse {
                message: format!("failed to decode response body: {}", e),
            })?;

        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidResponse {
                message: "response missing choices[0].message.content".to_string(),
            })?
            .to_string();

        let usage = json
            .get("usage")
            .cloned()
            .and_then(|u| serde_json::from_value::<TokenUsage>(u).ok());

        let model = json
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(self.model.as_str())
            .to_string();

        Ok(Completion { text, model, usage })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

async fn error_body(response: reqwest::Response) -> String {
    let status = response.status();
    let mut body = response.text().await.unwrap_or_else(|_| status.to_string());
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}
