use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{Classification, ClassificationSource, Message, PipeRequest, PipeResponse};
use super::{extract_json_from_completion, LanguageModel};
use crate::config::{LlmConfig, RequestConfig};
use crate::error::{LlmError, LlmResult};
use crate::prompts::{BUSINESS_ASSISTANT_PROMPT, INTENT_CLASSIFIER_PROMPT};

/// HTTP client for the hosted completion pipes
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    classifier_pipe: String,
    generator_pipe: String,
    request_config: RequestConfig,
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    intent: String,
    #[serde(default)]
    confidence: f64,
}

impl LlmClient {
    /// Create a new client. Fails when no API key is configured.
    pub fn new(config: &LlmConfig, request_config: RequestConfig) -> LlmResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::ServiceUnavailable {
                message: "LLM_API_KEY is not set".to_string(),
                retries: 0,
            })?;

        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LlmError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            classifier_pipe: config.classifier_pipe.clone(),
            generator_pipe: config.generator_pipe.clone(),
            request_config,
        })
    }

    /// Call a pipe, retrying with exponential back-off
    pub async fn call_pipe(&self, request: PipeRequest) -> LlmResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let pipe_name = request.name.clone();

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = backoff_delay(self.request_config.retry_delay_ms, retries);
                warn!(
                    pipe = %pipe_name,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying pipe request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, &request).await {
                Ok(response) => {
                    info!(
                        pipe = %pipe_name,
                        latency_ms = start.elapsed().as_millis(),
                        "Pipe call succeeded"
                    );
                    return Ok(response);
                }
                // Client errors will not get better on retry.
                Err(LlmError::Api { status, message })
                    if (400..500).contains(&status) && status != 429 =>
                {
                    error!(pipe = %pipe_name, status, error = %message, "Pipe call rejected");
                    return Err(LlmError::Api { status, message });
                }
                Err(e) => {
                    error!(
                        pipe = %pipe_name,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Pipe call failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(LlmError::ServiceUnavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    async fn execute_request(&self, url: &str, request: &PipeRequest) -> LlmResult<PipeResponse> {
        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Calling pipe"
        );

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    LlmError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let pipe_response: PipeResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        if !pipe_response.success {
            return Err(LlmError::InvalidResponse {
                message: "pipe reported success=false".to_string(),
            });
        }

        Ok(pipe_response)
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Delay before retry number `retry` (1-based): `base_ms * 2^(retry - 1)`, saturating.
fn backoff_delay(base_ms: u64, retry: u32) -> Duration {
    let factor = 2_u64.saturating_pow(retry.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn classify(&self, text: &str, context: &[Message]) -> LlmResult<Classification> {
        let mut messages = Vec::with_capacity(context.len() + 2);
        messages.push(Message::system(INTENT_CLASSIFIER_PROMPT));
        messages.extend(context.iter().cloned());
        messages.push(Message::user(text));

        let response = self
            .call_pipe(PipeRequest::new(&self.classifier_pipe, messages))
            .await?;

        let json = extract_json_from_completion(&response.completion)
            .map_err(|message| LlmError::InvalidResponse { message })?;
        let raw: RawClassification =
            serde_json::from_str(json).map_err(|e| LlmError::InvalidResponse {
                message: format!("Failed to parse classification: {}", e),
            })?;

        if raw.intent.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                message: "classification has an empty intent".to_string(),
            });
        }

        Ok(Classification::new(
            raw.intent,
            raw.confidence,
            ClassificationSource::Model,
        ))
    }

    async fn generate(&self, prompt: &str) -> LlmResult<String> {
        let messages = vec![
            Message::system(BUSINESS_ASSISTANT_PROMPT),
            Message::user(prompt),
        ];

        let response = self
            .call_pipe(PipeRequest::new(&self.generator_pipe, messages))
            .await?;

        Ok(response.completion)
    }
}
