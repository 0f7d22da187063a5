//! Classification and generation capability.
//!
//! [`LanguageModel`] is the seam the router and handlers depend on.
//! [`LlmClient`] implements it against hosted completion pipes; tests swap in
//! stubs.

mod client;
mod types;

pub use client::*;
pub use types::*;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::error::{LlmError, LlmResult};

/// Opaque language-model capability.
///
/// Any error returned here is treated by callers as "capability unavailable"
/// and triggers their deterministic fallback.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Classify `text` into a handler domain, given recent conversation context.
    async fn classify(&self, text: &str, context: &[Message]) -> LlmResult<Classification>;

    /// Produce a natural-language completion for `prompt`.
    async fn generate(&self, prompt: &str) -> LlmResult<String>;
}

/// Run a model call under a deadline. An elapsed deadline is reported as
/// [`LlmError::Timeout`], so callers fall back exactly as for an outage.
pub async fn within<T>(
    budget: Duration,
    call: impl Future<Output = LlmResult<T>>,
) -> LlmResult<T> {
    tokio::time::timeout(budget, call)
        .await
        .unwrap_or_else(|_| {
            Err(LlmError::Timeout {
                timeout_ms: budget.as_millis() as u64,
            })
        })
}

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Tries raw JSON first, then a ```` ```json ```` block, then any fenced block.
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

/// Serialize a value to JSON for the audit trail, with a warning on failure.
pub(crate) fn serialize_for_log<T: serde::Serialize>(
    value: &T,
    context: &str,
) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::warn!(
            error = %e,
            context = %context,
            "Failed to serialize value for invocation log"
        );
        serde_json::json!({
            "serialization_error": e.to_string(),
            "context": context
        })
    })
}
