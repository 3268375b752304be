//! LLM completion client with retry, backoff, and provider fallback.
//!
//! Two endpoints are recognized at run time: model names containing `claude`
//! route to an Anthropic-style messages API, everything else to an
//! OpenAI-style chat completions API. The fallback model is always routed to
//! the alternate endpoint of whichever the primary used.
//!
//! # Retry Strategy
//!
//! - 408/504 or a timeout → `DOC_LLM_TIMEOUT`, retryable.
//! - 429 (honoring `retry-after`) and 503 → `DOC_LLM_FAILED`, retryable.
//! - 400/401/403 → `DOC_LLM_FAILED`, not retryable.
//! - Empty/whitespace content → `DOC_LLM_PARSE_FAILED`, never retried and
//!   never falls back (the caller substitutes its deterministic fallback).
//! - 402 or a credits/insufficient-funds message → no retry, immediate
//!   fallback to the alternate provider.
//!
//! Backoff between attempts is `min(retry_after, 30 s)` when the server sent
//! one, else `min(1000 · 2^(attempt−1), 30000)` ms.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{AgentError, AgentResult, ErrorCode};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
    }
}

/// A successful completion, tagged with the model that actually produced it.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub tokens: TokenUsage,
    pub used_fallback: bool,
    pub actual_model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Anthropic,
    OpenAi,
}

impl Endpoint {
    fn for_model(model: &str) -> Self {
        if model.contains("claude") {
            Endpoint::Anthropic
        } else {
            Endpoint::OpenAi
        }
    }

    fn alternate(self) -> Self {
        match self {
            Endpoint::Anthropic => Endpoint::OpenAi,
            Endpoint::OpenAi => Endpoint::Anthropic,
        }
    }
}

pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, http })
    }

    pub fn primary_model(&self) -> &str {
        &self.config.primary_model
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Complete with the configured primary model.
    pub async fn complete(&self, prompt: &str) -> AgentResult<Completion> {
        let model = self.config.primary_model.clone();
        self.complete_with_model(prompt, &model).await
    }

    /// Complete with an explicit model, applying the full retry + fallback
    /// policy.
    pub async fn complete_with_model(&self, prompt: &str, model: &str) -> AgentResult<Completion> {
        if !self.config.is_enabled() {
            return Err(AgentError::new(
                ErrorCode::DocLlmFailed,
                "LLM provider is disabled",
            )
            .with_recoverable(false));
        }

        let endpoint = Endpoint::for_model(model);
        let primary_err = match self.attempt_with_retries(prompt, model, endpoint).await {
            Ok((content, tokens)) => {
                return Ok(Completion {
                    content,
                    tokens,
                    used_fallback: false,
                    actual_model: model.to_string(),
                })
            }
            // Parse failures bypass both retry and provider fallback; the
            // caller substitutes its deterministic description.
            Err(e) if e.code == ErrorCode::DocLlmParseFailed => return Err(e),
            Err(e) => e,
        };

        if !self.config.fallback_enabled {
            return Err(primary_err);
        }
        let fallback_model = self.config.fallback_model.clone();
        let fallback_endpoint = endpoint.alternate();
        if self.api_key(fallback_endpoint).is_err() {
            debug!(model = %fallback_model, "fallback credentials unavailable, surfacing primary error");
            return Err(primary_err);
        }

        warn!(
            primary = model,
            fallback = %fallback_model,
            err = %primary_err,
            "primary LLM failed, attempting fallback"
        );
        match self.call_once(prompt, &fallback_model, fallback_endpoint).await {
            Ok((content, tokens)) => Ok(Completion {
                content,
                tokens,
                used_fallback: true,
                actual_model: fallback_model,
            }),
            Err(fallback_err) => Err(AgentError::new(
                ErrorCode::DocLlmFailed,
                format!("primary: {}; fallback: {}", primary_err.message, fallback_err.message),
            )
            .with_recoverable(false)
            .with_context(serde_json::json!({
                "primary_model": model,
                "fallback_model": self.config.fallback_model,
            }))),
        }
    }

    async fn attempt_with_retries(
        &self,
        prompt: &str,
        model: &str,
        endpoint: Endpoint,
    ) -> Result<(String, TokenUsage), AgentError> {
        let max_attempts = self.config.max_retries.max(1);
        let mut last_err: Option<AgentError> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let retry_after = last_err
                    .as_ref()
                    .and_then(|e| e.context.get("retry_after_seconds"))
                    .and_then(|v| v.as_u64());
                let delay = retry_delay(attempt - 1, retry_after);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    model,
                    "retrying LLM call after backoff"
                );
                tokio::time::sleep(delay).await;
            }

            match self.call_once(prompt, model, endpoint).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.code == ErrorCode::DocLlmParseFailed || is_credits_error(&e) {
                        return Err(e);
                    }
                    if !e.recoverable {
                        return Err(e);
                    }
                    warn!(attempt, model, err = %e, "recoverable LLM error");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            AgentError::new(ErrorCode::DocLlmFailed, "LLM call failed with no attempts made")
        }))
    }

    fn api_key(&self, endpoint: Endpoint) -> Result<String, AgentError> {
        let var = match endpoint {
            Endpoint::Anthropic => &self.config.anthropic_api_key_env,
            Endpoint::OpenAi => &self.config.openai_api_key_env,
        };
        std::env::var(var).map_err(|_| {
            AgentError::new(
                ErrorCode::DocLlmFailed,
                format!("API key env var {} not set", var),
            )
            .with_recoverable(false)
        })
    }

    async fn call_once(
        &self,
        prompt: &str,
        model: &str,
        endpoint: Endpoint,
    ) -> Result<(String, TokenUsage), AgentError> {
        let key = self.api_key(endpoint)?;

        let request = match endpoint {
            Endpoint::OpenAi => self
                .http
                .post(format!("{}/v1/chat/completions", self.config.openai_base_url))
                .bearer_auth(&key)
                .json(&serde_json::json!({
                    "model": model,
                    "messages": [{"role": "user", "content": prompt}],
                })),
            Endpoint::Anthropic => self
                .http
                .post(format!("{}/v1/messages", self.config.anthropic_base_url))
                .header("x-api-key", &key)
                .header("anthropic-version", "2023-06-01")
                .json(&serde_json::json!({
                    "model": model,
                    "max_tokens": 1024,
                    "messages": [{"role": "user", "content": prompt}],
                })),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::new(ErrorCode::DocLlmTimeout, format!("LLM request timed out: {}", e))
            } else {
                AgentError::new(ErrorCode::DocLlmFailed, format!("LLM transport error: {}", e))
            }
        })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, &body, retry_after));
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            AgentError::new(ErrorCode::DocLlmParseFailed, format!("Invalid JSON response: {}", e))
                .with_recoverable(false)
        })?;

        let content = match endpoint {
            Endpoint::OpenAi => json
                .pointer("/choices/0/message/content")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            Endpoint::Anthropic => json
                .pointer("/content/0/text")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        };

        let content = match content {
            Some(c) if !c.trim().is_empty() => c,
            _ => {
                return Err(AgentError::new(
                    ErrorCode::DocLlmParseFailed,
                    "LLM returned null, empty, or non-string content",
                )
                .with_recoverable(false))
            }
        };

        let tokens = match endpoint {
            Endpoint::OpenAi => TokenUsage {
                prompt: json.pointer("/usage/prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                completion: json
                    .pointer("/usage/completion_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                total: json.pointer("/usage/total_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            },
            Endpoint::Anthropic => {
                let prompt_t =
                    json.pointer("/usage/input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                let completion_t =
                    json.pointer("/usage/output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                TokenUsage { prompt: prompt_t, completion: completion_t, total: prompt_t + completion_t }
            }
        };

        Ok((content, tokens))
    }
}

/// Map an HTTP failure to the taxonomy. Shared with the embedding client.
pub(crate) fn classify_http_error(status: u16, body: &str, retry_after: Option<u64>) -> AgentError {
    let mut context = serde_json::json!({"status": status});
    if let Some(ra) = retry_after {
        context["retry_after_seconds"] = serde_json::json!(ra);
    }

    let message = format!("LLM API error {}: {}", status, truncate_body(body));
    match status {
        408 | 504 => AgentError::new(ErrorCode::DocLlmTimeout, message).with_context(context),
        429 | 503 => AgentError::new(ErrorCode::DocLlmFailed, message)
            .with_recoverable(true)
            .with_context(context),
        402 => AgentError::new(ErrorCode::DocLlmFailed, message)
            .with_recoverable(false)
            .with_context(context),
        400 | 401 | 403 => AgentError::new(ErrorCode::DocLlmFailed, message)
            .with_recoverable(false)
            .with_context(context),
        s if s >= 500 => AgentError::new(ErrorCode::DocLlmFailed, message)
            .with_recoverable(true)
            .with_context(context),
        _ => AgentError::new(ErrorCode::DocLlmFailed, message)
            .with_recoverable(false)
            .with_context(context),
    }
}

/// Credits exhaustion triggers immediate fallback with no retry.
pub fn is_credits_error(err: &AgentError) -> bool {
    if err.context.get("status").and_then(|v| v.as_u64()) == Some(402) {
        return true;
    }
    let msg = err.message.to_lowercase();
    msg.contains("credits") || msg.contains("insufficient") || msg.contains("can only afford")
}

/// Delay before retry `attempt` (1-based count of failures so far).
pub(crate) fn retry_delay(attempt: u32, retry_after: Option<u64>) -> Duration {
    match retry_after {
        Some(seconds) => Duration::from_secs(seconds.min(30)),
        None => {
            let ms = 1000u64.saturating_mul(1 << (attempt.saturating_sub(1)).min(10));
            Duration::from_millis(ms.min(30_000))
        }
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() > 200 {
        format!("{}...", &trimmed[..200])
    } else {
        trimmed.to_string()
    }
}
