//! Chat-completion client with cost and latency accounting.
//!
//! Provider failures are classified Transient (rate-limit, 5xx, timeout;
//! retried once with backoff) or Permanent (auth, malformed request;
//! surfaced immediately). Every completion carries token usage and a cost
//! estimate from the pricing table.

use crate::config::LlmConfig;
use crate::error::{LlmErrorKind, NobelLmError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

/// Parameters callers may override per request
#[derive(Debug, Clone, Default)]
pub struct CompletionParams {
    pub model_id: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Token counts, provider-reported or estimated
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// True when the provider omitted usage and the fallback estimator ran
    #[serde(default)]
    pub estimated: bool,
}

/// One completed LLM call
#[derive(Debug, Clone)]
pub struct Completion {
    pub answer_text: String,
    pub model_id: String,
    pub token_usage: TokenUsage,
    pub cost_estimate: f64,
    pub latency_ms: u64,
}

#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<Completion>;
    fn model_id(&self) -> &str;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Fallback token estimator when the provider omits usage: roughly four
/// characters per token for English prose.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

/// Cost in USD from per-1k token rates; zero when the model is unpriced
pub fn estimate_cost(config: &LlmConfig, model_id: &str, usage: &TokenUsage) -> f64 {
    match config.pricing_for(model_id) {
        Some(p) => {
            usage.prompt_tokens as f64 / 1000.0 * p.input_per_1k
                + usage.completion_tokens as f64 / 1000.0 * p.output_per_1k
        }
        None => 0.0,
    }
}

/// Client for OpenAI-compatible chat-completion endpoints
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

impl OpenAiCompatClient {
    pub fn new(config: LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| NobelLmError::config(format!("failed to build LLM HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    async fn call_once(
        &self,
        prompt: &str,
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<(String, Option<WireUsage>)> {
        let body = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature,
        };
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NobelLmError::llm(LlmErrorKind::Timeout, format!("request timed out: {}", e))
                } else {
                    NobelLmError::llm(LlmErrorKind::Transient, format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let excerpt: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            let kind = if status.as_u16() == 429 {
                LlmErrorKind::RateLimited
            } else if status.is_server_error() {
                LlmErrorKind::Transient
            } else {
                LlmErrorKind::Permanent
            };
            return Err(NobelLmError::llm(
                kind,
                format!("provider returned {}: {}", status, excerpt),
            ));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            NobelLmError::llm(
                LlmErrorKind::Permanent,
                format!("malformed provider response: {}", e),
            )
        })?;
        let answer = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                NobelLmError::llm(LlmErrorKind::Permanent, "provider returned no choices")
            })?;
        Ok((answer, parsed.usage))
    }
}

#[async_trait]
impl ChatCompleter for OpenAiCompatClient {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<Completion> {
        let model = params
            .model_id
            .clone()
            .unwrap_or_else(|| self.config.model_id.clone());
        let max_tokens = params.max_tokens.unwrap_or(self.config.max_tokens);
        let temperature = params.temperature.unwrap_or(self.config.temperature);

        let start = Instant::now();
        // Rate-limits and 5xx both earn the single retry; a rate-limit that
        // persists keeps its kind so the API layer can answer 429
        let result = match self.call_once(prompt, &model, max_tokens, temperature).await {
            Ok(ok) => Ok(ok),
            Err(NobelLmError::Llm {
                kind: kind @ (LlmErrorKind::Transient | LlmErrorKind::RateLimited),
                message,
            }) => {
                warn!(
                    "{} LLM failure, retrying once: {}",
                    kind.as_str(),
                    message
                );
                tokio::time::sleep(std::time::Duration::from_millis(
                    self.config.retry_backoff_ms,
                ))
                .await;
                self.call_once(prompt, &model, max_tokens, temperature).await
            }
            Err(e) => Err(e),
        };
        let (answer, wire_usage) = result?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let token_usage = match wire_usage {
            Some(u) => TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
                estimated: false,
            },
            None => {
                let prompt_tokens = estimate_tokens(prompt);
                let completion_tokens = estimate_tokens(&answer);
                TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                    estimated: true,
                }
            }
        };
        let cost_estimate = estimate_cost(&self.config, &model, &token_usage);
        debug!(
            "llm completion: model={} tokens={} cost=${:.6} latency={}ms",
            model, token_usage.total_tokens, cost_estimate, latency_ms
        );

        Ok(Completion {
            answer_text: answer,
            model_id: model,
            token_usage,
            cost_estimate,
            latency_ms,
        })
    }

    fn model_id(&self) -> &str {
        &self.config.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelPricing;

    fn config() -> LlmConfig {
        LlmConfig {
            pricing: vec![ModelPricing {
                model_id: "test-model".to_string(),
                input_per_1k: 0.001,
                output_per_1k: 0.002,
            }],
            ..LlmConfig::default()
        }
    }

    #[test]
    fn token_estimator_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn cost_uses_the_pricing_table() {
        let usage = TokenUsage {
            prompt_tokens: 1000,
            completion_tokens: 500,
            total_tokens: 1500,
            estimated: false,
        };
        let cost = estimate_cost(&config(), "test-model", &usage);
        assert!((cost - (0.001 + 0.001)).abs() < 1e-9);
    }

    #[test]
    fn unpriced_model_costs_zero() {
        let usage = TokenUsage {
            prompt_tokens: 1000,
            completion_tokens: 1000,
            total_tokens: 2000,
            estimated: false,
        };
        assert_eq!(estimate_cost(&config(), "mystery-model", &usage), 0.0);
    }
}
