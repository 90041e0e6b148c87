//! Capability wrapper around an [`LlmClient`].
//!
//! Every call blocks on the shared [`RateLimiter`], transient failures are
//! retried with exponential backoff, and structured results are checked
//! against their [`Contract`] before they can reach shared state.

use std::sync::Arc;
use std::time::Duration;

use super::contract::{parse_contract, Contract};
use super::error::LlmError;
use super::rate_limit::RateLimiter;
use super::{ChatMessage, ChatOptions, LlmClient};
use crate::config::{CallPolicy, ModelConfig};

/// Which configured model serves a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Large reasoning model: planning, validation, synthesis.
    Primary,
    /// Cheaper model: research summaries and sufficiency checks.
    Secondary,
}

/// Bounded retry with exponential delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub floor: Duration,
    pub ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&CallPolicy::default())
    }
}

impl From<&CallPolicy> for RetryPolicy {
    fn from(policy: &CallPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts.max(1),
            floor: policy.backoff_floor(),
            ceiling: policy.backoff_ceiling(),
        }
    }
}

/// Delay before retry number `retry` (0-based): `floor * 2^retry`, clamped to the ceiling.
pub fn backoff_delay(policy: &RetryPolicy, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry);
    policy
        .floor
        .saturating_mul(factor)
        .clamp(policy.floor, policy.ceiling.max(policy.floor))
}

/// Rate-limited, retrying access to the generation capability.
pub struct Invoker {
    client: Arc<dyn LlmClient>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    models: ModelConfig,
}

impl Invoker {
    pub fn new(
        client: Arc<dyn LlmClient>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        models: ModelConfig,
    ) -> Self {
        Self {
            client,
            limiter,
            retry,
            models,
        }
    }

    fn model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Primary => &self.models.primary_model,
            ModelTier::Secondary => &self.models.secondary_model,
        }
    }

    fn default_temperature(&self, tier: ModelTier) -> f64 {
        match tier {
            ModelTier::Primary => self.models.temperature_reasoning,
            ModelTier::Secondary => self.models.temperature_creative,
        }
    }

    /// Free-text generation.
    pub async fn text(&self, tier: ModelTier, system: &str, user: &str) -> Result<String, LlmError> {
        let options = ChatOptions {
            temperature: Some(self.default_temperature(tier)),
            ..Default::default()
        };
        self.call(tier, system, user, options).await
    }

    /// Structured generation checked against `T`'s contract.
    ///
    /// Malformed output is returned as an error and is not retried here.
    pub async fn structured<T: Contract>(
        &self,
        tier: ModelTier,
        system: &str,
        user: &str,
    ) -> Result<T, LlmError> {
        let options = ChatOptions {
            temperature: Some(self.default_temperature(tier)),
            json_response: true,
            ..Default::default()
        };
        let raw = self.call(tier, system, user, options).await?;
        let parsed = parse_contract::<T>(&raw);
        if let Err(e) = &parsed {
            tracing::warn!("Rejected {} output: {}", T::NAME, e.message);
        }
        parsed
    }

    async fn call(
        &self,
        tier: ModelTier,
        system: &str,
        user: &str,
        options: ChatOptions,
    ) -> Result<String, LlmError> {
        let model = self.model(tier);
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let mut attempt = 1;

        loop {
            self.limiter.acquire().await;
            let started = tokio::time::Instant::now();

            match self.client.chat_completion(model, &messages, &options).await {
                Ok(response) => {
                    tracing::info!(
                        "LLM call completed: model={} latency={:?} attempt={}",
                        model,
                        started.elapsed(),
                        attempt
                    );
                    return response
                        .content
                        .filter(|c| !c.trim().is_empty())
                        .ok_or_else(|| LlmError::malformed("empty response content"));
                }
                Err(error) if error.is_transient() && attempt < self.retry.max_attempts => {
                    let mut delay = backoff_delay(&self.retry, attempt - 1);
                    if let Some(hint) = error.retry_after {
                        delay = delay.max(hint.min(self.retry.ceiling));
                    }
                    tracing::warn!(
                        "Attempt {} failed with {}, retrying in {:?}: {}",
                        attempt,
                        error.kind,
                        delay,
                        error.message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    if error.is_transient() {
                        tracing::error!("LLM call failed after {} attempts: {}", attempt, error);
                    } else {
                        tracing::error!("LLM call failed (non-retryable): {}", error);
                    }
                    return Err(error);
                }
            }
        }
    }
}
