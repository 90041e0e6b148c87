//! Runtime configuration.
//!
//! Every section has a `Default` matching the documented behaviour, can be
//! overridden from the environment (`Config::from_env`) or loaded from a JSON
//! file (`Config::from_file`). `Config::validate` runs before any scheduling so
//! invalid caps fail fast instead of surfacing mid-run.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors detected before a run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be within [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },

    #[error("{0}")]
    Inconsistent(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level configuration aggregating all sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub models: ModelConfig,
    pub retrieval: RetrievalConfig,
    pub limits: AgentLimits,
    pub escalation: EscalationConfig,
    pub calls: CallPolicy,
    pub context: ContextLimits,
}

/// Generation and embedding model routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API.
    pub api_base: String,
    /// Never written back to disk.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Planning, validation and synthesis.
    pub primary_model: String,
    /// Research summaries and sufficiency checks.
    pub secondary_model: String,
    pub embedding_model: String,
    pub temperature_reasoning: f64,
    pub temperature_creative: f64,
    /// Rewrite the user query for clarity before planning.
    pub rewrite_query: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            primary_model: "openai/gpt-4o".to_string(),
            secondary_model: "openai/gpt-4o-mini".to_string(),
            embedding_model: "openai/text-embedding-3-small".to_string(),
            temperature_reasoning: 0.1,
            temperature_creative: 0.4,
            rewrite_query: true,
        }
    }
}

/// Ingestion and fusion retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub semantic_top_k: usize,
    pub lexical_top_k: usize,
    /// Length of the fused result list.
    pub fused_top_n: usize,
    pub rrf_k: f64,
    pub cache_ttl_secs: u64,
    /// Upper bound on cached `(query, k)` result lists.
    pub cache_max_entries: u64,
    /// Dimension of the offline hashing embedder.
    pub embedding_dimensions: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            semantic_top_k: 8,
            lexical_top_k: 5,
            fused_top_n: 6,
            rrf_k: 60.0,
            cache_ttl_secs: 300,
            cache_max_entries: 1_024,
            embedding_dimensions: 256,
        }
    }
}

impl RetrievalConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Iteration budgets. These double as cooperative cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLimits {
    /// Global scheduler steps per run.
    pub max_iterations: u32,
    pub max_research_iterations: u32,
    pub max_validation_rounds: u32,
    /// Planner re-runs after a clarification.
    pub max_clarifications: u32,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_research_iterations: 5,
            max_validation_rounds: 3,
            max_clarifications: 2,
        }
    }
}

/// Human-in-the-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub enabled: bool,
    pub confidence_threshold: f64,
    /// Number of critical issues that forces escalation on its own.
    pub critical_issue_limit: usize,
    pub timeout_secs: u64,
    /// Used as the clarification when the human channel times out.
    /// `None` means "proceed without clarification".
    pub default_clarification: Option<String>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: 0.7,
            critical_issue_limit: 2,
            timeout_secs: 300,
            default_clarification: None,
        }
    }
}

impl EscalationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Policy applied to every capability call at the wrapper boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPolicy {
    /// Sliding-window cap shared by all capability calls.
    pub rate_limit_per_minute: u32,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff_floor_ms: u64,
    pub backoff_ceiling_ms: u64,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 60,
            max_attempts: 3,
            backoff_floor_ms: 2_000,
            backoff_ceiling_ms: 30_000,
        }
    }
}

impl CallPolicy {
    pub fn backoff_floor(&self) -> Duration {
        Duration::from_millis(self.backoff_floor_ms)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.backoff_ceiling_ms)
    }
}

/// Context-window fitting constants. Empirical defaults, not invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextLimits {
    pub max_messages: usize,
    /// Leading messages that survive log truncation.
    pub retained_prefix: usize,
    /// Per-chunk characters shown to the validator.
    pub evidence_chars: usize,
    /// Per-chunk characters shown to the synthesizer.
    pub synthesis_evidence_chars: usize,
    pub findings_chars: usize,
    pub critique_chars: usize,
    pub validation_evidence_items: usize,
    pub synthesis_evidence_items: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_messages: 50,
            retained_prefix: 5,
            evidence_chars: 500,
            synthesis_evidence_chars: 600,
            findings_chars: 4000,
            critique_chars: 2000,
            validation_evidence_items: 15,
            synthesis_evidence_items: 12,
        }
    }
}

impl Config {
    /// Build a config from defaults overridden by environment variables.
    ///
    /// Recognised variables:
    /// - `EVIDENTIA_API_BASE`, `OPENROUTER_API_KEY` / `OPENAI_API_KEY`
    /// - `PRIMARY_MODEL`, `SECONDARY_MODEL`, `EMBEDDING_MODEL`
    /// - `CHUNK_SIZE`, `CHUNK_OVERLAP`
    /// - `MAX_ITERATIONS`, `MAX_RESEARCH_ITERATIONS`, `MAX_VALIDATION_ROUNDS`
    /// - `CONFIDENCE_THRESHOLD`, `RATE_LIMIT_RPM`
    /// - `HITL_ENABLED`, `HITL_TIMEOUT_SECONDS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(base) = std::env::var("EVIDENTIA_API_BASE") {
            config.models.api_base = base;
        }
        config.models.api_key = std::env::var("OPENROUTER_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty());
        if let Ok(model) = std::env::var("PRIMARY_MODEL") {
            config.models.primary_model = model;
        }
        if let Ok(model) = std::env::var("SECONDARY_MODEL") {
            config.models.secondary_model = model;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.models.embedding_model = model;
        }

        config.retrieval.chunk_size = env_or("CHUNK_SIZE", config.retrieval.chunk_size)?;
        config.retrieval.chunk_overlap = env_or("CHUNK_OVERLAP", config.retrieval.chunk_overlap)?;

        config.limits.max_iterations = env_or("MAX_ITERATIONS", config.limits.max_iterations)?;
        config.limits.max_research_iterations =
            env_or("MAX_RESEARCH_ITERATIONS", config.limits.max_research_iterations)?;
        config.limits.max_validation_rounds =
            env_or("MAX_VALIDATION_ROUNDS", config.limits.max_validation_rounds)?;

        config.escalation.confidence_threshold =
            env_or("CONFIDENCE_THRESHOLD", config.escalation.confidence_threshold)?;
        config.escalation.enabled = env_or("HITL_ENABLED", config.escalation.enabled)?;
        config.escalation.timeout_secs =
            env_or("HITL_TIMEOUT_SECONDS", config.escalation.timeout_secs)?;

        config.calls.rate_limit_per_minute =
            env_or("RATE_LIMIT_RPM", config.calls.rate_limit_per_minute)?;

        Ok(config)
    }

    /// Load a JSON config file. Missing sections take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject values that would make the scheduler misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if limits.max_iterations == 0 {
            return Err(ConfigError::Zero { field: "limits.max_iterations" });
        }
        if limits.max_research_iterations == 0 {
            return Err(ConfigError::Zero { field: "limits.max_research_iterations" });
        }
        if limits.max_validation_rounds == 0 {
            return Err(ConfigError::Zero { field: "limits.max_validation_rounds" });
        }

        let retrieval = &self.retrieval;
        if retrieval.semantic_top_k == 0 {
            return Err(ConfigError::Zero { field: "retrieval.semantic_top_k" });
        }
        if retrieval.lexical_top_k == 0 {
            return Err(ConfigError::Zero { field: "retrieval.lexical_top_k" });
        }
        if retrieval.fused_top_n == 0 {
            return Err(ConfigError::Zero { field: "retrieval.fused_top_n" });
        }
        if retrieval.cache_max_entries == 0 {
            return Err(ConfigError::Zero { field: "retrieval.cache_max_entries" });
        }
        if retrieval.chunk_size == 0 {
            return Err(ConfigError::Zero { field: "retrieval.chunk_size" });
        }
        if retrieval.embedding_dimensions == 0 {
            return Err(ConfigError::Zero { field: "retrieval.embedding_dimensions" });
        }
        if retrieval.chunk_overlap >= retrieval.chunk_size {
            return Err(ConfigError::Inconsistent(format!(
                "retrieval.chunk_overlap ({}) must be smaller than chunk_size ({})",
                retrieval.chunk_overlap, retrieval.chunk_size
            )));
        }
        if !(retrieval.rrf_k.is_finite() && retrieval.rrf_k >= 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "retrieval.rrf_k".to_string(),
                value: retrieval.rrf_k.to_string(),
            });
        }

        let threshold = self.escalation.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::OutOfUnitRange {
                field: "escalation.confidence_threshold",
                value: threshold,
            });
        }

        let calls = &self.calls;
        if calls.rate_limit_per_minute == 0 {
            return Err(ConfigError::Zero { field: "calls.rate_limit_per_minute" });
        }
        if calls.max_attempts == 0 {
            return Err(ConfigError::Zero { field: "calls.max_attempts" });
        }
        if calls.backoff_floor_ms > calls.backoff_ceiling_ms {
            return Err(ConfigError::Inconsistent(format!(
                "calls.backoff_floor_ms ({}) exceeds backoff_ceiling_ms ({})",
                calls.backoff_floor_ms, calls.backoff_ceiling_ms
            )));
        }

        let context = &self.context;
        if context.max_messages <= context.retained_prefix {
            return Err(ConfigError::Inconsistent(format!(
                "context.max_messages ({}) must exceed retained_prefix ({})",
                context.max_messages, context.retained_prefix
            )));
        }

        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}
