//! Escalation gate and the human channel.
//!
//! The gate runs after planning and after every validation step. Any of
//! these triggers it:
//! - the planner flagged the query as ambiguous
//! - the latest critique confidence is below the threshold
//! - the latest critique carries too many critical issues
//!
//! After synthesis a LOW confidence level triggers it as well; that reply
//! becomes the report's reviewer note.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::EscalationConfig;
use crate::state::SharedState;

/// Why a run paused for a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EscalationReason {
    AmbiguousQuery { question: String },
    LowConfidence { confidence: f64, threshold: f64 },
    CriticalIssues { count: usize },
    LowFinalConfidence { score: f64 },
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbiguousQuery { .. } => write!(f, "query is ambiguous"),
            Self::LowConfidence {
                confidence,
                threshold,
            } => write!(
                f,
                "validation confidence {:.2} is below {:.2}",
                confidence, threshold
            ),
            Self::CriticalIssues { count } => write!(f, "{} critical issues found", count),
            Self::LowFinalConfidence { score } => {
                write!(f, "final report confidence is LOW ({:.2})", score)
            }
        }
    }
}

/// What the human is shown.
#[derive(Debug, Clone, Serialize)]
pub struct HumanRequest {
    pub reason: EscalationReason,
    pub question: String,
    pub context: String,
}

impl HumanRequest {
    pub fn new(reason: EscalationReason, anchored_query: &str) -> Self {
        let question = match &reason {
            EscalationReason::AmbiguousQuery { question } => question.clone(),
            EscalationReason::LowConfidence { .. } | EscalationReason::CriticalIssues { .. } => {
                "The evidence may not support a reliable answer. Add a clarification to \
                 focus the research, or reply empty to proceed."
                    .to_string()
            }
            EscalationReason::LowFinalConfidence { .. } => {
                "The final report has LOW confidence. Add a reviewer note, or reply empty \
                 to accept it as is."
                    .to_string()
            }
        };
        Self {
            reason,
            question,
            context: format!("Query: {}", anchored_query),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanReply {
    Clarified(String),
    Proceed,
    TimedOut,
}

/// Where escalations go.
#[async_trait]
pub trait HumanChannel: Send + Sync {
    /// Ask and wait at most `timeout`. Implementations may return
    /// [`HumanReply::TimedOut`] themselves; the caller also enforces the limit.
    async fn ask(&self, request: &HumanRequest, timeout: Duration) -> HumanReply;
}

/// Channel that never involves a human: every escalation proceeds.
pub struct AutoProceed;

#[async_trait]
impl HumanChannel for AutoProceed {
    async fn ask(&self, _request: &HumanRequest, _timeout: Duration) -> HumanReply {
        HumanReply::Proceed
    }
}

/// The first gate condition that holds, if any.
pub fn escalation_reason(state: &SharedState, cfg: &EscalationConfig) -> Option<EscalationReason> {
    if let Some(question) = &state.ambiguity {
        return Some(EscalationReason::AmbiguousQuery {
            question: question.clone(),
        });
    }

    let critique = state.critique.as_ref()?;
    if critique.confidence < cfg.confidence_threshold {
        return Some(EscalationReason::LowConfidence {
            confidence: critique.confidence,
            threshold: cfg.confidence_threshold,
        });
    }
    let critical = critique.critical_count();
    if critical >= cfg.critical_issue_limit {
        return Some(EscalationReason::CriticalIssues { count: critical });
    }
    None
}

pub fn should_escalate(state: &SharedState, cfg: &EscalationConfig) -> bool {
    cfg.enabled && escalation_reason(state, cfg).is_some()
}

/// What a timeout turns into.
pub fn default_disposition(cfg: &EscalationConfig) -> HumanReply {
    match &cfg.default_clarification {
        Some(text) => HumanReply::Clarified(text.clone()),
        None => HumanReply::Proceed,
    }
}

/// Ask through `channel`, bounded by the configured timeout.
///
/// Never returns [`HumanReply::TimedOut`]: a timeout is replaced by the
/// default disposition. The second value reports whether that happened.
pub async fn ask_human(channel: &dyn HumanChannel, request: &HumanRequest, cfg: &EscalationConfig) -> (HumanReply, bool) {
    let limit = cfg.timeout();
    let reply = match tokio::time::timeout(limit, channel.ask(request, limit)).await {
        Ok(reply) => reply,
        Err(_) => HumanReply::TimedOut,
    };
    match reply {
        HumanReply::TimedOut => {
            tracing::warn!("No human reply within {:?}; applying default disposition", limit);
            (default_disposition(cfg), true)
        }
        HumanReply::Clarified(text) if text.trim().is_empty() => (HumanReply::Proceed, false),
        other => (other, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{CritiqueIssue, CritiqueResult, IssueKind, Severity};
    use crate::config::ContextLimits;

    fn critique(confidence: f64, critical: usize) -> CritiqueResult {
        CritiqueResult {
            passed: critical == 0,
            issues: (0..critical)
                .map(|_| CritiqueIssue {
                    kind: IssueKind::Hallucination,
                    description: "fabricated figure".into(),
                    affected_claim: String::new(),
                    severity: Severity::High,
                    suggested_action: String::new(),
                })
                .collect(),
            assessment: String::new(),
            confidence,
        }
    }

    fn state_with(c: Option<CritiqueResult>) -> SharedState {
        let mut s = SharedState::new("q", &ContextLimits::default());
        s.critique = c;
        s
    }

    #[test]
    fn test_low_confidence_escalates() {
        let s = state_with(Some(critique(0.4, 0)));
        let cfg = EscalationConfig::default();
        assert!(should_escalate(&s, &cfg));
        assert!(matches!(
            escalation_reason(&s, &cfg),
            Some(EscalationReason::LowConfidence { .. })
        ));
    }

    #[test]
    fn test_confident_with_one_critical_issue_does_not_escalate() {
        let s = state_with(Some(critique(0.9, 1)));
        assert!(!should_escalate(&s, &EscalationConfig::default()));
    }

    #[test]
    fn test_two_critical_issues_escalate() {
        let s = state_with(Some(critique(0.9, 2)));
        assert_eq!(
            escalation_reason(&s, &EscalationConfig::default()),
            Some(EscalationReason::CriticalIssues { count: 2 })
        );
    }

    #[test]
    fn test_ambiguity_and_disabled_gate() {
        let mut s = state_with(None);
        assert!(!should_escalate(&s, &EscalationConfig::default()));
        s.ambiguity = Some("Which fiscal year?".into());
        assert!(should_escalate(&s, &EscalationConfig::default()));
        let disabled = EscalationConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!should_escalate(&s, &disabled));
    }

    struct Silent;

    #[async_trait]
    impl HumanChannel for Silent {
        async fn ask(&self, _request: &HumanRequest, _timeout: Duration) -> HumanReply {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_applies_default_disposition() {
        let request = HumanRequest::new(
            EscalationReason::CriticalIssues { count: 2 },
            "q",
        );
        let cfg = EscalationConfig::default();
        assert_eq!(ask_human(&Silent, &request, &cfg).await, (HumanReply::Proceed, true));

        let cfg = EscalationConfig {
            default_clarification: Some("focus on cloud".into()),
            ..Default::default()
        };
        assert_eq!(
            ask_human(&Silent, &request, &cfg).await,
            (HumanReply::Clarified("focus on cloud".into()), true)
        );
    }
}
