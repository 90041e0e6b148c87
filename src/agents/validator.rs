//! Critique of research findings against the raw evidence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::truncate_chars;
use crate::config::ContextLimits;
use crate::llm::{Contract, Invoker, LlmError, ModelTier};
use crate::retrieval::EvidenceChunk;

const VALIDATOR_SYSTEM: &str = r#"You are the Validator of an evidence-based research system.

Critically evaluate research findings against the raw evidence they are based on.

Check for:
1. Hallucination: claims, figures or names not supported by the evidence.
2. Logical gaps: conclusions that do not follow from the evidence.
3. Contradictions: sources that disagree, and whether both sides are acknowledged.
4. Weak evidence: claims resting on insufficient or questionable support.
5. Incompleteness: parts of the query left unaddressed.

Classify each issue as "hallucination", "logical_gap", "weak_evidence",
"contradiction" or "incomplete", and rate its severity "low", "medium",
"high" or "critical".

Set "passed" to true only if there are no high or critical issues and the
overall quality is acceptable. Set "confidence" between 0 and 1.

Respond with a JSON object:
{"passed": false, "confidence": 0.2, "assessment": "...",
 "issues": [{"kind": "hallucination", "description": "...", "affected_claim": "...",
             "severity": "high", "suggested_action": "..."}]}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Hallucination,
    LogicalGap,
    WeakEvidence,
    Contradiction,
    Incomplete,
    /// A sub-task that failed outright.
    Failure,
    #[serde(other)]
    Other,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hallucination => "hallucination",
            Self::LogicalGap => "logical gap",
            Self::WeakEvidence => "weak evidence",
            Self::Contradiction => "contradiction",
            Self::Incomplete => "incomplete",
            Self::Failure => "failure",
            Self::Other => "other",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueIssue {
    pub kind: IssueKind,
    pub description: String,
    #[serde(default)]
    pub affected_claim: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub suggested_action: String,
}

impl CritiqueIssue {
    /// Tagged critical, or high severity of a kind that undermines the answer.
    pub fn is_critical(&self) -> bool {
        match self.severity {
            Severity::Critical => true,
            Severity::High => matches!(self.kind, IssueKind::Hallucination | IssueKind::Contradiction),
            _ => false,
        }
    }
}

/// One validation verdict. Each validation step supersedes the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueResult {
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<CritiqueIssue>,
    #[serde(default)]
    pub assessment: String,
    pub confidence: f64,
}

impl Contract for CritiqueResult {
    const NAME: &'static str = "CritiqueResult";

    fn check(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        Ok(())
    }
}

impl CritiqueResult {
    pub fn critical_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_critical()).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "Review {} (confidence: {:.2}). Issues found: {}.",
            if self.passed { "PASSED" } else { "FAILED" },
            self.confidence,
            self.issues.len()
        )
    }
}

pub struct Validator {
    invoker: Arc<Invoker>,
    evidence_chars: usize,
    evidence_items: usize,
    findings_chars: usize,
}

impl Validator {
    pub fn new(invoker: Arc<Invoker>, limits: &ContextLimits) -> Self {
        Self {
            invoker,
            evidence_chars: limits.evidence_chars,
            evidence_items: limits.validation_evidence_items,
            findings_chars: limits.findings_chars,
        }
    }

    /// Critique `findings` against `evidence`.
    ///
    /// Without findings there is nothing to check; the verdict fails with
    /// zero confidence and no model call is made.
    pub async fn validate(
        &self,
        anchored_query: &str,
        findings: &[&str],
        evidence: &[EvidenceChunk],
    ) -> Result<CritiqueResult, LlmError> {
        if findings.is_empty() {
            tracing::warn!("No research findings to validate");
            return Ok(CritiqueResult {
                passed: false,
                issues: vec![CritiqueIssue {
                    kind: IssueKind::Incomplete,
                    description: "No research findings were available to validate".to_string(),
                    affected_claim: String::new(),
                    severity: Severity::High,
                    suggested_action: format!("Research: {}", anchored_query),
                }],
                assessment: "No research findings to evaluate.".to_string(),
                confidence: 0.0,
            });
        }

        let joined = findings.join("\n\n");
        let evidence_block = if evidence.is_empty() {
            "(No raw evidence available)".to_string()
        } else {
            evidence
                .iter()
                .take(self.evidence_items)
                .enumerate()
                .map(|(i, c)| {
                    format!(
                        "[Evidence {} from {}]: {}",
                        i + 1,
                        c.document_id,
                        truncate_chars(&c.text, self.evidence_chars)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let user = format!(
            "ORIGINAL QUERY: {}\n\nRESEARCH FINDINGS:\n{}\n\nRAW RETRIEVED EVIDENCE:\n{}\n\nNow perform your critique:",
            anchored_query,
            truncate_chars(&joined, self.findings_chars),
            evidence_block
        );

        let critique = self
            .invoker
            .structured::<CritiqueResult>(ModelTier::Primary, VALIDATOR_SYSTEM, &user)
            .await?;
        tracing::info!("{}", critique.summary());
        Ok(critique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(kind: IssueKind, severity: Severity) -> CritiqueIssue {
        CritiqueIssue {
            kind,
            description: "d".into(),
            affected_claim: String::new(),
            severity,
            suggested_action: String::new(),
        }
    }

    #[test]
    fn test_critical_classification() {
        assert!(issue(IssueKind::WeakEvidence, Severity::Critical).is_critical());
        assert!(issue(IssueKind::Hallucination, Severity::High).is_critical());
        assert!(issue(IssueKind::Contradiction, Severity::High).is_critical());
        assert!(!issue(IssueKind::LogicalGap, Severity::High).is_critical());
        assert!(!issue(IssueKind::Hallucination, Severity::Medium).is_critical());
    }

    #[test]
    fn test_contract_parses_and_checks_range() {
        let ok: CritiqueResult = serde_json::from_str(
            r#"{"passed": false, "confidence": 0.4, "issues": [
                {"kind": "hallucination", "description": "bad figure", "severity": "high"},
                {"kind": "something_new", "description": "odd"}
            ]}"#,
        )
        .unwrap();
        assert!(ok.check().is_ok());
        assert_eq!(ok.issues[1].kind, IssueKind::Other);
        assert_eq!(ok.issues[1].severity, Severity::Medium);
        assert_eq!(ok.critical_count(), 1);

        let bad: CritiqueResult = serde_json::from_str(r#"{"passed": true, "confidence": 1.7}"#).unwrap();
        assert!(bad.check().is_err());
    }
}
