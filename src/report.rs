//! The final answer and what a run hands back to its caller.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::confidence::ConfidenceBreakdown;
use crate::orchestrator::TerminationReason;
use crate::retrieval::ChunkId;
use crate::state::AgentMessage;

/// Links a claim in the report to a retrieved document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub claim: String,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<ChunkId>,
}

impl Citation {
    pub fn new(claim: impl Into<String>, document_id: impl Into<String>, chunk_id: Option<ChunkId>) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("cite-{}", &id[..8]),
            claim: claim.into(),
            document_id: document_id.into(),
            chunk_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub query: String,
    pub executive_summary: String,
    pub detailed_analysis: String,
    pub recommendations: Vec<String>,
    pub citations: Vec<Citation>,
    pub confidence: ConfidenceBreakdown,
    /// Set when a budget stopped the run before a normal synthesis.
    pub degraded: bool,
    /// Human reply collected after a low-confidence synthesis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_note: Option<String>,
    pub audit_trail: Vec<AgentMessage>,
}

impl FinalReport {
    /// Empty report returned when the step budget runs out before synthesis.
    pub fn degraded(query: impl Into<String>, audit_trail: Vec<AgentMessage>) -> Self {
        Self {
            query: query.into(),
            executive_summary: "The run stopped before a report could be synthesized.".to_string(),
            detailed_analysis: String::new(),
            recommendations: Vec::new(),
            citations: Vec::new(),
            confidence: ConfidenceBreakdown::empty(),
            degraded: true,
            reviewer_note: None,
            audit_trail,
        }
    }
}

/// A citation dropped because its document was never retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanCitation {
    pub claim: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedSubTask {
    pub description: String,
    pub capability: String,
    pub error: String,
}

/// Bookkeeping for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub research_rounds: u32,
    pub validation_rounds: u32,
    pub total_steps: u32,
    pub escalated: bool,
    pub escalations: u32,
    pub orphan_citations: Vec<OrphanCitation>,
    pub uncited_statements: Vec<String>,
    pub failed_sub_tasks: Vec<FailedSubTask>,
    pub messages_dropped: usize,
    pub termination: TerminationReason,
    pub degraded: bool,
}

/// Everything a run returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub report: FinalReport,
    pub confidence: ConfidenceBreakdown,
    pub metadata: RunMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::ConfidenceLevel;

    #[test]
    fn test_degraded_report_is_empty_and_low() {
        let report = FinalReport::degraded("q", Vec::new());
        assert!(report.degraded);
        assert!(report.citations.is_empty());
        assert_eq!(report.confidence.level, ConfidenceLevel::Low);
        assert_eq!(report.confidence.score, 0.0);
    }

    #[test]
    fn test_citation_ids_are_unique() {
        let a = Citation::new("claim", "a.md", None);
        let b = Citation::new("claim", "a.md", None);
        assert!(a.id.starts_with("cite-"));
        assert_ne!(a.id, b.id);
    }
}
