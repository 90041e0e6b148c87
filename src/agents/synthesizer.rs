//! Final report construction.

use serde::Deserialize;
use std::sync::Arc;

use super::{truncate_chars, CritiqueResult};
use crate::citation::{self, CitationDraft};
use crate::confidence;
use crate::config::ContextLimits;
use crate::llm::{Contract, Invoker, LlmError, ModelTier};
use crate::report::{FinalReport, OrphanCitation};
use crate::retrieval::EvidenceChunk;
use crate::state::AgentMessage;

const SYNTHESIS_SYSTEM: &str = r#"You are the Synthesizer of an evidence-based research system.

Write the final answer to the user's query from the research findings, the
validator's critique and the numbered evidence.

Rules:
- Every substantive claim carries a [Source N] reference to the numbered evidence.
- Address every issue the validator raised: correct unsupported claims,
  acknowledge gaps, present both sides of contradictions.
- Add nothing the evidence does not support.

Respond with a JSON object:
{"executive_summary": "2-3 sentences answering the core question",
 "detailed_analysis": "analysis with [Source N] references",
 "recommendations": ["..."],
 "citations": [{"claim": "...", "source": 1}]}"#;

/// Structured synthesis result.
#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisOutput {
    pub executive_summary: String,
    #[serde(default)]
    pub detailed_analysis: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub citations: Vec<CitationDraft>,
}

impl Contract for SynthesisOutput {
    const NAME: &'static str = "SynthesisOutput";

    fn check(&self) -> Result<(), String> {
        if self.executive_summary.trim().is_empty() {
            return Err("empty executive summary".to_string());
        }
        Ok(())
    }
}

pub struct SynthesisInput<'a> {
    pub query: &'a str,
    pub findings: &'a [&'a str],
    pub critique: Option<&'a CritiqueResult>,
    pub evidence: &'a [EvidenceChunk],
    pub audit_trail: Vec<AgentMessage>,
    /// Synthesis is running without a passing validation.
    pub best_effort: bool,
}

/// A report plus what the citation audit found.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub report: FinalReport,
    pub orphans: Vec<OrphanCitation>,
    pub uncited: Vec<String>,
}

pub struct Synthesizer {
    invoker: Arc<Invoker>,
    limits: ContextLimits,
}

impl Synthesizer {
    pub fn new(invoker: Arc<Invoker>, limits: &ContextLimits) -> Self {
        Self {
            invoker,
            limits: limits.clone(),
        }
    }

    pub async fn synthesize(&self, input: SynthesisInput<'_>) -> Result<Synthesis, LlmError> {
        let numbered: Vec<EvidenceChunk> = input
            .evidence
            .iter()
            .take(self.limits.synthesis_evidence_items)
            .cloned()
            .collect();

        let user = self.prompt(&input, &numbered);
        let output = self
            .invoker
            .structured::<SynthesisOutput>(ModelTier::Primary, SYNTHESIS_SYSTEM, &user)
            .await?;

        let drafts = if output.citations.is_empty() {
            citation::drafts_from_text(&output.detailed_analysis)
        } else {
            output.citations.clone()
        };
        let resolution = citation::resolve(&drafts, &numbered, input.evidence);
        let uncited = citation::find_uncited_claims(&output.detailed_analysis);

        let critique_confidence = input.critique.map(|c| c.confidence).unwrap_or(0.0);
        let breakdown = confidence::aggregate(critique_confidence, &resolution.citations, input.evidence);
        tracing::info!(
            "Synthesized report: {} citations, {} orphans, confidence {} ({:.3})",
            resolution.citations.len(),
            resolution.orphans.len(),
            breakdown.level,
            breakdown.score
        );

        Ok(Synthesis {
            report: FinalReport {
                query: input.query.to_string(),
                executive_summary: output.executive_summary,
                detailed_analysis: output.detailed_analysis,
                recommendations: output.recommendations,
                citations: resolution.citations,
                confidence: breakdown,
                degraded: false,
                reviewer_note: None,
                audit_trail: input.audit_trail,
            },
            orphans: resolution.orphans,
            uncited,
        })
    }

    fn prompt(&self, input: &SynthesisInput<'_>, numbered: &[EvidenceChunk]) -> String {
        let findings = if input.findings.is_empty() {
            "(No research available)".to_string()
        } else {
            input.findings.join("\n\n")
        };

        let critique = match input.critique {
            Some(c) => {
                let issues: Vec<String> = c
                    .issues
                    .iter()
                    .map(|i| format!("- [{:?}] {}: {}", i.severity, i.kind, i.description))
                    .collect();
                format!("{}\n{}\n{}", c.summary(), c.assessment, issues.join("\n"))
            }
            None => "(No critique available)".to_string(),
        };

        let evidence = if numbered.is_empty() {
            "(No evidence)".to_string()
        } else {
            numbered
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    format!(
                        "[Source {}: {} | ID: {}]\n{}",
                        i + 1,
                        c.document_id,
                        c.id,
                        truncate_chars(&c.text, self.limits.synthesis_evidence_chars)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n---\n\n")
        };

        let mut prompt = format!(
            "ORIGINAL QUERY: {}\n\nRESEARCH FINDINGS:\n{}\n\nVALIDATOR CRITIQUE:\n{}\n\nAVAILABLE EVIDENCE:\n{}\n\n",
            input.query,
            truncate_chars(&findings, self.limits.findings_chars),
            truncate_chars(&critique, self.limits.critique_chars),
            evidence
        );
        if input.best_effort {
            prompt.push_str(
                "NOTE: validation did not pass. Produce the best answer the evidence allows \
                 and state its limitations.\n\n",
            );
        }
        prompt.push_str("Now produce the final report:");
        prompt
    }
}
