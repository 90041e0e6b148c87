//! Confidence aggregation for a finished report.
//!
//! ```text
//! score = clamp(0.60 * critique + 0.25 * citation_ratio + 0.15 * coverage, 0, 1)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::report::Citation;
use crate::retrieval::EvidenceChunk;

const CRITIQUE_WEIGHT: f64 = 0.60;
const CITATION_WEIGHT: f64 = 0.25;
const COVERAGE_WEIGHT: f64 = 0.15;

const HIGH_THRESHOLD: f64 = 0.8;
const MEDIUM_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_THRESHOLD {
            Self::High
        } else if score >= MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        };
        write!(f, "{}", s)
    }
}

/// Every input and intermediate of the confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub critique_confidence: f64,
    pub citation_ratio: f64,
    pub evidence_coverage: f64,
    pub score: f64,
    pub level: ConfidenceLevel,
}

impl ConfidenceBreakdown {
    /// Score for a run that produced no evidence and no critique.
    pub fn empty() -> Self {
        aggregate(0.0, &[], &[])
    }
}

/// Combine critique confidence with citation density and document coverage.
pub fn aggregate(critique_confidence: f64, citations: &[Citation], chunks: &[EvidenceChunk]) -> ConfidenceBreakdown {
    let critique_confidence = critique_confidence.clamp(0.0, 1.0);

    let (citation_ratio, evidence_coverage) = if chunks.is_empty() {
        (0.0, 0.0)
    } else {
        let ratio = (citations.len() as f64 / chunks.len() as f64).min(1.0);

        let retrieved: HashSet<&str> = chunks.iter().map(|c| c.document_id.as_str()).collect();
        let cited: HashSet<&str> = citations
            .iter()
            .map(|c| c.document_id.as_str())
            .filter(|d| retrieved.contains(d))
            .collect();
        (ratio, cited.len() as f64 / retrieved.len() as f64)
    };

    let score = (CRITIQUE_WEIGHT * critique_confidence
        + CITATION_WEIGHT * citation_ratio
        + COVERAGE_WEIGHT * evidence_coverage)
        .clamp(0.0, 1.0);

    ConfidenceBreakdown {
        critique_confidence,
        citation_ratio,
        evidence_coverage,
        score,
        level: ConfidenceLevel::from_score(score),
    }
}
