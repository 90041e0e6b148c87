//! Specialist capabilities the orchestrator routes sub-tasks to.
//!
//! # Key Concepts
//! - Planner: rewrites the query and decomposes it into a task plan
//! - Researcher: fused retrieval plus a summary of what the evidence says
//! - Validator: critiques findings against the raw evidence
//! - Synthesizer: writes the cited final report
//!
//! Every prompt is anchored to the clarified query so sub-tasks cannot drift
//! from what the user asked.

mod planner;
mod researcher;
mod synthesizer;
mod validator;

pub use planner::{DraftTask, PlanDraft, PlanOutcome, Planner};
pub use researcher::{ResearchOutput, Researcher};
pub use synthesizer::{Synthesis, SynthesisInput, SynthesisOutput, Synthesizer};
pub use validator::{CritiqueIssue, CritiqueResult, IssueKind, Severity, Validator};

use thiserror::Error;

use crate::llm::LlmError;
use crate::retrieval::RetrievalError;

/// Failure of a capability after the call wrapper gave up.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
