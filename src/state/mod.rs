//! Per-query shared state.
//!
//! Owned by the orchestrator and mutated by one capability at a time. The
//! four counters only ever increase.

mod messages;

pub use messages::{AgentMessage, AgentRole, MessageLog};

use serde::Serialize;
use std::collections::HashSet;

use crate::agents::CritiqueResult;
use crate::config::ContextLimits;
use crate::orchestrator::EscalationReason;
use crate::report::FinalReport;
use crate::retrieval::{ChunkId, EvidenceChunk};
use crate::task::TaskPlan;

/// Run budgets consumed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub steps: u32,
    pub research_rounds: u32,
    pub validation_rounds: u32,
    pub escalations: u32,
}

pub struct SharedState {
    query: String,
    clarified_query: Option<String>,
    pub plan: Option<TaskPlan>,
    pub messages: MessageLog,
    evidence: Vec<EvidenceChunk>,
    seen: HashSet<ChunkId>,
    pub critique: Option<CritiqueResult>,
    pub report: Option<FinalReport>,
    pub pending_escalation: Option<EscalationReason>,
    /// Question raised by the planner when the query was ambiguous.
    pub ambiguity: Option<String>,
    counters: Counters,
}

impl SharedState {
    pub fn new(query: impl Into<String>, limits: &ContextLimits) -> Self {
        Self {
            query: query.into(),
            clarified_query: None,
            plan: None,
            messages: MessageLog::new(limits.max_messages, limits.retained_prefix),
            evidence: Vec::new(),
            seen: HashSet::new(),
            critique: None,
            report: None,
            pending_escalation: None,
            ambiguity: None,
            counters: Counters::default(),
        }
    }

    /// The query as the user asked it.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The query every capability is anchored to: the clarified form when
    /// there is one, otherwise the original.
    pub fn anchor_query(&self) -> &str {
        self.clarified_query.as_deref().unwrap_or(&self.query)
    }

    pub fn set_clarified_query(&mut self, query: impl Into<String>) {
        let query = query.into();
        if !query.trim().is_empty() {
            self.clarified_query = Some(query);
        }
    }

    /// Fold a human clarification into the anchored query.
    pub fn add_clarification(&mut self, clarification: &str) {
        let anchored = format!("{} [User clarification: {}]", self.anchor_query(), clarification.trim());
        self.clarified_query = Some(anchored);
    }

    /// Add chunks not seen before, keeping arrival order. Returns how many were new.
    pub fn add_evidence(&mut self, chunks: impl IntoIterator<Item = EvidenceChunk>) -> usize {
        let mut added = 0;
        for chunk in chunks {
            if self.seen.insert(chunk.id.clone()) {
                self.evidence.push(chunk);
                added += 1;
            }
        }
        added
    }

    pub fn evidence(&self) -> &[EvidenceChunk] {
        &self.evidence
    }

    pub fn push_message(&mut self, message: AgentMessage) {
        self.messages.push(message);
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn record_step(&mut self) {
        self.counters.steps += 1;
    }

    pub fn record_research_round(&mut self) {
        self.counters.research_rounds += 1;
    }

    pub fn record_validation_round(&mut self) {
        self.counters.validation_rounds += 1;
    }

    pub fn record_escalation(&mut self) {
        self.counters.escalations += 1;
    }
}
