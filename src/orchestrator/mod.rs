//! Run orchestration.
//!
//! ```text
//!   query ──► Planner ──► TaskPlan
//!                            │
//!          ┌─────────────────┘
//!          ▼
//!     Supervisor::route ──► Invoke ──► Researcher / Validator / Synthesizer
//!          ▲                   │
//!          │                   ├─ critique failed ──► correction (inject research + re-validate)
//!          │                   └─ gate triggered  ──► PauseForHuman
//!          └───────────────────┘
//! ```
//!
//! One coordinating task drives the loop; capabilities run one at a time.
//! Budget exhaustion ends a run with a reason, never an error.

mod correction;
mod escalation;
mod supervisor;

pub use correction::{apply_critique, on_failure, Injection};
pub use escalation::{
    ask_human, default_disposition, escalation_reason, should_escalate, AutoProceed,
    EscalationReason, HumanChannel, HumanReply, HumanRequest,
};
pub use supervisor::{Action, Supervisor, TerminationReason};

use std::sync::Arc;

use crate::agents::{PlanOutcome, Planner, Researcher, SynthesisInput, Synthesizer, Validator};
use crate::config::{Config, ConfigError};
use crate::confidence::ConfidenceLevel;
use crate::evaluation::Evaluator;
use crate::llm::{Invoker, LlmClient, RateLimiter, RetryPolicy};
use crate::report::{FailedSubTask, FinalReport, RunMetadata, RunOutcome};
use crate::retrieval::{FusionRetriever, RetrievalBackend, RetrievalCache};
use crate::state::{AgentMessage, AgentRole, SharedState};
use crate::task::{CapabilityKind, SubTask, SubTaskId, TaskOrigin, TaskPlan};

/// Coordinates one query at a time over shared collaborators.
pub struct Orchestrator {
    config: Config,
    supervisor: Supervisor,
    planner: Planner,
    researcher: Researcher,
    validator: Validator,
    synthesizer: Synthesizer,
    invoker: Arc<Invoker>,
    human: Arc<dyn HumanChannel>,
}

/// Per-run audit data that lives outside the shared state.
#[derive(Default)]
struct RunLog {
    orphan_citations: Vec<crate::report::OrphanCitation>,
    uncited_statements: Vec<String>,
    fallback_added: bool,
}

impl Orchestrator {
    /// Validate the configuration and wire the capabilities.
    ///
    /// The retrieval cache may be shared with other orchestrators.
    pub fn new(
        config: Config,
        client: Arc<dyn LlmClient>,
        backend: RetrievalBackend,
        cache: Arc<RetrievalCache>,
        human: Arc<dyn HumanChannel>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let limiter = Arc::new(RateLimiter::per_minute(config.calls.rate_limit_per_minute));
        let invoker = Arc::new(Invoker::new(
            client,
            limiter,
            RetryPolicy::from(&config.calls),
            config.models.clone(),
        ));
        let retriever = Arc::new(FusionRetriever::new(backend, cache, &config.retrieval));

        Ok(Self {
            supervisor: Supervisor::new(config.limits.max_iterations),
            planner: Planner::new(invoker.clone(), config.models.rewrite_query),
            researcher: Researcher::new(invoker.clone(), retriever, &config.context),
            validator: Validator::new(invoker.clone(), &config.context),
            synthesizer: Synthesizer::new(invoker.clone(), &config.context),
            invoker,
            human,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Judge panel sharing this orchestrator's rate limiter and retry policy.
    pub fn evaluator(&self) -> Evaluator {
        Evaluator::new(self.invoker.clone())
    }

    /// Answer one query. Always returns an outcome; a run stopped by a
    /// budget before synthesis carries a degraded empty report.
    pub async fn run(&self, query: &str) -> RunOutcome {
        tracing::info!("Starting run for query: {}", query);
        let mut state = SharedState::new(query, &self.config.context);
        let mut log = RunLog::default();

        self.plan(&mut state).await;

        let termination = loop {
            match self.supervisor.route(&state) {
                Action::Invoke { capability, task } => {
                    state.record_step();
                    tracing::debug!(
                        "Step {}: {} sub-task {}",
                        state.counters().steps,
                        capability,
                        task
                    );
                    match capability {
                        CapabilityKind::Research => self.run_research(&mut state, task).await,
                        CapabilityKind::Validate => self.run_validation(&mut state, task).await,
                        CapabilityKind::Synthesize => {
                            self.run_synthesis(&mut state, task, &mut log).await
                        }
                    }
                }
                Action::PauseForHuman(reason) => {
                    state.pending_escalation = None;
                    if let HumanReply::Clarified(text) = self.escalate(&mut state, reason).await {
                        state.add_clarification(&text);
                    }
                }
                Action::Terminate(TerminationReason::PlanExhausted)
                    if state.report.is_none() && !log.fallback_added =>
                {
                    log.fallback_added = true;
                    self.append_fallback(&mut state);
                }
                Action::Terminate(reason) => break reason,
            }
        };

        self.finish(state, log, termination)
    }

    async fn plan(&self, state: &mut SharedState) {
        if let Some(rewritten) = self.planner.rewrite(state.query()).await {
            state.set_clarified_query(rewritten);
        }

        let mut clarifications = 0;
        let plan = loop {
            match self.planner.plan(state.anchor_query()).await {
                PlanOutcome::Ready(plan) => break plan,
                PlanOutcome::Ambiguous { question } => {
                    state.ambiguity = Some(question);
                    let reason = escalation_reason(state, &self.config.escalation);
                    state.ambiguity = None;

                    let allowed = self.config.escalation.enabled
                        && clarifications < self.config.limits.max_clarifications;
                    let reply = match reason {
                        Some(reason) if allowed => self.escalate(state, reason).await,
                        _ => HumanReply::Proceed,
                    };
                    match reply {
                        HumanReply::Clarified(text) => {
                            state.add_clarification(&text);
                            clarifications += 1;
                        }
                        _ => break TaskPlan::default_for(state.anchor_query()),
                    }
                }
            }
        };

        let summary: Vec<String> = plan
            .sub_tasks()
            .iter()
            .map(|t| format!("{}: {}", t.capability, t.description))
            .collect();
        state.push_message(
            AgentMessage::new(
                AgentRole::Supervisor,
                format!("Decomposed query into {} sub-tasks.", plan.len()),
            )
            .with_metadata(serde_json::json!({ "sub_tasks": summary })),
        );
        state.plan = Some(plan);
    }

    /// Ask the human and log the exchange. Timeouts resolve to the default
    /// disposition.
    async fn escalate(&self, state: &mut SharedState, reason: EscalationReason) -> HumanReply {
        state.record_escalation();
        tracing::info!("Escalating to human: {}", reason);
        let request = HumanRequest::new(reason.clone(), state.anchor_query());
        let (reply, timed_out) =
            ask_human(self.human.as_ref(), &request, &self.config.escalation).await;

        let content = match &reply {
            HumanReply::Clarified(text) => text.clone(),
            _ => "(proceed)".to_string(),
        };
        state.push_message(
            AgentMessage::new(AgentRole::Human, content).with_metadata(serde_json::json!({
                "reason": reason,
                "timed_out": timed_out,
            })),
        );
        reply
    }

    fn append_fallback(&self, state: &mut SharedState) {
        let Some(plan) = state.plan.as_mut() else {
            return;
        };
        let task = SubTask::new(
            "Write the best answer the available evidence allows",
            CapabilityKind::Synthesize,
            [],
            TaskOrigin::Fallback,
        );
        match plan.push(task) {
            Ok(_) => {
                tracing::warn!("Plan exhausted without a report; appending best-effort synthesis");
                state.push_message(AgentMessage::new(
                    AgentRole::Supervisor,
                    "No runnable sub-task left. Falling back to best-effort synthesis.",
                ));
            }
            Err(e) => tracing::error!("Failed to append fallback synthesis: {}", e),
        }
    }

    fn description(state: &SharedState, task: SubTaskId) -> String {
        state
            .plan
            .as_ref()
            .and_then(|p| p.get(task))
            .map(|t| t.description.clone())
            .unwrap_or_default()
    }

    fn findings(state: &SharedState) -> Vec<String> {
        state
            .plan
            .as_ref()
            .map(|p| {
                p.results_for(CapabilityKind::Research)
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn mark_running(state: &mut SharedState, task: SubTaskId) {
        if let Some(plan) = state.plan.as_mut() {
            if let Err(e) = plan.mark_running(task) {
                tracing::warn!("Could not start sub-task {}: {}", task, e);
            }
        }
    }

    fn mark_done(state: &mut SharedState, task: SubTaskId, result: Option<String>) {
        if let Some(plan) = state.plan.as_mut() {
            if let Err(e) = plan.mark_done(task, result) {
                tracing::warn!("Could not complete sub-task {}: {}", task, e);
            }
        }
    }

    fn fail(&self, state: &mut SharedState, task: SubTaskId, sender: AgentRole, error: String) {
        tracing::error!("Sub-task {} failed: {}", task, error);
        if let Some(plan) = state.plan.as_mut() {
            if let Err(e) = plan.mark_failed(task, error.clone()) {
                tracing::warn!("Could not mark sub-task {} failed: {}", task, e);
            }
        }
        state.push_message(
            AgentMessage::new(sender, format!("Sub-task failed: {}", error))
                .with_metadata(serde_json::json!({ "failed": true })),
        );
        if let Err(e) = on_failure(state, task, self.config.limits.max_validation_rounds) {
            tracing::error!("Self-correction after failure did not apply: {}", e);
        }
    }

    async fn run_research(&self, state: &mut SharedState, task: SubTaskId) {
        let cap = self.config.limits.max_research_iterations;
        if state.counters().research_rounds >= cap {
            tracing::info!("Research cap ({}) reached; keeping current evidence", cap);
            Self::mark_done(
                state,
                task,
                Some("Research cap reached. Proceeding with available evidence.".to_string()),
            );
            state.push_message(
                AgentMessage::new(
                    AgentRole::Researcher,
                    "Max research iterations reached. Proceeding with available evidence.",
                )
                .with_metadata(serde_json::json!({ "capped": true })),
            );
            return;
        }

        state.record_research_round();
        Self::mark_running(state, task);
        let description = Self::description(state, task);
        let anchored = state.anchor_query().to_string();

        match self.researcher.research(&anchored, &description).await {
            Ok(output) => {
                let retrieved = output.chunks.len();
                let added = state.add_evidence(output.chunks.into_iter().map(|r| r.chunk));
                state.push_message(
                    AgentMessage::new(AgentRole::Researcher, output.summary.clone()).with_metadata(
                        serde_json::json!({
                            "chunks_retrieved": retrieved,
                            "new_chunks": added,
                            "sufficient": output.sufficient,
                            "missing": output.missing,
                            "search_query": output.search_query,
                        }),
                    ),
                );
                Self::mark_done(state, task, Some(output.summary));
            }
            Err(e) => self.fail(state, task, AgentRole::Researcher, e.to_string()),
        }
    }

    async fn run_validation(&self, state: &mut SharedState, task: SubTaskId) {
        let cap = self.config.limits.max_validation_rounds;
        if state.counters().validation_rounds >= cap {
            tracing::info!("Validation cap ({}) reached; skipping re-validation", cap);
            Self::mark_done(
                state,
                task,
                Some("Validation cap reached. Proceeding to synthesis.".to_string()),
            );
            return;
        }

        Self::mark_running(state, task);
        let anchored = state.anchor_query().to_string();
        let findings = Self::findings(state);
        let finding_refs: Vec<&str> = findings.iter().map(String::as_str).collect();

        let result = self
            .validator
            .validate(&anchored, &finding_refs, state.evidence())
            .await;

        match result {
            Ok(critique) => {
                let summary = critique.summary();
                state.push_message(
                    AgentMessage::new(AgentRole::Validator, summary).with_metadata(serde_json::json!({
                        "passed": critique.passed,
                        "confidence": critique.confidence,
                        "issue_count": critique.issues.len(),
                        "issues": critique.issues.iter().take(5).collect::<Vec<_>>(),
                    })),
                );
                Self::mark_done(state, task, Some(critique.assessment.clone()));

                if let Err(e) = apply_critique(state, critique, cap) {
                    tracing::error!("Self-correction did not apply: {}", e);
                }
                if self.config.escalation.enabled {
                    state.pending_escalation = escalation_reason(state, &self.config.escalation);
                }
            }
            Err(e) => self.fail(state, task, AgentRole::Validator, e.to_string()),
        }
    }

    async fn run_synthesis(&self, state: &mut SharedState, task: SubTaskId, log: &mut RunLog) {
        Self::mark_running(state, task);
        let anchored = state.anchor_query().to_string();
        let findings = Self::findings(state);
        let finding_refs: Vec<&str> = findings.iter().map(String::as_str).collect();
        let best_effort = state.critique.as_ref().map(|c| !c.passed).unwrap_or(true);
        let audit_trail: Vec<AgentMessage> = state.messages.iter().cloned().collect();

        let result = self
            .synthesizer
            .synthesize(SynthesisInput {
                query: &anchored,
                findings: &finding_refs,
                critique: state.critique.as_ref(),
                evidence: state.evidence(),
                audit_trail,
                best_effort,
            })
            .await;

        match result {
            Ok(synthesis) => {
                let mut report = synthesis.report;
                log.orphan_citations.extend(synthesis.orphans);
                log.uncited_statements = synthesis.uncited;

                state.push_message(AgentMessage::new(
                    AgentRole::Synthesizer,
                    format!(
                        "Final report generated. Confidence: {}. Citations: {}.",
                        report.confidence.level,
                        report.citations.len()
                    ),
                ));
                Self::mark_done(state, task, Some("Final report generated".to_string()));

                if self.config.escalation.enabled && report.confidence.level == ConfidenceLevel::Low {
                    let reason = EscalationReason::LowFinalConfidence {
                        score: report.confidence.score,
                    };
                    if let HumanReply::Clarified(note) = self.escalate(state, reason).await {
                        report.reviewer_note = Some(note);
                    }
                }
                state.report = Some(report);
            }
            Err(e) => self.fail(state, task, AgentRole::Synthesizer, e.to_string()),
        }
    }

    fn finish(&self, state: SharedState, log: RunLog, termination: TerminationReason) -> RunOutcome {
        let counters = state.counters();
        let report = match state.report.clone() {
            Some(report) => report,
            None => {
                tracing::warn!("Run ended ({}) without a report; returning degraded report", termination);
                FinalReport::degraded(state.anchor_query(), state.messages.iter().cloned().collect())
            }
        };

        let failed_sub_tasks = state
            .plan
            .as_ref()
            .map(|p| {
                p.failed()
                    .map(|t| FailedSubTask {
                        description: t.description.clone(),
                        capability: t.capability.to_string(),
                        error: t.error.clone().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let metadata = RunMetadata {
            research_rounds: counters.research_rounds,
            validation_rounds: counters.validation_rounds,
            total_steps: counters.steps,
            escalated: counters.escalations > 0,
            escalations: counters.escalations,
            orphan_citations: log.orphan_citations,
            uncited_statements: log.uncited_statements,
            failed_sub_tasks,
            messages_dropped: state.messages.dropped(),
            termination,
            degraded: report.degraded,
        };

        tracing::info!(
            "Run finished ({}): {} steps, {} research rounds, {} validation rounds, confidence {} ({:.3})",
            termination,
            metadata.total_steps,
            metadata.research_rounds,
            metadata.validation_rounds,
            report.confidence.level,
            report.confidence.score
        );

        RunOutcome {
            confidence: report.confidence,
            report,
            metadata,
        }
    }
}
