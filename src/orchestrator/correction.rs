//! Self-correction: turn critique issues and failures into new sub-tasks.
//!
//! A failed critique (or a failed sub-task) below the validation-round cap
//! injects one dependency-free research sub-task per issue and a
//! re-validation sub-task that waits for all of them. Pending synthesis
//! then waits for the re-validation. At the cap nothing is injected and
//! synthesis proceeds with the evidence gathered so far.

use crate::agents::{CritiqueIssue, CritiqueResult, IssueKind, Severity};
use crate::state::SharedState;
use crate::task::{CapabilityKind, PlanError, SubTask, SubTaskId, TaskOrigin, TaskPlan};

const MAX_DESCRIPTION_CHARS: usize = 300;

/// Sub-tasks added by one correction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Injection {
    pub research: Vec<SubTaskId>,
    pub revalidation: Option<SubTaskId>,
}

impl Injection {
    pub fn is_empty(&self) -> bool {
        self.research.is_empty() && self.revalidation.is_none()
    }
}

/// Record a validation verdict and correct the plan if it failed.
///
/// Counts exactly one validation round.
pub fn apply_critique(
    state: &mut SharedState,
    critique: CritiqueResult,
    max_rounds: u32,
) -> Result<Injection, PlanError> {
    state.record_validation_round();
    let round = state.counters().validation_rounds;

    let passed = critique.passed;
    let issues = if critique.issues.is_empty() {
        vec![CritiqueIssue {
            kind: IssueKind::Incomplete,
            description: critique.assessment.clone(),
            affected_claim: String::new(),
            severity: Severity::Medium,
            suggested_action: String::new(),
        }]
    } else {
        critique.issues.clone()
    };
    state.critique = Some(critique);

    if passed {
        return Ok(Injection::default());
    }
    if round >= max_rounds {
        tracing::info!(
            "Validation round cap ({}) reached; proceeding to synthesis with current evidence",
            max_rounds
        );
        return Ok(Injection::default());
    }
    match state.plan.as_mut() {
        Some(plan) => inject(plan, &issues, round),
        None => Ok(Injection::default()),
    }
}

/// Route a failed sub-task into the correction path as one high-severity issue.
///
/// A failed validation counts as a validation round. A failed synthesis
/// gets a fresh synthesize sub-task so the plan keeps a live terminal task.
pub fn on_failure(
    state: &mut SharedState,
    task_id: SubTaskId,
    max_rounds: u32,
) -> Result<Injection, PlanError> {
    let (capability, description, error) = match state.plan.as_ref().and_then(|p| p.get(task_id)) {
        Some(task) => (
            task.capability,
            task.description.clone(),
            task.error.clone().unwrap_or_default(),
        ),
        None => return Err(PlanError::UnknownTask(task_id)),
    };

    if capability == CapabilityKind::Validate {
        state.record_validation_round();
    }
    let round = state.counters().validation_rounds;

    let Some(plan) = state.plan.as_mut() else {
        return Ok(Injection::default());
    };
    if capability == CapabilityKind::Synthesize {
        plan.push(SubTask::new(
            "Write the final cited answer (retry)",
            CapabilityKind::Synthesize,
            [],
            TaskOrigin::Correction { round },
        ))?;
    }
    if round >= max_rounds {
        return Ok(Injection::default());
    }

    let issue = CritiqueIssue {
        kind: IssueKind::Failure,
        description: format!("{} sub-task failed: {}", capability, error),
        affected_claim: description.clone(),
        severity: Severity::High,
        suggested_action: description,
    };
    inject(plan, &[issue], round)
}

fn research_description(issue: &CritiqueIssue) -> String {
    let focus = if issue.suggested_action.trim().is_empty() {
        &issue.description
    } else {
        &issue.suggested_action
    };
    let text = format!("Address {}: {}", issue.kind, focus.trim());
    crate::agents::truncate_chars(&text, MAX_DESCRIPTION_CHARS).to_string()
}

fn inject(plan: &mut TaskPlan, issues: &[CritiqueIssue], round: u32) -> Result<Injection, PlanError> {
    let origin = TaskOrigin::Correction { round };
    let mut research = Vec::with_capacity(issues.len());
    for issue in issues {
        let id = plan.push(SubTask::new(
            research_description(issue),
            CapabilityKind::Research,
            [],
            origin,
        ))?;
        research.push(id);
    }

    let revalidation = plan.push(SubTask::new(
        format!("Re-validate findings after correction round {}", round),
        CapabilityKind::Validate,
        research.iter().copied(),
        origin,
    ))?;
    plan.add_dependency_to_pending(CapabilityKind::Synthesize, revalidation)?;

    tracing::info!(
        "Correction round {}: injected {} research sub-tasks and a re-validation",
        round,
        research.len()
    );
    Ok(Injection {
        research,
        revalidation: Some(revalidation),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextLimits;
    use crate::task::SubTaskStatus;

    fn issue(description: &str) -> CritiqueIssue {
        CritiqueIssue {
            kind: IssueKind::WeakEvidence,
            description: description.into(),
            affected_claim: String::new(),
            severity: Severity::Medium,
            suggested_action: String::new(),
        }
    }

    fn failing(issues: Vec<CritiqueIssue>) -> CritiqueResult {
        CritiqueResult {
            passed: false,
            issues,
            assessment: "not enough".into(),
            confidence: 0.5,
        }
    }

    /// State with the default plan where research and validation are done.
    fn validated_state() -> SharedState {
        let mut s = SharedState::new("q", &ContextLimits::default());
        let mut plan = TaskPlan::default_for("q");
        let ids: Vec<SubTaskId> = plan.sub_tasks().iter().map(|t| t.id).collect();
        plan.mark_done(ids[0], Some("found".into())).unwrap();
        plan.mark_done(ids[1], None).unwrap();
        s.plan = Some(plan);
        s
    }

    #[test]
    fn test_two_issues_inject_two_independent_research_tasks() {
        let mut s = validated_state();
        let injection =
            apply_critique(&mut s, failing(vec![issue("no Q4 data"), issue("one source")]), 3)
                .unwrap();

        assert_eq!(s.counters().validation_rounds, 1);
        assert_eq!(injection.research.len(), 2);
        let plan = s.plan.as_ref().unwrap();
        for id in &injection.research {
            let task = plan.get(*id).unwrap();
            assert!(task.depends_on.is_empty());
            assert_eq!(task.capability, CapabilityKind::Research);
            assert_eq!(task.origin, TaskOrigin::Correction { round: 1 });
        }

        let revalidation = injection.revalidation.unwrap();
        let reval = plan.get(revalidation).unwrap();
        assert_eq!(reval.depends_on.len(), 2);

        let synth = &plan.sub_tasks()[2];
        assert!(synth.depends_on.contains(&revalidation));
        // The injected research runs before synthesis.
        assert_eq!(plan.next_ready().unwrap().id, injection.research[0]);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_passing_critique_injects_nothing() {
        let mut s = validated_state();
        let passed = CritiqueResult {
            passed: true,
            issues: vec![],
            assessment: "fine".into(),
            confidence: 0.9,
        };
        assert!(apply_critique(&mut s, passed, 3).unwrap().is_empty());
        assert_eq!(s.counters().validation_rounds, 1);
        assert_eq!(s.plan.as_ref().unwrap().len(), 3);
        assert!(s.critique.is_some());
    }

    #[test]
    fn test_cap_stops_injection_and_lets_synthesis_run() {
        let mut s = validated_state();
        apply_critique(&mut s, failing(vec![issue("a")]), 2).unwrap();
        let len_after_first = s.plan.as_ref().unwrap().len();

        let injection = apply_critique(&mut s, failing(vec![issue("b")]), 2).unwrap();
        assert!(injection.is_empty());
        assert_eq!(s.plan.as_ref().unwrap().len(), len_after_first);
        assert_eq!(s.counters().validation_rounds, 2);
    }

    #[test]
    fn test_empty_issue_list_still_injects_research() {
        let mut s = validated_state();
        let injection = apply_critique(&mut s, failing(vec![]), 3).unwrap();
        assert_eq!(injection.research.len(), 1);
    }

    #[test]
    fn test_failed_synthesis_gets_a_fresh_terminal_task() {
        let mut s = validated_state();
        let synth_id = s.plan.as_ref().unwrap().sub_tasks()[2].id;
        {
            let plan = s.plan.as_mut().unwrap();
            plan.mark_running(synth_id).unwrap();
            plan.mark_failed(synth_id, "malformed_output: empty").unwrap();
        }
        let injection = on_failure(&mut s, synth_id, 3).unwrap();
        let plan = s.plan.as_ref().unwrap();

        let fresh: Vec<_> = plan
            .pending()
            .filter(|t| t.capability == CapabilityKind::Synthesize)
            .collect();
        assert_eq!(fresh.len(), 1);
        assert!(fresh[0].depends_on.contains(&injection.revalidation.unwrap()));
        assert_eq!(plan.get(synth_id).unwrap().status, SubTaskStatus::Failed);
        assert_eq!(s.counters().validation_rounds, 0);
    }

    #[test]
    fn test_failed_validation_counts_a_round() {
        let mut s = SharedState::new("q", &ContextLimits::default());
        let mut plan = TaskPlan::default_for("q");
        let ids: Vec<SubTaskId> = plan.sub_tasks().iter().map(|t| t.id).collect();
        plan.mark_done(ids[0], Some("found".into())).unwrap();
        plan.mark_failed(ids[1], "network: reset").unwrap();
        s.plan = Some(plan);

        let injection = on_failure(&mut s, ids[1], 3).unwrap();
        assert_eq!(s.counters().validation_rounds, 1);
        assert_eq!(injection.research.len(), 1);
    }

    mod properties {
        use super::*;
        use crate::orchestrator::{Action, Supervisor};
        use crate::report::FinalReport;
        use proptest::prelude::*;

        #[derive(Debug, Clone, Copy)]
        enum Outcome {
            Pass,
            Critique(usize),
            Fail,
        }

        fn outcome() -> impl Strategy<Value = Outcome> {
            prop_oneof![
                2 => Just(Outcome::Pass),
                3 => (0usize..3).prop_map(Outcome::Critique),
                1 => Just(Outcome::Fail),
            ]
        }

        fn passing() -> CritiqueResult {
            CritiqueResult {
                passed: true,
                issues: vec![],
                assessment: "fine".into(),
                confidence: 0.9,
            }
        }

        proptest! {
            #[test]
            fn prop_corrections_respect_the_round_cap(
                outcomes in prop::collection::vec(outcome(), 1..30),
                max_rounds in 1u32..5,
                max_steps in 3u32..40,
            ) {
                let supervisor = Supervisor::new(max_steps);
                let mut s = SharedState::new("q", &ContextLimits::default());
                s.plan = Some(TaskPlan::default_for("q"));
                let mut outcomes = outcomes.into_iter().cycle();

                loop {
                    let (capability, task_id) = match supervisor.route(&s) {
                        Action::Invoke { capability, task } => (capability, task),
                        _ => break,
                    };
                    s.record_step();
                    let rounds_before = s.counters().validation_rounds;
                    let outcome = outcomes.next().unwrap_or(Outcome::Pass);
                    let plan = s.plan.as_mut().unwrap();
                    plan.mark_running(task_id).unwrap();

                    let injection = match (capability, outcome) {
                        (_, Outcome::Fail) => {
                            plan.mark_failed(task_id, "scripted failure").unwrap();
                            on_failure(&mut s, task_id, max_rounds).unwrap()
                        }
                        (CapabilityKind::Validate, Outcome::Pass) => {
                            plan.mark_done(task_id, None).unwrap();
                            apply_critique(&mut s, passing(), max_rounds).unwrap()
                        }
                        (CapabilityKind::Validate, Outcome::Critique(n)) => {
                            plan.mark_done(task_id, None).unwrap();
                            let issues = (0..n).map(|i| issue(&format!("gap {}", i))).collect();
                            apply_critique(&mut s, failing(issues), max_rounds).unwrap()
                        }
                        (CapabilityKind::Synthesize, _) => {
                            plan.mark_done(task_id, Some("report".into())).unwrap();
                            s.report = Some(FinalReport::degraded("q", Vec::new()));
                            Injection::default()
                        }
                        (CapabilityKind::Research, _) => {
                            plan.mark_done(task_id, Some("found".into())).unwrap();
                            Injection::default()
                        }
                    };

                    let rounds = s.counters().validation_rounds;
                    prop_assert!(rounds <= max_rounds);
                    prop_assert!(rounds - rounds_before <= 1);
                    if !injection.is_empty() {
                        prop_assert!(rounds < max_rounds);
                    }
                    let plan = s.plan.as_ref().unwrap();
                    prop_assert!(plan.validate().is_ok());
                    // A live synthesize task always waits on the latest re-validation.
                    if let Some(revalidation) = injection.revalidation {
                        prop_assert!(plan
                            .pending()
                            .filter(|t| t.capability == CapabilityKind::Synthesize)
                            .all(|t| t.depends_on.contains(&revalidation)));
                    }
                }

                prop_assert!(s.counters().steps <= max_steps);
            }
        }
    }
}
