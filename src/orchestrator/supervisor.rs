//! Routing: decide the next action from the shared state.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::escalation::EscalationReason;
use crate::state::SharedState;
use crate::task::{CapabilityKind, SubTaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// A final report exists.
    Completed,
    /// The global step budget ran out.
    StepBudgetExhausted,
    /// No pending sub-task can become ready.
    PlanExhausted,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::StepBudgetExhausted => "step budget exhausted",
            Self::PlanExhausted => "plan exhausted",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Invoke {
        capability: CapabilityKind,
        task: SubTaskId,
    },
    PauseForHuman(EscalationReason),
    Terminate(TerminationReason),
}

/// Picks the next action. Holds no state of its own.
#[derive(Debug, Clone)]
pub struct Supervisor {
    max_steps: u32,
}

impl Supervisor {
    pub fn new(max_steps: u32) -> Self {
        Self { max_steps }
    }

    /// In order: a report ends the run, then the step budget, then any
    /// pending escalation, then the earliest-created ready sub-task.
    pub fn route(&self, state: &SharedState) -> Action {
        if state.report.is_some() {
            return Action::Terminate(TerminationReason::Completed);
        }
        if state.counters().steps >= self.max_steps {
            return Action::Terminate(TerminationReason::StepBudgetExhausted);
        }
        if let Some(reason) = &state.pending_escalation {
            return Action::PauseForHuman(reason.clone());
        }
        match state.plan.as_ref().and_then(|p| p.next_ready()) {
            Some(task) => Action::Invoke {
                capability: task.capability,
                task: task.id,
            },
            None => Action::Terminate(TerminationReason::PlanExhausted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextLimits;
    use crate::report::FinalReport;
    use crate::task::TaskPlan;

    fn state() -> SharedState {
        let mut s = SharedState::new("q", &ContextLimits::default());
        s.plan = Some(TaskPlan::default_for("q"));
        s
    }

    #[test]
    fn test_routes_to_first_ready_task() {
        let s = state();
        let first = s.plan.as_ref().unwrap().sub_tasks()[0].id;
        assert_eq!(
            Supervisor::new(15).route(&s),
            Action::Invoke {
                capability: CapabilityKind::Research,
                task: first
            }
        );
    }

    #[test]
    fn test_report_wins_over_everything() {
        let mut s = state();
        s.report = Some(FinalReport::degraded("q", Vec::new()));
        s.pending_escalation = Some(EscalationReason::CriticalIssues { count: 2 });
        assert_eq!(
            Supervisor::new(15).route(&s),
            Action::Terminate(TerminationReason::Completed)
        );
    }

    #[test]
    fn test_step_budget_then_escalation() {
        let mut s = state();
        s.pending_escalation = Some(EscalationReason::CriticalIssues { count: 2 });
        assert!(matches!(Supervisor::new(15).route(&s), Action::PauseForHuman(_)));
        for _ in 0..15 {
            s.record_step();
        }
        assert_eq!(
            Supervisor::new(15).route(&s),
            Action::Terminate(TerminationReason::StepBudgetExhausted)
        );
    }

    #[test]
    fn test_blocked_plan_is_exhausted() {
        let mut s = state();
        let first = s.plan.as_ref().unwrap().sub_tasks()[0].id;
        s.plan.as_mut().unwrap().mark_failed(first, "boom").unwrap();
        assert_eq!(
            Supervisor::new(15).route(&s),
            Action::Terminate(TerminationReason::PlanExhausted)
        );
    }
}
