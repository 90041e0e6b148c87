//! Query rewriting and task decomposition.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::llm::{Contract, Invoker, ModelTier};
use crate::task::{CapabilityKind, SubTask, SubTaskId, TaskOrigin, TaskPlan};

const MIN_SUB_TASKS: usize = 3;
const MAX_SUB_TASKS: usize = 5;

const REWRITE_SYSTEM: &str = "You are a query understanding specialist.\n\
Rewrite the user's query to be clear, unambiguous, and self-contained.\n\
Keep the original intent intact. If the query is already clear, return it unchanged.\n\
Only return the rewritten query, nothing else.";

const PLAN_SYSTEM: &str = r#"You are the planning supervisor of an evidence-based research system.

Decompose the user query into a directed acyclic graph of 3 to 5 sub-tasks.
Each sub-task uses exactly one capability:
  - "research": gather evidence from the document corpus
  - "validate": check findings for hallucinations, contradictions and gaps
  - "synthesize": write the final cited answer

Rules:
1. Start with at least one research sub-task.
2. Validate after research.
3. End with exactly one synthesize sub-task.
4. Use depends_on to reference the ids of earlier sub-tasks.
5. If the query has several plausible interpretations, set "ambiguous" to true,
   put the question you need answered in "clarification_question" and leave
   "sub_tasks" empty.
6. Do not answer the query yourself.

Respond with a JSON object:
{"ambiguous": false, "clarification_question": null,
 "sub_tasks": [{"id": "t1", "description": "...", "capability": "research", "depends_on": []}]}"#;

/// One sub-task as proposed by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct DraftTask {
    pub id: String,
    pub description: String,
    pub capability: CapabilityKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Structured planning result.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanDraft {
    #[serde(default)]
    pub ambiguous: bool,
    #[serde(default)]
    pub clarification_question: Option<String>,
    #[serde(default)]
    pub sub_tasks: Vec<DraftTask>,
}

impl Contract for PlanDraft {
    const NAME: &'static str = "PlanDraft";

    fn check(&self) -> Result<(), String> {
        if self.ambiguous {
            return match self.clarification_question.as_deref().map(str::trim) {
                Some(q) if !q.is_empty() => Ok(()),
                _ => Err("ambiguous plan without a clarification question".to_string()),
            };
        }

        let n = self.sub_tasks.len();
        if !(MIN_SUB_TASKS..=MAX_SUB_TASKS).contains(&n) {
            return Err(format!(
                "expected {}-{} sub-tasks, got {}",
                MIN_SUB_TASKS, MAX_SUB_TASKS, n
            ));
        }

        let mut ids = HashSet::new();
        for task in &self.sub_tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(format!("duplicate sub-task id {:?}", task.id));
            }
        }
        for task in &self.sub_tasks {
            if let Some(dep) = task.depends_on.iter().find(|d| !ids.contains(d.as_str())) {
                return Err(format!("{:?} depends on unknown sub-task {:?}", task.id, dep));
            }
        }
        if !self
            .sub_tasks
            .iter()
            .any(|t| t.capability == CapabilityKind::Synthesize)
        {
            return Err("no synthesize sub-task".to_string());
        }
        self.check_ordering()
    }
}

impl PlanDraft {
    /// Research feeds validation, validation feeds synthesis, and nothing
    /// runs after synthesis.
    fn check_ordering(&self) -> Result<(), String> {
        let by_id: HashMap<&str, &DraftTask> =
            self.sub_tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let of_kind = |kind: CapabilityKind| {
            self.sub_tasks.iter().filter(move |t| t.capability == kind)
        };

        for task in &self.sub_tasks {
            if let Some(dep) = task.depends_on.iter().find(|d| {
                by_id
                    .get(d.as_str())
                    .is_some_and(|t| t.capability == CapabilityKind::Synthesize)
            }) {
                return Err(format!("{:?} depends on synthesize sub-task {:?}", task.id, dep));
            }
        }

        if of_kind(CapabilityKind::Validate).next().is_none() {
            return Err("no validate sub-task".to_string());
        }
        for validate in of_kind(CapabilityKind::Validate) {
            let upstream = ancestors(&by_id, validate);
            if !upstream
                .iter()
                .any(|id| by_id.get(id).is_some_and(|t| t.capability == CapabilityKind::Research))
            {
                return Err(format!("validate {:?} does not follow any research", validate.id));
            }
        }
        for synthesize in of_kind(CapabilityKind::Synthesize) {
            let upstream = ancestors(&by_id, synthesize);
            let missed = of_kind(CapabilityKind::Validate).find(|v| !upstream.contains(v.id.as_str()));
            if let Some(missed) = missed {
                return Err(format!(
                    "synthesize {:?} does not wait for validate {:?}",
                    synthesize.id, missed.id
                ));
            }
        }
        Ok(())
    }

    /// Convert to a task plan. Misordered drafts and cycles are rejected here.
    pub fn into_plan(self, query: &str) -> Result<TaskPlan, crate::task::PlanError> {
        self.check_ordering().map_err(crate::task::PlanError::Misordered)?;

        let ids: HashMap<String, SubTaskId> = self
            .sub_tasks
            .iter()
            .map(|t| (t.id.clone(), SubTaskId::new()))
            .collect();

        let sub_tasks = self
            .sub_tasks
            .into_iter()
            .map(|draft| {
                let mut task = SubTask::new(
                    draft.description,
                    draft.capability,
                    draft.depends_on.iter().filter_map(|d| ids.get(d).copied()),
                    TaskOrigin::Planned,
                );
                if let Some(id) = ids.get(&draft.id) {
                    task.id = *id;
                }
                task
            })
            .collect();

        TaskPlan::new(query, sub_tasks)
    }
}

/// Every id `task` reaches through `depends_on`, directly or transitively.
/// Tolerates cycles; those are reported by `TaskPlan::new`.
fn ancestors<'a>(by_id: &HashMap<&'a str, &'a DraftTask>, task: &'a DraftTask) -> HashSet<&'a str> {
    let mut seen = HashSet::new();
    let mut stack: Vec<&str> = task.depends_on.iter().map(String::as_str).collect();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(&dep) = by_id.get(id) {
            stack.extend(dep.depends_on.iter().map(String::as_str));
        }
    }
    seen
}

#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Ready(TaskPlan),
    /// The query needs a human answer before any sub-task is created.
    Ambiguous { question: String },
}

/// Turns a query into a task plan.
pub struct Planner {
    invoker: Arc<Invoker>,
    rewrite_query: bool,
}

impl Planner {
    pub fn new(invoker: Arc<Invoker>, rewrite_query: bool) -> Self {
        Self {
            invoker,
            rewrite_query,
        }
    }

    /// Rewrite the query for clarity. Returns `None` when rewriting is off
    /// or the call fails, in which case the caller keeps its query.
    pub async fn rewrite(&self, query: &str) -> Option<String> {
        if !self.rewrite_query {
            return None;
        }
        match self.invoker.text(ModelTier::Primary, REWRITE_SYSTEM, query).await {
            Ok(rewritten) => {
                let rewritten = rewritten.trim().trim_matches('"').trim().to_string();
                (!rewritten.is_empty()).then_some(rewritten)
            }
            Err(e) => {
                tracing::warn!("Query rewrite failed, keeping original: {}", e);
                None
            }
        }
    }

    /// Decompose `query` into a plan.
    ///
    /// A failed call or an invalid draft falls back to the default
    /// research → validate → synthesize plan.
    pub async fn plan(&self, query: &str) -> PlanOutcome {
        let user = format!("User query: {}", query);
        let draft = match self
            .invoker
            .structured::<PlanDraft>(ModelTier::Primary, PLAN_SYSTEM, &user)
            .await
        {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!("Planning failed ({}), using default plan", e);
                return PlanOutcome::Ready(TaskPlan::default_for(query));
            }
        };

        if draft.ambiguous {
            let question = draft.clarification_question.unwrap_or_default();
            tracing::info!("Planner flagged the query as ambiguous: {}", question);
            return PlanOutcome::Ambiguous { question };
        }

        match draft.into_plan(query) {
            Ok(plan) => {
                tracing::info!("Planned {} sub-tasks", plan.len());
                PlanOutcome::Ready(plan)
            }
            Err(e) => {
                tracing::warn!("Rejected plan draft ({}), using default plan", e);
                PlanOutcome::Ready(TaskPlan::default_for(query))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(json: &str) -> PlanDraft {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_valid_draft_converts_with_dependencies() {
        let d = draft(
            r#"{"sub_tasks": [
                {"id": "a", "description": "find revenue", "capability": "research"},
                {"id": "b", "description": "check", "capability": "validate", "depends_on": ["a"]},
                {"id": "c", "description": "write", "capability": "synthesize", "depends_on": ["b"]}
            ]}"#,
        );
        assert!(d.check().is_ok());
        let plan = d.into_plan("q").unwrap();
        let subs = plan.sub_tasks();
        assert!(subs[1].depends_on.contains(&subs[0].id));
        assert!(subs[2].depends_on.contains(&subs[1].id));
    }

    #[test]
    fn test_draft_size_is_enforced() {
        let d = draft(
            r#"{"sub_tasks": [
                {"id": "a", "description": "x", "capability": "research"},
                {"id": "b", "description": "y", "capability": "synthesize"}
            ]}"#,
        );
        assert!(d.check().unwrap_err().contains("3-5"));
    }

    #[test]
    fn test_unknown_dependency_is_malformed() {
        let d = draft(
            r#"{"sub_tasks": [
                {"id": "a", "description": "x", "capability": "research"},
                {"id": "b", "description": "y", "capability": "validate", "depends_on": ["zz"]},
                {"id": "c", "description": "z", "capability": "synthesize"}
            ]}"#,
        );
        assert!(d.check().is_err());
    }

    #[test]
    fn test_cyclic_draft_is_rejected_on_conversion() {
        let d = draft(
            r#"{"sub_tasks": [
                {"id": "a", "description": "x", "capability": "research", "depends_on": ["b"]},
                {"id": "b", "description": "y", "capability": "validate", "depends_on": ["a"]},
                {"id": "c", "description": "z", "capability": "synthesize", "depends_on": ["b"]}
            ]}"#,
        );
        assert!(d.check().is_ok());
        assert_eq!(d.into_plan("q").unwrap_err(), crate::task::PlanError::Cycle);
    }

    #[test]
    fn test_synthesize_must_wait_for_validation() {
        let d = draft(
            r#"{"sub_tasks": [
                {"id": "a", "description": "x", "capability": "research"},
                {"id": "c", "description": "z", "capability": "synthesize"},
                {"id": "b", "description": "y", "capability": "validate", "depends_on": ["a"]}
            ]}"#,
        );
        assert!(d.check().unwrap_err().contains("does not wait for validate"));
        assert!(matches!(
            d.into_plan("q"),
            Err(crate::task::PlanError::Misordered(_))
        ));
    }

    #[test]
    fn test_transitive_validation_satisfies_synthesize() {
        let d = draft(
            r#"{"sub_tasks": [
                {"id": "a", "description": "x", "capability": "research"},
                {"id": "b", "description": "y", "capability": "validate", "depends_on": ["a"]},
                {"id": "d", "description": "w", "capability": "research", "depends_on": ["b"]},
                {"id": "c", "description": "z", "capability": "synthesize", "depends_on": ["d"]}
            ]}"#,
        );
        assert!(d.check().is_ok());
    }

    #[test]
    fn test_validate_needs_upstream_research() {
        let d = draft(
            r#"{"sub_tasks": [
                {"id": "a", "description": "x", "capability": "research"},
                {"id": "b", "description": "y", "capability": "validate"},
                {"id": "c", "description": "z", "capability": "synthesize", "depends_on": ["a", "b"]}
            ]}"#,
        );
        assert!(d.check().unwrap_err().contains("does not follow any research"));
    }

    #[test]
    fn test_nothing_may_depend_on_synthesize() {
        let d = draft(
            r#"{"sub_tasks": [
                {"id": "a", "description": "x", "capability": "research"},
                {"id": "b", "description": "y", "capability": "validate", "depends_on": ["a"]},
                {"id": "c", "description": "z", "capability": "synthesize", "depends_on": ["b"]},
                {"id": "d", "description": "w", "capability": "research", "depends_on": ["c"]}
            ]}"#,
        );
        assert!(d.check().unwrap_err().contains("depends on synthesize"));
    }

    #[test]
    fn test_draft_without_validation_is_rejected() {
        let d = draft(
            r#"{"sub_tasks": [
                {"id": "a", "description": "x", "capability": "research"},
                {"id": "b", "description": "y", "capability": "research"},
                {"id": "c", "description": "z", "capability": "synthesize", "depends_on": ["a", "b"]}
            ]}"#,
        );
        assert!(d.check().unwrap_err().contains("no validate"));
    }

    #[test]
    fn test_ambiguous_draft_needs_a_question() {
        assert!(draft(r#"{"ambiguous": true}"#).check().is_err());
        assert!(draft(r#"{"ambiguous": true, "clarification_question": "Which year?"}"#)
            .check()
            .is_ok());
    }

    mod properties {
        use super::*;
        use crate::task::PlanError;
        use proptest::prelude::*;

        fn capability() -> impl Strategy<Value = CapabilityKind> {
            prop_oneof![
                Just(CapabilityKind::Research),
                Just(CapabilityKind::Validate),
                Just(CapabilityKind::Synthesize),
            ]
        }

        fn random_draft() -> impl Strategy<Value = PlanDraft> {
            prop::collection::vec((capability(), prop::collection::vec(0usize..5, 0..3)), 3..=5).prop_map(
                |tasks| {
                    let n = tasks.len();
                    let sub_tasks = tasks
                        .into_iter()
                        .enumerate()
                        .map(|(i, (capability, deps))| DraftTask {
                            id: format!("t{}", i),
                            description: format!("step {}", i),
                            capability,
                            depends_on: deps.iter().map(|d| format!("t{}", d % n)).collect(),
                        })
                        .collect();
                    PlanDraft {
                        ambiguous: false,
                        clarification_question: None,
                        sub_tasks,
                    }
                },
            )
        }

        fn upstream(plan: &TaskPlan, id: SubTaskId) -> HashSet<SubTaskId> {
            let mut seen = HashSet::new();
            let mut stack: Vec<SubTaskId> = plan
                .get(id)
                .into_iter()
                .flat_map(|t| t.depends_on.iter().copied())
                .collect();
            while let Some(next) = stack.pop() {
                if seen.insert(next) {
                    if let Some(task) = plan.get(next) {
                        stack.extend(task.depends_on.iter().copied());
                    }
                }
            }
            seen
        }

        proptest! {
            #[test]
            fn prop_accepted_drafts_validate_before_synthesis(draft in random_draft()) {
                if draft.check().is_err() {
                    return Ok(());
                }
                let plan = match draft.into_plan("q") {
                    Ok(plan) => plan,
                    Err(e) => {
                        prop_assert_eq!(e, PlanError::Cycle);
                        return Ok(());
                    }
                };

                let of = |kind: CapabilityKind| -> Vec<SubTaskId> {
                    plan.sub_tasks()
                        .iter()
                        .filter(|t| t.capability == kind)
                        .map(|t| t.id)
                        .collect()
                };
                let (research, validate, synthesize) = (
                    of(CapabilityKind::Research),
                    of(CapabilityKind::Validate),
                    of(CapabilityKind::Synthesize),
                );
                prop_assert!(!validate.is_empty());
                for v in &validate {
                    let before = upstream(&plan, *v);
                    prop_assert!(research.iter().any(|r| before.contains(r)));
                }
                for s in &synthesize {
                    let before = upstream(&plan, *s);
                    prop_assert!(validate.iter().all(|v| before.contains(v)));
                }
                for task in plan.sub_tasks() {
                    prop_assert!(task.depends_on.iter().all(|d| !synthesize.contains(d)));
                }
            }
        }
    }
}
