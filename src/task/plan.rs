//! The task plan: an append-only DAG of sub-tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use uuid::Uuid;

use super::subtask::{CapabilityKind, SubTask, SubTaskId, SubTaskStatus, TaskOrigin};

/// Errors raised when building or amending a plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no sub-tasks")]
    Empty,

    #[error("plan has no synthesize sub-task")]
    NoSynthesize,

    #[error("duplicate sub-task id {0}")]
    DuplicateId(SubTaskId),

    #[error("sub-task {task} depends on unknown sub-task {dependency}")]
    UnknownDependency { task: SubTaskId, dependency: SubTaskId },

    #[error("circular dependency detected between sub-tasks")]
    Cycle,

    #[error("sub-tasks out of order: {0}")]
    Misordered(String),

    #[error("unknown sub-task {0}")]
    UnknownTask(SubTaskId),

    #[error("sub-task {0} is not pending")]
    NotPending(SubTaskId),
}

/// An ordered set of sub-tasks for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub id: Uuid,
    pub query: String,
    sub_tasks: Vec<SubTask>,
    pub created_at: DateTime<Utc>,
}

impl TaskPlan {
    /// Build a plan, rejecting cycles, unknown dependencies, duplicate ids and
    /// plans without a synthesize sub-task.
    pub fn new(query: impl Into<String>, sub_tasks: Vec<SubTask>) -> Result<Self, PlanError> {
        let plan = Self {
            id: Uuid::new_v4(),
            query: query.into(),
            sub_tasks,
            created_at: Utc::now(),
        };
        plan.validate()?;
        Ok(plan)
    }

    /// The fixed research → validate → synthesize plan.
    pub fn default_for(query: impl Into<String>) -> Self {
        let query = query.into();
        let research = SubTask::new(
            format!("Gather evidence relevant to: {}", query),
            CapabilityKind::Research,
            [],
            TaskOrigin::Planned,
        );
        let validate = SubTask::new(
            "Check the gathered evidence for hallucinations, contradictions and gaps",
            CapabilityKind::Validate,
            [research.id],
            TaskOrigin::Planned,
        );
        let synthesize = SubTask::new(
            "Write the final cited answer",
            CapabilityKind::Synthesize,
            [validate.id],
            TaskOrigin::Planned,
        );
        Self {
            id: Uuid::new_v4(),
            query,
            sub_tasks: vec![research, validate, synthesize],
            created_at: Utc::now(),
        }
    }

    pub fn sub_tasks(&self) -> &[SubTask] {
        &self.sub_tasks
    }

    pub fn len(&self) -> usize {
        self.sub_tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_tasks.is_empty()
    }

    pub fn get(&self, id: SubTaskId) -> Option<&SubTask> {
        self.sub_tasks.iter().find(|t| t.id == id)
    }

    fn get_mut(&mut self, id: SubTaskId) -> Result<&mut SubTask, PlanError> {
        self.sub_tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(PlanError::UnknownTask(id))
    }

    /// Check structural invariants. Uses Kahn's algorithm for cycle detection.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.sub_tasks.is_empty() {
            return Err(PlanError::Empty);
        }
        if !self
            .sub_tasks
            .iter()
            .any(|t| t.capability == CapabilityKind::Synthesize)
        {
            return Err(PlanError::NoSynthesize);
        }

        let mut ids = HashSet::new();
        for task in &self.sub_tasks {
            if !ids.insert(task.id) {
                return Err(PlanError::DuplicateId(task.id));
            }
        }
        for task in &self.sub_tasks {
            if let Some(dep) = task.depends_on.iter().find(|d| !ids.contains(d)) {
                return Err(PlanError::UnknownDependency {
                    task: task.id,
                    dependency: *dep,
                });
            }
        }

        let mut in_degree: HashMap<SubTaskId, usize> =
            self.sub_tasks.iter().map(|t| (t.id, t.depends_on.len())).collect();
        let mut dependents: HashMap<SubTaskId, Vec<SubTaskId>> = HashMap::new();
        for task in &self.sub_tasks {
            for dep in &task.depends_on {
                dependents.entry(*dep).or_default().push(task.id);
            }
        }

        let mut queue: VecDeque<SubTaskId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut visited = 0;
        while let Some(node) = queue.pop_front() {
            visited += 1;
            for next in dependents.get(&node).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(next) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }

        if visited != self.sub_tasks.len() {
            return Err(PlanError::Cycle);
        }
        Ok(())
    }

    /// Append a sub-task. Its dependencies must already be in the plan, so an
    /// append can never close a cycle.
    pub fn push(&mut self, task: SubTask) -> Result<SubTaskId, PlanError> {
        if self.get(task.id).is_some() {
            return Err(PlanError::DuplicateId(task.id));
        }
        if let Some(dep) = task.depends_on.iter().find(|d| self.get(**d).is_none()) {
            return Err(PlanError::UnknownDependency {
                task: task.id,
                dependency: *dep,
            });
        }
        let id = task.id;
        self.sub_tasks.push(task);
        Ok(id)
    }

    fn is_done(&self, id: &SubTaskId) -> bool {
        self.get(*id)
            .map(|t| t.status == SubTaskStatus::Done)
            .unwrap_or(false)
    }

    /// The earliest-created pending sub-task whose dependencies are all `Done`.
    pub fn next_ready(&self) -> Option<&SubTask> {
        self.sub_tasks
            .iter()
            .find(|t| t.is_pending() && t.depends_on.iter().all(|d| self.is_done(d)))
    }

    pub fn pending(&self) -> impl Iterator<Item = &SubTask> {
        self.sub_tasks.iter().filter(|t| t.is_pending())
    }

    /// Results of finished sub-tasks of one capability, in creation order.
    pub fn results_for(&self, capability: CapabilityKind) -> Vec<&str> {
        self.sub_tasks
            .iter()
            .filter(|t| t.capability == capability && t.status == SubTaskStatus::Done)
            .filter_map(|t| t.result.as_deref())
            .collect()
    }

    pub fn failed(&self) -> impl Iterator<Item = &SubTask> {
        self.sub_tasks
            .iter()
            .filter(|t| t.status == SubTaskStatus::Failed)
    }

    pub fn mark_running(&mut self, id: SubTaskId) -> Result<(), PlanError> {
        let task = self.get_mut(id)?;
        if !task.is_pending() {
            return Err(PlanError::NotPending(id));
        }
        task.status = SubTaskStatus::Running;
        Ok(())
    }

    pub fn mark_done(&mut self, id: SubTaskId, result: Option<String>) -> Result<(), PlanError> {
        let task = self.get_mut(id)?;
        task.status = SubTaskStatus::Done;
        task.result = result;
        Ok(())
    }

    pub fn mark_failed(&mut self, id: SubTaskId, error: impl Into<String>) -> Result<(), PlanError> {
        let task = self.get_mut(id)?;
        task.status = SubTaskStatus::Failed;
        task.error = Some(error.into());
        Ok(())
    }

    /// Make every pending sub-task of `capability` wait for `dependency`.
    ///
    /// Edges are only added to pending tasks, and only when `dependency` does
    /// not already (transitively) wait on the target. Returns the number of
    /// tasks that gained the edge.
    pub fn add_dependency_to_pending(
        &mut self,
        capability: CapabilityKind,
        dependency: SubTaskId,
    ) -> Result<usize, PlanError> {
        if self.get(dependency).is_none() {
            return Err(PlanError::UnknownTask(dependency));
        }
        let targets: Vec<SubTaskId> = self
            .pending()
            .filter(|t| t.capability == capability && t.id != dependency)
            .map(|t| t.id)
            .collect();

        let mut added = 0;
        for target in targets {
            if self.reaches(dependency, target) {
                return Err(PlanError::Cycle);
            }
            if self.get_mut(target)?.depends_on.insert(dependency) {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Whether `from` depends on `to`, directly or transitively.
    fn reaches(&self, from: SubTaskId, to: SubTaskId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(task) = self.get(id) {
                stack.extend(task.depends_on.iter().copied());
            }
        }
        false
    }
}
