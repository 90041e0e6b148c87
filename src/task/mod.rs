//! Task module - sub-tasks and the task plan they form.
//!
//! A plan is a DAG of sub-tasks, each assigned to one capability:
//! - Dependencies must exist and never form a cycle
//! - Sub-tasks run in creation order once their dependencies are `Done`
//! - Amendments append; finished sub-tasks are never removed

mod plan;
mod subtask;

pub use plan::{PlanError, TaskPlan};
pub use subtask::{CapabilityKind, SubTask, SubTaskId, SubTaskStatus, TaskOrigin};
