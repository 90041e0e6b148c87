//! A single unit of work in a task plan.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a sub-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubTaskId(Uuid);

impl SubTaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

/// The specialist capability a sub-task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Research,
    Validate,
    Synthesize,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Research => "research",
            Self::Validate => "validate",
            Self::Synthesize => "synthesize",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// Why a sub-task exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskOrigin {
    /// Part of the initial plan.
    Planned,
    /// Injected by the self-correction loop in the given validation round.
    Correction { round: u32 },
    /// Best-effort synthesis appended when the plan ran dry.
    Fallback,
}

/// A sub-task in a task plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub id: SubTaskId,
    pub description: String,
    pub capability: CapabilityKind,
    pub depends_on: BTreeSet<SubTaskId>,
    pub status: SubTaskStatus,
    pub origin: TaskOrigin,
    /// Output of the capability, set when the sub-task is `Done`.
    pub result: Option<String>,
    /// Failure reason, set when the sub-task is `Failed`.
    pub error: Option<String>,
}

impl SubTask {
    pub fn new(
        description: impl Into<String>,
        capability: CapabilityKind,
        depends_on: impl IntoIterator<Item = SubTaskId>,
        origin: TaskOrigin,
    ) -> Self {
        Self {
            id: SubTaskId::new(),
            description: description.into(),
            capability,
            depends_on: depends_on.into_iter().collect(),
            status: SubTaskStatus::Pending,
            origin,
            result: None,
            error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == SubTaskStatus::Pending
    }
}
