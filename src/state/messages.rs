//! Bounded log of agent messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Supervisor,
    Researcher,
    Validator,
    Synthesizer,
    Human,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Supervisor => "supervisor",
            Self::Researcher => "researcher",
            Self::Validator => "validator",
            Self::Synthesizer => "synthesizer",
            Self::Human => "human",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub timestamp: DateTime<Utc>,
    pub sender: AgentRole,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AgentMessage {
    pub fn new(sender: AgentRole, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            sender,
            content: content.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only message log holding at most `cap` messages.
///
/// On overflow the oldest messages after the first `retained_prefix` are
/// dropped; the newest message is never dropped.
#[derive(Debug, Clone)]
pub struct MessageLog {
    cap: usize,
    retained_prefix: usize,
    messages: VecDeque<AgentMessage>,
    dropped: usize,
}

impl MessageLog {
    pub fn new(cap: usize, retained_prefix: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            retained_prefix: retained_prefix.min(cap - 1),
            messages: VecDeque::with_capacity(cap),
            dropped: 0,
        }
    }

    pub fn push(&mut self, message: AgentMessage) {
        self.messages.push_back(message);
        let overflow = self.messages.len().saturating_sub(self.cap);
        if overflow > 0 {
            let start = self.retained_prefix;
            self.messages.drain(start..start + overflow);
            self.dropped += overflow;
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages discarded so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentMessage> {
        self.messages.iter()
    }

    pub fn last_from(&self, sender: AgentRole) -> Option<&AgentMessage> {
        self.messages.iter().rev().find(|m| m.sender == sender)
    }
}
