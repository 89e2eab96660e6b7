use std::fmt;

use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Number of prompt characters kept in a task record.
pub const PROMPT_STORAGE_LIMIT: usize = 100;

/// Backend-issued identifier for an in-flight or completed generation
/// request. Opaque to everything except the backend that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-defined stable identifier of one logical unit of work, e.g.
/// `Episode-01-003`. Stays the same across retries and restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized lifecycle of one job attempt.
///
/// Transitions only move forward: `Pending -> Running -> {Success | Failed}`,
/// and `Pending` may jump straight to a terminal state when the backend
/// finishes between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Pending,
    Running,
    Success,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Whether moving from `self` to `next` is allowed within one attempt.
    ///
    /// Staying in the same state is always allowed.
    pub fn can_advance_to(self, next: Self) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Pending, Running | Success | Failed) => true,
            (Running, Success | Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shorten a prompt for storage: at most [`PROMPT_STORAGE_LIMIT`]
/// characters, with `...` appended when anything was cut.
pub fn truncate_prompt(prompt: &str) -> String {
    if prompt.chars().count() <= PROMPT_STORAGE_LIMIT {
        return prompt.to_string();
    }
    let mut short: String = prompt.chars().take(PROMPT_STORAGE_LIMIT).collect();
    short.push_str("...");
    short
}
