//! Results of solver invocations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::CacheKey;
use crate::config::RunConfig;

/// Outcome of one invocation of the solver for one cache key.
///
/// Immutable once created; a later run under the same key only replaces
/// it when caching is explicitly bypassed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Cache key of the unit of work.
    pub key: CacheKey,
    /// Unique identifier for this invocation.
    pub run_id: String,
    /// Task identifier.
    pub task: String,
    /// Data index within the task.
    pub index: u64,
    /// Model identifier the solver was asked to use.
    pub model: String,
    /// Terminal status of the invocation.
    pub status: InvocationStatus,
    /// Solver output on success, diagnostic detail otherwise.
    pub payload: String,
    /// Wall-clock duration of the invocation.
    pub duration_seconds: f64,
    /// Timestamp when the invocation started.
    pub started_at: DateTime<Utc>,
    /// Timestamp when the invocation finished.
    pub completed_at: DateTime<Utc>,
    /// Exit code from the solver process, when it produced one.
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl InvocationResult {
    /// Creates a result for `config`. The payload is capped at the
    /// configured maximum output length.
    pub fn new(
        config: &RunConfig,
        key: CacheKey,
        status: InvocationStatus,
        payload: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            run_id: format!("run-{}", Uuid::new_v4()),
            task: config.task().to_string(),
            index: config.index(),
            model: config.model().to_string(),
            status,
            payload: truncate_string(payload.into(), config.max_output_length()),
            duration_seconds: duration.as_secs_f64(),
            started_at: now - chrono::Duration::from_std(duration).unwrap_or_default(),
            completed_at: now,
            exit_code: None,
        }
    }

    /// Sets the exit code.
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Returns true if the solver completed normally.
    pub fn is_success(&self) -> bool {
        self.status == InvocationStatus::Success
    }
}

/// Terminal status of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// Solver completed and its output was captured.
    Success,
    /// Solver exceeded the time budget and was cancelled.
    Timeout,
    /// Solver crashed or returned malformed output.
    Failure,
}

impl std::fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationStatus::Success => write!(f, "success"),
            InvocationStatus::Timeout => write!(f, "timeout"),
            InvocationStatus::Failure => write!(f, "failure"),
        }
    }
}

/// Lifecycle of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Pending,
    Running,
    Completed,
    TimedOut,
    Crashed,
}

impl InvocationState {
    /// Whether `next` is a legal transition from this state.
    pub fn can_transition_to(self, next: InvocationState) -> bool {
        matches!(
            (self, next),
            (InvocationState::Pending, InvocationState::Running)
                | (InvocationState::Running, InvocationState::Completed)
                | (InvocationState::Running, InvocationState::TimedOut)
                | (InvocationState::Running, InvocationState::Crashed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvocationState::Completed | InvocationState::TimedOut | InvocationState::Crashed
        )
    }

    /// Status recorded for a terminal state.
    pub fn status(self) -> Option<InvocationStatus> {
        match self {
            InvocationState::Completed => Some(InvocationStatus::Success),
            InvocationState::TimedOut => Some(InvocationStatus::Timeout),
            InvocationState::Crashed => Some(InvocationStatus::Failure),
            InvocationState::Pending | InvocationState::Running => None,
        }
    }
}

impl std::fmt::Display for InvocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationState::Pending => write!(f, "pending"),
            InvocationState::Running => write!(f, "running"),
            InvocationState::Completed => write!(f, "completed"),
            InvocationState::TimedOut => write!(f, "timed_out"),
            InvocationState::Crashed => write!(f, "crashed"),
        }
    }
}

/// Truncates a string to at most `max_len` bytes on a char boundary.
pub(crate) fn truncate_string(s: String, max_len: usize) -> String {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}
