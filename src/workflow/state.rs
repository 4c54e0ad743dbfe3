//! Loop state types and transitions.

use serde::{Deserialize, Serialize};

use crate::review::ReviewResult;

/// Where the iteration machine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    /// Iterating.
    Running,
    /// Blocked on a human decision.
    Paused,
    /// Terminal: the gates let an approval through.
    Approved,
    /// Terminal: iteration budget spent without approval.
    Exhausted,
    /// Terminal: a human rejected the task during a pause.
    Rejected,
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Approved => write!(f, "approved"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// The record of one completed iteration. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationResult {
    /// 1-indexed iteration number.
    pub iteration: u32,
    /// Short summary of what the coder did (labeled when a fallback or
    /// alternate backend produced it).
    pub coder_summary: String,
    /// The gated review verdict.
    pub review: ReviewResult,
    /// Message injected by an operator redirect before this iteration ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injected_message: Option<String>,
}

/// Mutable state of a running loop.
///
/// Created at loop start, mutated every iteration, discarded at loop end;
/// the durable plan state lives in [`crate::plan::PlanStateStore`].
#[derive(Debug, Clone)]
pub struct LoopState {
    /// The task being worked on.
    pub task: String,
    /// Completed iterations (monotonic, bounded by the iteration budget).
    pub iteration: u32,
    /// Whether the gates have let an approval through.
    pub approved: bool,
    /// Whether the loop is currently blocked on a human decision.
    pub paused: bool,
    /// Ordered iteration history.
    pub history: Vec<IterationResult>,
    /// Rejections/errors since the last approval or redirect.
    pub consecutive_errors: u32,
    /// Action key of the most recent rejection.
    pub last_error_action: Option<String>,
    /// Acceptance criteria, when provided.
    pub acceptance_criteria: Vec<String>,
    /// Session id tying this loop to its durable plan state.
    pub session_id: String,
}

impl LoopState {
    /// Create state for a fresh loop.
    #[must_use]
    pub fn new(task: impl Into<String>, criteria: Vec<String>, session_id: &str) -> Self {
        Self {
            task: task.into(),
            iteration: 0,
            approved: false,
            paused: false,
            history: Vec::new(),
            consecutive_errors: 0,
            last_error_action: None,
            acceptance_criteria: criteria,
            session_id: session_id.to_string(),
        }
    }

    /// Feedback text of the most recent iteration, if any.
    #[must_use]
    pub fn last_feedback(&self) -> Option<&str> {
        self.history.last().map(|r| r.review.feedback.as_str())
    }

    /// Record an approval: reset the error counters.
    pub fn record_approval(&mut self) {
        self.approved = true;
        self.consecutive_errors = 0;
        self.last_error_action = None;
    }

    /// Record a rejection under the given action key.
    pub fn record_rejection(&mut self, action: String) {
        self.consecutive_errors += 1;
        self.last_error_action = Some(action);
    }
}

/// Commit outcome reported in the final result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Whether a commit was created.
    pub committed: bool,
    /// Commit hash, when created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    /// Pull-request URL, when one was opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

/// What the loop returns to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopResult {
    /// Binary outcome.
    pub approved: bool,
    /// How many iterations ran.
    pub iterations: u32,
    /// Full iteration history.
    pub history: Vec<IterationResult>,
    /// Files changed relative to the bound commit.
    pub changed_files: Vec<String>,
    /// Screenshot artifacts collected across iterations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screenshots: Vec<String>,
    /// Commit outcome; `None` when committing was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitInfo>,
    /// Human-readable reason for the outcome.
    pub final_message: String,
}
