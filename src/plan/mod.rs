//! Durable, session-scoped plan state.
//!
//! Three records live for the lifetime of a session and survive process
//! restarts: the [`TaskPlan`], supporting [`Findings`], and running
//! [`Progress`]. The authoritative state is a structured JSON record; the
//! markdown files written next to it are human-readable renderings (see
//! [`render`]) whose parse-back is deliberately partial.

pub mod render;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use store::PlanStateStore;

/// Unresolved failures of the same action at or past this count trigger
/// escalation to a human.
pub const THREE_STRIKE_THRESHOLD: u32 = 3;

/// Status of a plan phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Complete,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// One phase of the task plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPhase {
    pub id: String,
    pub name: String,
    pub status: PhaseStatus,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub completed_steps: Vec<String>,
}

impl PlanPhase {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status: PhaseStatus::Pending,
            steps: Vec::new(),
            completed_steps: Vec::new(),
        }
    }
}

/// A recorded decision with its timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// One tracked error, keyed by action.
///
/// Invariant: a [`TaskPlan`] holds at most one *unresolved* entry per
/// distinct action key. Repeat failures increment `attempts` and refresh the
/// message and timestamp instead of appending duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    /// Action key (a normalized feedback prefix in practice).
    pub action: String,
    pub message: String,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl ErrorEntry {
    /// Whether this entry still counts toward escalation.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.resolution.is_none()
    }
}

/// The session's task plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    /// Task text as given by the user.
    pub task: String,
    /// Ordered phases.
    #[serde(default)]
    pub phases: Vec<PlanPhase>,
    /// Id of the phase currently in progress.
    pub current_phase: String,
    /// Acceptance criteria, when provided.
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Decision log.
    #[serde(default)]
    pub decisions: Vec<Decision>,
    /// Error log, one unresolved entry per action key.
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
}

impl TaskPlan {
    /// Seed a plan with the default 3-phase template.
    #[must_use]
    pub fn with_default_phases(task: impl Into<String>, criteria: Vec<String>) -> Self {
        let mut implementation = PlanPhase::new("implementation", "Implementation");
        implementation.status = PhaseStatus::InProgress;
        Self {
            task: task.into(),
            phases: vec![
                implementation,
                PlanPhase::new("verification", "Verification"),
                PlanPhase::new("refinement", "Refinement"),
            ],
            current_phase: "implementation".into(),
            acceptance_criteria: criteria,
            decisions: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Record a failure for the action, merging into an existing unresolved
    /// entry when one exists.
    pub fn upsert_error(&mut self, action: &str, message: impl Into<String>) {
        let now = Utc::now();
        if let Some(entry) = self
            .errors
            .iter_mut()
            .find(|e| e.is_unresolved() && e.action == action)
        {
            entry.attempts += 1;
            entry.message = message.into();
            entry.timestamp = now;
            return;
        }
        self.errors.push(ErrorEntry {
            timestamp: now,
            action: action.to_string(),
            message: message.into(),
            attempts: 1,
            resolution: None,
        });
    }

    /// Attach a resolution to the unresolved entry for the action, if any.
    pub fn resolve_error(&mut self, action: &str, resolution: impl Into<String>) {
        if let Some(entry) = self
            .errors
            .iter_mut()
            .find(|e| e.is_unresolved() && e.action == action)
        {
            entry.resolution = Some(resolution.into());
        }
    }

    /// Whether the action has hit the 3-strike threshold unresolved.
    #[must_use]
    pub fn has_three_strikes(&self, action: &str) -> bool {
        self.errors.iter().any(|e| {
            e.is_unresolved() && e.action == action && e.attempts >= THREE_STRIKE_THRESHOLD
        })
    }

    /// All unresolved entries, in insertion order.
    pub fn unresolved_errors(&self) -> impl Iterator<Item = &ErrorEntry> {
        self.errors.iter().filter(|e| e.is_unresolved())
    }

    /// Append a decision with the current timestamp.
    pub fn record_decision(&mut self, text: impl Into<String>) {
        self.decisions.push(Decision {
            timestamp: Utc::now(),
            text: text.into(),
        });
    }
}

/// Supporting research record for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Findings {
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub discoveries: Vec<String>,
    #[serde(default)]
    pub research_notes: Vec<String>,
}

/// Running progress record for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    /// One line per iteration.
    #[serde(default)]
    pub iteration_log: Vec<String>,
    /// Recorded test/check outcomes.
    #[serde(default)]
    pub test_log: Vec<String>,
    /// Count of occurrences per action key.
    #[serde(default)]
    pub action_counts: BTreeMap<String, u32>,
    /// Most recent iteration's review feedback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_feedback: Option<String>,
    /// Most recent error action key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<String>,
    /// Number of iterations run so far.
    #[serde(default)]
    pub iterations: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_phase_template() {
        let plan = TaskPlan::with_default_phases("add dark mode", vec![]);
        assert_eq!(plan.phases.len(), 3);
        assert_eq!(plan.current_phase, "implementation");
        assert_eq!(plan.phases[0].status, PhaseStatus::InProgress);
        assert_eq!(plan.phases[1].id, "verification");
        assert_eq!(plan.phases[2].id, "refinement");
    }

    #[test]
    fn test_upsert_error_merges_same_action() {
        let mut plan = TaskPlan::with_default_phases("t", vec![]);
        plan.upsert_error("fix tests", "assertion failed");
        plan.upsert_error("fix tests", "assertion failed again");
        assert_eq!(plan.errors.len(), 1);
        assert_eq!(plan.errors[0].attempts, 2);
        assert_eq!(plan.errors[0].message, "assertion failed again");
    }

    #[test]
    fn test_upsert_error_distinct_actions() {
        let mut plan = TaskPlan::with_default_phases("t", vec![]);
        plan.upsert_error("fix tests", "a");
        plan.upsert_error("fix lint", "b");
        assert_eq!(plan.errors.len(), 2);
    }

    #[test]
    fn test_upsert_after_resolution_starts_fresh_entry() {
        let mut plan = TaskPlan::with_default_phases("t", vec![]);
        plan.upsert_error("fix tests", "a");
        plan.resolve_error("fix tests", "rewrote fixture");
        plan.upsert_error("fix tests", "new failure");
        assert_eq!(plan.errors.len(), 2);
        assert_eq!(plan.errors[1].attempts, 1);
        assert!(plan.errors[0].resolution.is_some());
    }

    #[test]
    fn test_three_strikes() {
        let mut plan = TaskPlan::with_default_phases("t", vec![]);
        plan.upsert_error("deploy", "boom");
        plan.upsert_error("deploy", "boom");
        assert!(!plan.has_three_strikes("deploy"));

        plan.upsert_error("deploy", "boom");
        assert!(plan.has_three_strikes("deploy"));

        plan.resolve_error("deploy", "fixed credentials");
        assert!(!plan.has_three_strikes("deploy"));
    }
}
