//! Course-correction signals.
//!
//! Watches the loop for patterns that indicate iteration is no longer
//! productive: too many consecutive rejections, or textually recurring
//! feedback. When a signal fires, the orchestrator pauses for a human
//! decision instead of burning more iterations.
//!
//! The "same feedback" key is the exact prefix of the normalized text:
//! near-duplicate feedback with different wording is NOT recognized as
//! recurring. Known gap, kept deliberately.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::state::LoopState;

/// Length of the normalized prefix used as the recurrence/action key.
pub const ACTION_KEY_PREFIX_LEN: usize = 80;

fn default_max_consecutive_errors() -> u32 {
    3
}

fn default_feedback_recurrence() -> u32 {
    3
}

/// Thresholds for escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPolicy {
    /// Escalate after this many consecutive rejections.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// Escalate when the same feedback key recurs this many times.
    #[serde(default = "default_feedback_recurrence")]
    pub feedback_recurrence: u32,
}

impl Default for SignalPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_errors: default_max_consecutive_errors(),
            feedback_recurrence: default_feedback_recurrence(),
        }
    }
}

/// What the signals say the loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourseAction {
    /// Keep iterating.
    Continue,
    /// Pause for a human decision, with the reason.
    Escalate(String),
}

/// Normalize feedback text into its recurrence/action key.
///
/// Lowercased, whitespace-collapsed, truncated to a fixed prefix.
#[must_use]
pub fn action_key(text: &str) -> String {
    let normalized: String = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    normalized.chars().take(ACTION_KEY_PREFIX_LEN).collect()
}

/// Stable fingerprint of an action key, used for lesson dedup.
#[must_use]
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(action_key(text).as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Evaluate the course-correction signals for the current state.
#[must_use]
pub fn evaluate(state: &LoopState, policy: &SignalPolicy) -> CourseAction {
    if state.consecutive_errors >= policy.max_consecutive_errors {
        return CourseAction::Escalate(format!(
            "{} consecutive rejections without progress",
            state.consecutive_errors
        ));
    }

    if let Some(last) = state.last_feedback() {
        let key = action_key(last);
        if !key.is_empty() {
            let recurrences = state
                .history
                .iter()
                .filter(|r| action_key(&r.review.feedback) == key)
                .count() as u32;
            if recurrences >= policy.feedback_recurrence {
                return CourseAction::Escalate(format!(
                    "feedback '{key}' has recurred {recurrences} times"
                ));
            }
        }
    }

    CourseAction::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::ReviewResult;
    use crate::workflow::state::IterationResult;

    fn state_with_feedback(feedback: &[&str]) -> LoopState {
        let mut state = LoopState::new("task", vec![], "s1");
        for (i, fb) in feedback.iter().enumerate() {
            state.history.push(IterationResult {
                iteration: i as u32 + 1,
                coder_summary: "work".into(),
                review: ReviewResult::rejection(*fb),
                injected_message: None,
            });
        }
        state
    }

    #[test]
    fn test_action_key_normalizes() {
        assert_eq!(
            action_key("Fix  the\nTests"),
            action_key("fix the tests")
        );
    }

    #[test]
    fn test_action_key_truncates() {
        let long = "x".repeat(200);
        assert_eq!(action_key(&long).len(), ACTION_KEY_PREFIX_LEN);
    }

    #[test]
    fn test_near_duplicates_not_recognized() {
        // Documented gap: different wording, same meaning, different key
        assert_ne!(
            action_key("the test suite is failing"),
            action_key("tests are failing")
        );
    }

    #[test]
    fn test_fingerprint_stable() {
        assert_eq!(fingerprint("Fix tests"), fingerprint("fix  tests"));
        assert_ne!(fingerprint("fix tests"), fingerprint("fix lint"));
    }

    #[test]
    fn test_consecutive_errors_escalate() {
        let mut state = state_with_feedback(&["a", "b"]);
        state.consecutive_errors = 3;
        let action = evaluate(&state, &SignalPolicy::default());
        assert!(matches!(action, CourseAction::Escalate(_)));
    }

    #[test]
    fn test_below_thresholds_continues() {
        let mut state = state_with_feedback(&["needs tests", "needs docs"]);
        state.consecutive_errors = 2;
        assert_eq!(
            evaluate(&state, &SignalPolicy::default()),
            CourseAction::Continue
        );
    }

    #[test]
    fn test_recurring_feedback_escalates() {
        let state = state_with_feedback(&["needs tests", "needs tests", "needs tests"]);
        let action = evaluate(&state, &SignalPolicy::default());
        let CourseAction::Escalate(reason) = action else {
            panic!("expected escalation");
        };
        assert!(reason.contains("recurred 3 times"));
    }

    #[test]
    fn test_empty_feedback_never_recurs() {
        let state = state_with_feedback(&["", "", ""]);
        assert_eq!(
            evaluate(&state, &SignalPolicy::default()),
            CourseAction::Continue
        );
    }
}
