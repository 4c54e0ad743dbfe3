//! Review verdict data model.
//!
//! A [`ReviewResult`] is produced once per iteration by merging the reviewer
//! agent's parsed reply with deterministic check results, then passed through
//! the approval gate evaluator which may demote it (never promote).
//!
//! The module is organized around the reviewer output contract:
//!
//! - [`ReviewResult`] - the merged verdict for one iteration
//! - [`CheckResult`] - one deterministic or reviewer-reported check
//! - [`ReviewIssue`] - a single issue found during review
//! - [`Artifacts`] - proof artifacts (screenshots, command summaries, logs)
//! - [`TargetEvidence`] / [`RuntimeEvidence`] / [`ToolCallEvidence`] -
//!   evidence objects consumed by the hard gates

pub mod gate;
pub mod parser;

use serde::{Deserialize, Serialize};

pub use gate::{evaluate_gates, GateConfig};
pub use parser::{
    parse_reviewer_reply, resolve_reply, ParseOutcome, ParserConfig, ReviewerReply, RubricScore,
};

/// Well-known name for the deterministic browser verification check.
///
/// The browser-error and console-budget gates key off this name.
pub const BROWSER_CHECK_NAME: &str = "browser";

/// A single issue reported by the reviewer.
///
/// Every field is optional: the reviewer is free text at heart, and a
/// partially filled issue is still worth keeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewIssue {
    /// Severity as reported by the reviewer (free-form).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// Issue category (e.g. "correctness", "style").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// File path where the issue was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Line number (1-indexed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Description of the issue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Suggested fix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

/// Result of a single check, deterministic or reviewer-reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name or the command that was run.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Evidence supplied by the reviewer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    /// Captured output (tail on success, error block on failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Error detail when the check could not run at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether this check is required for approval.
    #[serde(default)]
    pub required: bool,
}

impl CheckResult {
    /// Create a passing check result.
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            evidence: None,
            output: None,
            error: None,
            required: false,
        }
    }

    /// Create a failing check result.
    pub fn fail(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            evidence: None,
            output: None,
            error: None,
            required: false,
        }
    }

    /// Attach captured output.
    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Attach an error detail.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Mark the check as required for approval.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Proof artifacts collected during review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifacts {
    /// Screenshot file paths.
    #[serde(default)]
    pub screenshots: Vec<String>,
    /// URLs exercised during verification.
    #[serde(default)]
    pub urls_tested: Vec<String>,
    /// Summaries of commands that were run.
    #[serde(default)]
    pub command_summaries: Vec<String>,
    /// Captured runtime log excerpts.
    #[serde(default)]
    pub runtime_logs: Vec<String>,
}

impl Artifacts {
    /// Check whether any proof artifact is present.
    #[must_use]
    pub fn has_any_proof(&self) -> bool {
        !self.screenshots.is_empty()
            || !self.command_summaries.is_empty()
            || !self.runtime_logs.is_empty()
    }
}

/// Evidence that review ran against the bound repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetEvidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// Evidence of runtime session health gathered during verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEvidence {
    /// Websocket connection observed.
    #[serde(default)]
    pub websocket: bool,
    /// Session start event observed.
    #[serde(default)]
    pub session_start: bool,
    /// Session end event observed.
    #[serde(default)]
    pub session_end: bool,
    /// Ping/pong exchange result; `None` when not exercised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_pong_ok: Option<bool>,
    /// Third-party live connection established.
    #[serde(default)]
    pub third_party_connect: bool,
    /// Close reason reported by the third-party connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub third_party_close_reason: Option<String>,
    /// Count of console errors observed.
    #[serde(default)]
    pub console_error_count: u32,
}

impl RuntimeEvidence {
    /// Check that the session lifecycle completed start → websocket → end.
    #[must_use]
    pub fn lifecycle_complete(&self) -> bool {
        self.session_start && self.websocket && self.session_end
    }
}

/// Evidence about duplicated tool calls observed during the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEvidence {
    /// Whether duplicate tool calls were flagged.
    #[serde(default)]
    pub duplicates_detected: bool,
    /// Sample descriptions of the duplicated calls.
    #[serde(default)]
    pub samples: Vec<String>,
}

/// The merged verdict for one iteration.
///
/// Built from the reviewer's parsed reply plus deterministic check results.
/// The gate evaluator is the only consumer allowed to mutate it afterwards,
/// and only downward: `approved` may flip to `false`, never to `true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    /// Final verdict after gate evaluation.
    pub approved: bool,
    /// Ordered list of checks (reviewer-reported first, deterministic after).
    pub checks: Vec<CheckResult>,
    /// Accumulated feedback text for the next coder iteration.
    pub feedback: String,
    /// Issues reported by the reviewer.
    pub issues: Vec<ReviewIssue>,
    /// Proof artifacts.
    pub artifacts: Artifacts,
    /// Evidence the review ran against the bound target; `None` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetEvidence>,
    /// Runtime session health evidence; `None` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeEvidence>,
    /// Tool-call duplication evidence; `None` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<ToolCallEvidence>,
    /// Whether the reviewer reply parsed into the required JSON shape.
    pub reviewer_json_valid: bool,
}

impl ReviewResult {
    /// Create a rejection with the given feedback and no evidence.
    ///
    /// Used when the reviewer could not be consulted at all (for example
    /// when its model-fallback chain is exhausted).
    #[must_use]
    pub fn rejection(feedback: impl Into<String>) -> Self {
        Self {
            approved: false,
            checks: Vec::new(),
            feedback: feedback.into(),
            issues: Vec::new(),
            artifacts: Artifacts::default(),
            target: None,
            runtime: None,
            tool_calls: None,
            reviewer_json_valid: false,
        }
    }

    /// Append a line of feedback, preserving existing feedback text.
    pub fn push_feedback(&mut self, line: impl AsRef<str>) {
        if !self.feedback.is_empty() {
            self.feedback.push('\n');
        }
        self.feedback.push_str(line.as_ref());
    }

    /// Count failing checks among those marked required.
    #[must_use]
    pub fn failed_required_checks(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.required && !c.passed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifacts_has_any_proof() {
        assert!(!Artifacts::default().has_any_proof());

        let with_screenshot = Artifacts {
            screenshots: vec!["/tmp/a.png".into()],
            ..Default::default()
        };
        assert!(with_screenshot.has_any_proof());

        // URLs alone are not proof; they describe intent, not outcome
        let urls_only = Artifacts {
            urls_tested: vec!["http://localhost:3000".into()],
            ..Default::default()
        };
        assert!(!urls_only.has_any_proof());
    }

    #[test]
    fn test_runtime_lifecycle_complete() {
        let mut evidence = RuntimeEvidence::default();
        assert!(!evidence.lifecycle_complete());

        evidence.session_start = true;
        evidence.websocket = true;
        assert!(!evidence.lifecycle_complete());

        evidence.session_end = true;
        assert!(evidence.lifecycle_complete());
    }

    #[test]
    fn test_push_feedback_preserves_existing() {
        let mut result = ReviewResult::rejection("first");
        result.push_feedback("second");
        assert_eq!(result.feedback, "first\nsecond");
    }

    #[test]
    fn test_failed_required_checks() {
        let mut result = ReviewResult::rejection("");
        result.checks.push(CheckResult::fail("lint"));
        assert_eq!(result.failed_required_checks(), 0);

        result.checks.push(CheckResult::fail("tests").required());
        result.checks.push(CheckResult::pass("build").required());
        assert_eq!(result.failed_required_checks(), 1);
    }

    #[test]
    fn test_artifacts_deserialize_camel_case() {
        let json = r#"{
            "screenshots": ["/tmp/a.png"],
            "urlsTested": ["http://localhost:3000"],
            "commandSummaries": ["cargo test: ok"]
        }"#;
        let artifacts: Artifacts = serde_json::from_str(json).unwrap();
        assert_eq!(artifacts.screenshots.len(), 1);
        assert_eq!(artifacts.urls_tested.len(), 1);
        assert_eq!(artifacts.command_summaries.len(), 1);
        assert!(artifacts.runtime_logs.is_empty());
    }
}
