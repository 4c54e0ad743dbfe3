//! Deterministic approval gates.
//!
//! The reviewer's self-reported `approved` is necessary but not sufficient:
//! the reviewer is itself a probabilistic agent. This module is the single
//! place that can veto an optimistic verdict. Each gate is independent and
//! config-togglable; any enabled failing gate forces `approved = false` and
//! appends its explanation to the feedback text. Gates only ever demote -
//! a rejected result stays rejected no matter what the gates observe.

use serde::{Deserialize, Serialize};

use super::{ReviewResult, BROWSER_CHECK_NAME};

fn default_true() -> bool {
    true
}

/// Per-gate toggles. Everything is enabled by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Reviewer output must parse into the required JSON shape.
    #[serde(default = "default_true")]
    pub reviewer_json_valid: bool,
    /// Every required deterministic command must pass.
    #[serde(default = "default_true")]
    pub commands_pass: bool,
    /// Browser verification must report zero errors.
    #[serde(default = "default_true")]
    pub no_browser_errors: bool,
    /// An approval must carry proof artifacts and evidence objects.
    #[serde(default = "default_true")]
    pub artifact_proof: bool,
    /// Runtime session lifecycle must be complete and ping/pong healthy.
    #[serde(default = "default_true")]
    pub runtime_session_healthy: bool,
    /// Third-party live connection must be established and closed cleanly.
    #[serde(default = "default_true")]
    pub third_party_live_healthy: bool,
    /// No duplicated tool calls may be flagged.
    #[serde(default = "default_true")]
    pub no_tool_call_duplication: bool,
    /// No console-related check may fail and no console errors may be counted.
    #[serde(default = "default_true")]
    pub console_budget: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            reviewer_json_valid: true,
            commands_pass: true,
            no_browser_errors: true,
            artifact_proof: true,
            runtime_session_healthy: true,
            third_party_live_healthy: true,
            no_tool_call_duplication: true,
            console_budget: true,
        }
    }
}

/// Close reasons that indicate the third-party connection hit a deadline.
const DEADLINE_CLOSE_MARKERS: [&str; 2] = ["deadline", "timeout"];

/// Apply the approval gates to a merged review result.
///
/// Pure function: consumes the result, returns the (possibly demoted) result.
/// Gate conditions are evaluated against the incoming verdict so that gates
/// stay independent of each other's demotions.
#[must_use]
pub fn evaluate_gates(mut result: ReviewResult, config: &GateConfig) -> ReviewResult {
    let initially_approved = result.approved;
    let mut failures: Vec<String> = Vec::new();

    if config.reviewer_json_valid && !result.reviewer_json_valid {
        failures.push(
            "[gate:reviewer-json] Reviewer output did not parse into the required JSON shape."
                .into(),
        );
    }

    if config.commands_pass {
        let failed: Vec<&str> = result
            .checks
            .iter()
            .filter(|c| c.required && !c.passed)
            .map(|c| c.name.as_str())
            .collect();
        if !failed.is_empty() {
            failures.push(format!(
                "[gate:commands] Required checks failed: {}.",
                failed.join(", ")
            ));
        }
    }

    if config.no_browser_errors {
        let browser_failed = result
            .checks
            .iter()
            .any(|c| c.name == BROWSER_CHECK_NAME && !c.passed);
        if browser_failed {
            failures.push("[gate:browser] Browser verification reported errors.".into());
        }
    }

    if config.artifact_proof && initially_approved {
        if !result.artifacts.has_any_proof() {
            failures.push(
                "[gate:artifact-proof] Approval carries no proof artifacts \
                 (screenshot, command summary, or runtime log)."
                    .into(),
            );
        }
        if result.target.is_none() && result.runtime.is_none() && result.tool_calls.is_none() {
            failures.push(
                "[gate:artifact-proof] No target, runtime, or tool-call evidence was recorded."
                    .into(),
            );
        }
    }

    if config.runtime_session_healthy {
        if let Some(runtime) = &result.runtime {
            if !runtime.lifecycle_complete() {
                failures.push(
                    "[gate:runtime-session] Session lifecycle incomplete \
                     (start/websocket/end not all observed)."
                        .into(),
                );
            }
            if runtime.ping_pong_ok == Some(false) {
                failures.push("[gate:runtime-session] Ping/pong exchange failed.".into());
            }
        }
    }

    if config.third_party_live_healthy {
        if let Some(runtime) = &result.runtime {
            if !runtime.third_party_connect {
                failures.push(
                    "[gate:third-party] Third-party live connection was not established.".into(),
                );
            } else if let Some(reason) = &runtime.third_party_close_reason {
                let lower = reason.to_lowercase();
                if DEADLINE_CLOSE_MARKERS.iter().any(|m| lower.contains(m)) {
                    failures.push(format!(
                        "[gate:third-party] Third-party connection closed with deadline-like \
                         reason: {reason}."
                    ));
                }
            }
        }
    }

    if config.no_tool_call_duplication {
        if let Some(tool_calls) = &result.tool_calls {
            if tool_calls.duplicates_detected {
                failures.push(format!(
                    "[gate:tool-duplication] Duplicate tool calls detected ({} sample(s)).",
                    tool_calls.samples.len()
                ));
            }
        }
    }

    if config.console_budget {
        let console_check_failed = result
            .checks
            .iter()
            .any(|c| c.name.to_lowercase().contains("console") && !c.passed);
        let console_errors = result
            .runtime
            .as_ref()
            .map_or(0, |r| r.console_error_count);
        if console_check_failed || console_errors > 0 {
            failures.push(format!(
                "[gate:console-budget] Console errors over budget ({console_errors} counted)."
            ));
        }
    }

    if !failures.is_empty() {
        result.approved = false;
        for failure in failures {
            result.push_feedback(failure);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{Artifacts, CheckResult, RuntimeEvidence, TargetEvidence, ToolCallEvidence};

    fn healthy_runtime() -> RuntimeEvidence {
        RuntimeEvidence {
            websocket: true,
            session_start: true,
            session_end: true,
            ping_pong_ok: Some(true),
            third_party_connect: true,
            third_party_close_reason: Some("normal".into()),
            console_error_count: 0,
        }
    }

    fn approved_result() -> ReviewResult {
        ReviewResult {
            approved: true,
            checks: vec![CheckResult::pass("lint").required()],
            feedback: String::new(),
            issues: Vec::new(),
            artifacts: Artifacts {
                screenshots: vec!["/tmp/a.png".into()],
                ..Default::default()
            },
            target: Some(TargetEvidence::default()),
            runtime: Some(healthy_runtime()),
            tool_calls: None,
            reviewer_json_valid: true,
        }
    }

    #[test]
    fn test_healthy_approval_passes_all_gates() {
        let result = evaluate_gates(approved_result(), &GateConfig::default());
        assert!(result.approved);
        assert!(result.feedback.is_empty());
    }

    #[test]
    fn test_invalid_json_gate() {
        let mut input = approved_result();
        input.reviewer_json_valid = false;
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(!result.approved);
        assert!(result.feedback.contains("gate:reviewer-json"));
    }

    #[test]
    fn test_required_command_failure_gate() {
        let mut input = approved_result();
        input.checks.push(CheckResult::fail("cargo test").required());
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(!result.approved);
        assert!(result.feedback.contains("cargo test"));
    }

    #[test]
    fn test_optional_command_failure_does_not_gate() {
        let mut input = approved_result();
        input.checks.push(CheckResult::fail("optional-lint"));
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(result.approved);
    }

    #[test]
    fn test_artifact_proof_gate_on_empty_artifacts() {
        let mut input = approved_result();
        input.artifacts = Artifacts::default();
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(!result.approved);
        assert!(result.feedback.contains("no proof artifacts"));
    }

    #[test]
    fn test_artifact_proof_gate_on_absent_evidence() {
        let mut input = approved_result();
        input.target = None;
        input.runtime = None;
        input.tool_calls = None;
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(!result.approved);
        assert!(result.feedback.contains("evidence"));
    }

    #[test]
    fn test_artifact_proof_skipped_for_rejections() {
        // A rejection with no artifacts is not further penalized
        let mut input = approved_result();
        input.approved = false;
        input.artifacts = Artifacts::default();
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(!result.approved);
        assert!(!result.feedback.contains("artifact-proof"));
    }

    #[test]
    fn test_runtime_lifecycle_gate() {
        let mut input = approved_result();
        input.runtime.as_mut().unwrap().session_end = false;
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(!result.approved);
        assert!(result.feedback.contains("lifecycle incomplete"));
    }

    #[test]
    fn test_ping_pong_failure_gate() {
        let mut input = approved_result();
        input.runtime.as_mut().unwrap().ping_pong_ok = Some(false);
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(!result.approved);
        assert!(result.feedback.contains("Ping/pong"));
    }

    #[test]
    fn test_third_party_deadline_close_gate() {
        let mut input = approved_result();
        input.runtime.as_mut().unwrap().third_party_close_reason =
            Some("deadline exceeded".into());
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(!result.approved);
        assert!(result.feedback.contains("deadline"));
    }

    #[test]
    fn test_tool_call_duplication_gate() {
        let mut input = approved_result();
        input.tool_calls = Some(ToolCallEvidence {
            duplicates_detected: true,
            samples: vec!["navigate x2".into()],
        });
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(!result.approved);
        assert!(result.feedback.contains("Duplicate tool calls"));
    }

    #[test]
    fn test_console_budget_gate() {
        let mut input = approved_result();
        input.runtime.as_mut().unwrap().console_error_count = 2;
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(!result.approved);
        assert!(result.feedback.contains("2 counted"));
    }

    #[test]
    fn test_browser_check_gate() {
        let mut input = approved_result();
        input.checks.push(CheckResult::fail(BROWSER_CHECK_NAME));
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(!result.approved);
        assert!(result.feedback.contains("gate:browser"));
    }

    #[test]
    fn test_disabled_gate_does_not_fire() {
        let mut input = approved_result();
        input.artifacts = Artifacts::default();
        let config = GateConfig {
            artifact_proof: false,
            ..Default::default()
        };
        let result = evaluate_gates(input, &config);
        assert!(result.approved);
    }

    #[test]
    fn test_gates_never_promote() {
        let input = ReviewResult::rejection("reviewer said no");
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(!result.approved);
        assert!(result.feedback.contains("reviewer said no"));
    }

    #[test]
    fn test_gate_feedback_appends_not_replaces() {
        let mut input = approved_result();
        input.feedback = "original reviewer feedback".into();
        input.reviewer_json_valid = false;
        let result = evaluate_gates(input, &GateConfig::default());
        assert!(result.feedback.contains("original reviewer feedback"));
        assert!(result.feedback.contains("gate:reviewer-json"));
    }
}
