//! Reviewer reply parsing.
//!
//! The reviewer is a probabilistic agent replying in free text. Somewhere in
//! that text there should be a JSON verdict. Extraction tries a fenced code
//! block first, then the widest `{...}` substring. The result is a tagged
//! [`ParseOutcome`] rather than a layered string-sniffing fallback, so every
//! failure mode gets its own explicit gate-evaluation branch.
//!
//! # Example
//!
//! ```
//! use tandem::review::parser::{parse_reviewer_reply, ParseOutcome};
//!
//! let reply = r#"Looks good. ```json
//! {"approved": true, "checks": [], "issues": []}
//! ``` Ship it."#;
//! assert!(matches!(parse_reviewer_reply(reply), ParseOutcome::Parsed(_)));
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::{
    Artifacts, CheckResult, ReviewIssue, ReviewResult, RuntimeEvidence, TargetEvidence,
    ToolCallEvidence,
};

/// Default rubric mean below which approval is denied.
pub const DEFAULT_RUBRIC_MEAN_THRESHOLD: f64 = 4.0;

/// Any single rubric dimension at or below this score denies approval.
pub const RUBRIC_DIMENSION_FLOOR: f64 = 2.0;

fn default_require_json() -> bool {
    true
}

fn default_rubric_threshold() -> f64 {
    DEFAULT_RUBRIC_MEAN_THRESHOLD
}

/// Parser behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// When true, any non-parsed outcome is an immediate rejection with a
    /// fixed diagnostic; no heuristic text scan is attempted.
    #[serde(default = "default_require_json")]
    pub require_json: bool,
    /// Minimum acceptable rubric mean when rubric scores are present.
    #[serde(default = "default_rubric_threshold")]
    pub rubric_mean_threshold: f64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            require_json: true,
            rubric_mean_threshold: DEFAULT_RUBRIC_MEAN_THRESHOLD,
        }
    }
}

/// One scored rubric dimension from the reviewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RubricScore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    /// Score on a 1-5 scale. Non-numeric entries deserialize to `None` and
    /// are excluded from the mean.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// The reviewer's structured verdict, as it appears in the reply JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewerReply {
    pub approved: bool,
    pub checks: Vec<CheckResult>,
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub rubric: Vec<RubricScore>,
    #[serde(default)]
    pub artifacts: Artifacts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetEvidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeEvidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<ToolCallEvidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// Outcome of parsing a reviewer reply.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    /// A JSON verdict with the required shape was found.
    Parsed(Box<ReviewerReply>),
    /// No JSON candidate found anywhere in the reply.
    NoJsonFound,
    /// A JSON candidate was found but did not parse.
    MalformedJson(String),
    /// Valid JSON that lacks the required `approved`/`checks`/`issues` shape.
    SchemaMismatch(String),
}

impl ParseOutcome {
    /// Fixed diagnostic used when strict JSON is required.
    #[must_use]
    pub fn diagnostic(&self) -> &'static str {
        match self {
            Self::Parsed(_) => "reviewer reply parsed",
            Self::NoJsonFound => "Reviewer reply contained no JSON verdict; rejecting.",
            Self::MalformedJson(_) => "Reviewer reply contained malformed JSON; rejecting.",
            Self::SchemaMismatch(_) => {
                "Reviewer JSON is missing the required approved/checks/issues shape; rejecting."
            }
        }
    }
}

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced block regex is valid")
    })
}

/// Extract the best JSON candidate from free text.
///
/// Fenced code blocks win over bare braces; among bare braces the widest
/// span (first `{` to last `}`) is taken.
fn extract_json_candidate(text: &str) -> Option<&str> {
    if let Some(caps) = fenced_block_re().captures(text) {
        if let Some(m) = caps.get(1) {
            return Some(m.as_str());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        text.get(start..=end)
    } else {
        None
    }
}

/// Parse a raw reviewer reply into a tagged outcome.
#[must_use]
pub fn parse_reviewer_reply(text: &str) -> ParseOutcome {
    let Some(candidate) = extract_json_candidate(text) else {
        return ParseOutcome::NoJsonFound;
    };

    let value: serde_json::Value = match serde_json::from_str(candidate) {
        Ok(v) => v,
        Err(e) => return ParseOutcome::MalformedJson(e.to_string()),
    };

    let Some(obj) = value.as_object() else {
        return ParseOutcome::SchemaMismatch("top-level value is not an object".into());
    };

    match obj.get("approved") {
        Some(v) if v.is_boolean() => {}
        Some(_) => return ParseOutcome::SchemaMismatch("'approved' is not a boolean".into()),
        None => return ParseOutcome::SchemaMismatch("missing 'approved'".into()),
    }
    for field in ["checks", "issues"] {
        match obj.get(field) {
            Some(v) if v.is_array() => {}
            Some(_) => {
                return ParseOutcome::SchemaMismatch(format!("'{field}' is not an array"));
            }
            None => return ParseOutcome::SchemaMismatch(format!("missing '{field}'")),
        }
    }

    match serde_json::from_value::<ReviewerReply>(value) {
        Ok(reply) => ParseOutcome::Parsed(Box::new(reply)),
        Err(e) => ParseOutcome::SchemaMismatch(e.to_string()),
    }
}

/// Heuristic approval scan for non-strict mode.
///
/// Conservative: "approved" must be present, and neither a negation nor any
/// mention of issues may appear.
#[must_use]
pub fn heuristic_approval(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("approved") && !lower.contains("not approved") && !lower.contains("issues")
}

/// Evaluate rubric scores against the configured thresholds.
///
/// Returns `None` when the rubric allows approval, or an explanation when it
/// denies it. The mean is computed over numeric scores only; an empty rubric
/// has no effect.
fn rubric_denial(rubric: &[RubricScore], threshold: f64) -> Option<String> {
    let scores: Vec<(Option<&str>, f64)> = rubric
        .iter()
        .filter_map(|r| r.score.map(|s| (r.dimension.as_deref(), s)))
        .collect();
    if scores.is_empty() {
        return None;
    }

    if let Some(&(dim, score)) = scores
        .iter()
        .find(|(_, s)| *s <= RUBRIC_DIMENSION_FLOOR)
    {
        return Some(format!(
            "Rubric dimension '{}' scored {score}, at or below the floor of {RUBRIC_DIMENSION_FLOOR}.",
            dim.unwrap_or("unnamed")
        ));
    }

    let mean = scores.iter().map(|(_, s)| s).sum::<f64>() / scores.len() as f64;
    if mean < threshold {
        return Some(format!(
            "Rubric mean {mean:.2} is below the threshold of {threshold:.2}."
        ));
    }

    None
}

/// Convert a parse outcome into the pre-gate [`ReviewResult`].
///
/// Strict mode rejects any non-parsed outcome with a fixed diagnostic and no
/// heuristics. Non-strict mode falls back to [`heuristic_approval`] over the
/// raw text, but still marks `reviewer_json_valid = false` so the JSON gate
/// can veto if enabled.
#[must_use]
pub fn resolve_reply(outcome: ParseOutcome, config: &ParserConfig, raw_text: &str) -> ReviewResult {
    match outcome {
        ParseOutcome::Parsed(reply) => {
            let reply = *reply;
            let mut feedback = reply
                .feedback
                .or(reply.summary)
                .unwrap_or_default();
            let mut approved = reply.approved;

            if let Some(denial) = rubric_denial(&reply.rubric, config.rubric_mean_threshold) {
                approved = false;
                if !feedback.is_empty() {
                    feedback.push('\n');
                }
                feedback.push_str(&denial);
            }

            ReviewResult {
                approved,
                checks: reply.checks,
                feedback,
                issues: reply.issues,
                artifacts: reply.artifacts,
                target: reply.target,
                runtime: reply.runtime,
                tool_calls: reply.tool_calls,
                reviewer_json_valid: true,
            }
        }
        outcome if config.require_json => {
            let mut result = ReviewResult::rejection(outcome.diagnostic());
            if let ParseOutcome::MalformedJson(detail) | ParseOutcome::SchemaMismatch(detail) =
                &outcome
            {
                result.push_feedback(format!("Parser detail: {detail}"));
            }
            result
        }
        _ => {
            let approved = heuristic_approval(raw_text);
            let mut result = ReviewResult::rejection(
                "Reviewer verdict recovered heuristically from free text; no valid JSON found.",
            );
            result.approved = approved;
            result
        }
    }
}
