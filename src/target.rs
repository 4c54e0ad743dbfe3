//! Target binding.
//!
//! A task must be locked to exactly one configured repository before any
//! agent is spawned. Matching is by name/alias occurrence in the task text;
//! zero or multiple matches fail closed unless the configured policy says
//! otherwise. The resolved (branch, commit) pair is immutable for the rest
//! of the loop.

use globset::Glob;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::{Result, TandemError};
use crate::git::GitOperations;

/// What to do when task text matches zero or multiple targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AmbiguityPolicy {
    /// Fail closed (the default).
    #[default]
    Fail,
    /// Fall back to the configured default target.
    UseDefault,
    /// Pick the first candidate (first match, or first configured target
    /// when nothing matched).
    BestEffort,
}

/// One configured target repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRule {
    /// Canonical target name.
    pub name: String,
    /// Repository path on disk.
    pub path: PathBuf,
    /// Exact branch the repo is expected to be on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_branch: Option<String>,
    /// Glob pattern the branch must match (checked when no exact branch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_pattern: Option<String>,
    /// Additional names that select this target from task text.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl TargetRule {
    fn matches(&self, task_lower: &str) -> bool {
        std::iter::once(&self.name)
            .chain(self.aliases.iter())
            .any(|alias| task_lower.contains(&alias.to_lowercase()))
    }
}

/// Target-binding rules, resolved from config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingRules {
    /// Configured targets.
    #[serde(default)]
    pub targets: Vec<TargetRule>,
    /// Tie-break policy.
    #[serde(default)]
    pub policy: AmbiguityPolicy,
    /// Default target name for [`AmbiguityPolicy::UseDefault`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_target: Option<String>,
}

/// The concrete repository/branch a task is bound to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_pattern: Option<String>,
    /// Branch the repo was actually on at bind time.
    pub branch: String,
    /// HEAD commit at bind time.
    pub commit: String,
}

/// Resolve exactly one target for the task, failing closed on ambiguity.
pub fn resolve_target(
    task: &str,
    rules: &BindingRules,
    git: &dyn GitOperations,
) -> Result<ResolvedTarget> {
    if rules.targets.is_empty() {
        return Err(TandemError::InvalidConfig {
            field: "targets".into(),
            reason: "target binding required but no targets configured".into(),
        });
    }

    let task_lower = task.to_lowercase();
    let matches: Vec<&TargetRule> = rules
        .targets
        .iter()
        .filter(|t| t.matches(&task_lower))
        .collect();
    debug!("Target candidates for task: {:?}", matches.iter().map(|t| &t.name).collect::<Vec<_>>());

    let rule = match (matches.len(), rules.policy) {
        (1, _) => matches[0],
        (0, AmbiguityPolicy::BestEffort) => &rules.targets[0],
        (_, AmbiguityPolicy::BestEffort) => matches[0],
        (_, AmbiguityPolicy::UseDefault) => {
            let name = rules.default_target.as_ref().ok_or_else(|| {
                TandemError::InvalidConfig {
                    field: "default_target".into(),
                    reason: "use-default policy configured without a default target".into(),
                }
            })?;
            rules
                .targets
                .iter()
                .find(|t| &t.name == name)
                .ok_or_else(|| TandemError::InvalidConfig {
                    field: "default_target".into(),
                    reason: format!("default target '{name}' is not a configured target"),
                })?
        }
        (0, AmbiguityPolicy::Fail) => {
            return Err(TandemError::NoTargetMatch {
                task: task.to_string(),
            })
        }
        (_, AmbiguityPolicy::Fail) => {
            return Err(TandemError::AmbiguousTarget {
                task: task.to_string(),
                candidates: matches.iter().map(|t| t.name.clone()).collect(),
            })
        }
    };

    bind(rule, git)
}

/// Resolve the branch/commit of the selected rule and verify branch
/// expectations.
fn bind(rule: &TargetRule, git: &dyn GitOperations) -> Result<ResolvedTarget> {
    let branch = git.current_branch(&rule.path)?;
    let commit = git.head_commit(&rule.path)?;

    if let Some(expected) = &rule.expected_branch {
        if &branch != expected {
            return Err(TandemError::BranchMismatch {
                target: rule.name.clone(),
                expected: expected.clone(),
                actual: branch,
            });
        }
    } else if let Some(pattern) = &rule.branch_pattern {
        let glob = Glob::new(pattern)
            .map_err(|e| TandemError::InvalidConfig {
                field: "branch_pattern".into(),
                reason: e.to_string(),
            })?
            .compile_matcher();
        if !glob.is_match(&branch) {
            return Err(TandemError::BranchMismatch {
                target: rule.name.clone(),
                expected: pattern.clone(),
                actual: branch,
            });
        }
    }

    info!(
        "Bound task to target '{}' at {}@{}",
        rule.name,
        branch,
        &commit[..commit.len().min(8)]
    );

    Ok(ResolvedTarget {
        name: rule.name.clone(),
        path: rule.path.clone(),
        expected_branch: rule.expected_branch.clone(),
        branch_pattern: rule.branch_pattern.clone(),
        branch,
        commit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGitOperations;

    fn rule(name: &str, aliases: &[&str]) -> TargetRule {
        TargetRule {
            name: name.into(),
            path: PathBuf::from(format!("/repos/{name}")),
            expected_branch: None,
            branch_pattern: None,
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn git() -> MockGitOperations {
        MockGitOperations::new("feature/dark-mode", "abc123def456")
    }

    #[test]
    fn test_single_match_resolves() {
        let rules = BindingRules {
            targets: vec![rule("webapp", &["frontend"]), rule("api", &[])],
            ..Default::default()
        };
        let target = resolve_target("add dark mode to the frontend", &rules, &git()).unwrap();
        assert_eq!(target.name, "webapp");
        assert_eq!(target.branch, "feature/dark-mode");
        assert_eq!(target.commit, "abc123def456");
    }

    #[test]
    fn test_zero_matches_fails_closed() {
        let rules = BindingRules {
            targets: vec![rule("webapp", &[]), rule("api", &[])],
            ..Default::default()
        };
        let err = resolve_target("fix the database", &rules, &git()).unwrap_err();
        assert!(matches!(err, TandemError::NoTargetMatch { .. }));
    }

    #[test]
    fn test_multiple_matches_fail_closed() {
        let rules = BindingRules {
            targets: vec![rule("webapp", &[]), rule("api", &[])],
            ..Default::default()
        };
        let err = resolve_target("wire the webapp to the api", &rules, &git()).unwrap_err();
        let TandemError::AmbiguousTarget { candidates, .. } = err else {
            panic!("expected AmbiguousTarget");
        };
        assert_eq!(candidates, vec!["webapp", "api"]);
    }

    #[test]
    fn test_use_default_policy() {
        let rules = BindingRules {
            targets: vec![rule("webapp", &[]), rule("api", &[])],
            policy: AmbiguityPolicy::UseDefault,
            default_target: Some("api".into()),
        };
        let target = resolve_target("fix the database", &rules, &git()).unwrap();
        assert_eq!(target.name, "api");
    }

    #[test]
    fn test_best_effort_policy_picks_first() {
        let rules = BindingRules {
            targets: vec![rule("webapp", &[]), rule("api", &[])],
            policy: AmbiguityPolicy::BestEffort,
            default_target: None,
        };
        // No match: first configured target
        let target = resolve_target("fix the database", &rules, &git()).unwrap();
        assert_eq!(target.name, "webapp");
        // Multiple matches: first match
        let target = resolve_target("webapp and api", &rules, &git()).unwrap();
        assert_eq!(target.name, "webapp");
    }

    #[test]
    fn test_expected_branch_mismatch() {
        let mut r = rule("webapp", &[]);
        r.expected_branch = Some("main".into());
        let rules = BindingRules {
            targets: vec![r],
            ..Default::default()
        };
        let err = resolve_target("update webapp", &rules, &git()).unwrap_err();
        assert!(matches!(err, TandemError::BranchMismatch { .. }));
    }

    #[test]
    fn test_branch_pattern_match() {
        let mut r = rule("webapp", &[]);
        r.branch_pattern = Some("feature/*".into());
        let rules = BindingRules {
            targets: vec![r],
            ..Default::default()
        };
        let target = resolve_target("update webapp", &rules, &git()).unwrap();
        assert_eq!(target.branch, "feature/dark-mode");
    }

    #[test]
    fn test_no_targets_configured_is_config_error() {
        let rules = BindingRules::default();
        let err = resolve_target("anything", &rules, &git()).unwrap_err();
        assert!(matches!(err, TandemError::InvalidConfig { .. }));
    }
}
