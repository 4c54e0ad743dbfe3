//! Workflow configuration.
//!
//! All defaulting happens in one pass: [`ConfigOverrides`] (the optional
//! `tandem.toml` merged with CLI flags) resolves into a fully populated
//! [`WorkflowConfig`] at loop start. The resolved struct is then threaded by
//! reference; no call site re-derives a default.
//!
//! # Example
//!
//! ```rust,ignore
//! use tandem::config::WorkflowConfig;
//!
//! let config = WorkflowConfig::load(".")?;
//! assert!(config.max_iterations >= 1);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::agent::{AgentTimeouts, ModelCandidate};
use crate::checks::CheckSpec;
use crate::error::{Result, TandemError};
use crate::review::{GateConfig, ParserConfig};
use crate::target::BindingRules;
use crate::workflow::signals::SignalPolicy;

/// Config file name looked up in the project directory.
pub const CONFIG_FILE: &str = "tandem.toml";

/// Default iteration budget.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Default state directory name under the project.
const STATE_DIR_NAME: &str = ".tandem";

/// Fully resolved workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Project directory the loop operates in.
    pub project_dir: PathBuf,
    /// Directory holding durable session state.
    pub state_dir: PathBuf,
    /// Iteration budget for the implement phase.
    pub max_iterations: u32,
    /// Whether to commit after approval.
    pub commit_enabled: bool,
    /// Whether target binding is required before the loop starts.
    pub require_binding: bool,
    /// Target-binding rules.
    pub binding: BindingRules,
    /// Approval gate toggles.
    pub gates: GateConfig,
    /// Reviewer reply parser behavior.
    pub parser: ParserConfig,
    /// Course-correction thresholds.
    pub signals: SignalPolicy,
    /// Coder model-fallback chain (primary first).
    pub coder_models: Vec<ModelCandidate>,
    /// Reviewer model-fallback chain (primary first).
    pub reviewer_models: Vec<ModelCandidate>,
    /// Alternate coding backend for cross-system escalation; empty disables.
    pub alternate_backend: Vec<ModelCandidate>,
    /// Deterministic checks run every iteration.
    pub checks: Vec<CheckSpec>,
    /// URL to verify with the browser check, when the task has one.
    pub verify_url: Option<String>,
    /// Agent spawn/completion timeouts.
    pub agent_timeouts: AgentTimeouts,
    /// Pause for a human decision every N iterations; `None` disables.
    pub auto_pause_every: Option<u32>,
    /// Pause for a human decision when browser verification cannot run.
    pub pause_on_browser_failure: bool,
    /// Acceptance criteria seeded into the plan.
    pub acceptance_criteria: Vec<String>,
    /// Glob filters applied to the reported changed files; empty keeps all.
    pub changed_file_filters: Vec<String>,
}

/// Raw, deeply optional configuration as read from `tandem.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub max_iterations: Option<u32>,
    pub commit_enabled: Option<bool>,
    pub require_binding: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<BindingRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gates: Option<GateConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser: Option<ParserConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signals: Option<SignalPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coder_models: Option<Vec<ModelCandidate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_models: Option<Vec<ModelCandidate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_backend: Option<Vec<ModelCandidate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<Vec<CheckSpec>>,
    pub verify_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_timeouts: Option<AgentTimeouts>,
    pub auto_pause_every: Option<u32>,
    pub pause_on_browser_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<Vec<String>>,
    pub state_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_file_filters: Option<Vec<String>>,
}

impl WorkflowConfig {
    /// Load overrides from the project (or the user config dir) and resolve.
    pub fn load(project_dir: impl AsRef<Path>) -> Result<Self> {
        let project_dir = project_dir.as_ref();
        let overrides = Self::read_overrides(project_dir)?;
        Self::resolve(project_dir, overrides)
    }

    fn read_overrides(project_dir: &Path) -> Result<ConfigOverrides> {
        let local = project_dir.join(CONFIG_FILE);
        let global = dirs::config_dir().map(|d| d.join("tandem").join(CONFIG_FILE));

        let path = if local.exists() {
            Some(local)
        } else {
            global.filter(|p| p.exists())
        };

        let Some(path) = path else {
            debug!("No {CONFIG_FILE} found, using defaults");
            return Ok(ConfigOverrides::default());
        };

        debug!("Loading config from {}", path.display());
        let contents = fs::read_to_string(&path)
            .map_err(|e| TandemError::config_with_path(e.to_string(), path.clone()))?;
        toml::from_str(&contents)
            .map_err(|e| TandemError::config_with_path(e.to_string(), path))
    }

    /// The single defaulting pass from raw overrides to a resolved config.
    pub fn resolve(project_dir: impl AsRef<Path>, overrides: ConfigOverrides) -> Result<Self> {
        let project_dir = project_dir.as_ref().to_path_buf();
        let config = Self {
            state_dir: overrides
                .state_dir
                .unwrap_or_else(|| project_dir.join(STATE_DIR_NAME)),
            project_dir,
            max_iterations: overrides.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            commit_enabled: overrides.commit_enabled.unwrap_or(true),
            require_binding: overrides.require_binding.unwrap_or(false),
            binding: overrides.binding.unwrap_or_default(),
            gates: overrides.gates.unwrap_or_default(),
            parser: overrides.parser.unwrap_or_default(),
            signals: overrides.signals.unwrap_or_default(),
            coder_models: overrides.coder_models.unwrap_or_else(|| {
                vec![
                    ModelCandidate::new("claude", "opus"),
                    ModelCandidate::new("claude", "sonnet"),
                ]
            }),
            reviewer_models: overrides
                .reviewer_models
                .unwrap_or_else(|| vec![ModelCandidate::new("claude", "sonnet")]),
            alternate_backend: overrides.alternate_backend.unwrap_or_default(),
            checks: overrides.checks.unwrap_or_default(),
            verify_url: overrides.verify_url,
            agent_timeouts: overrides.agent_timeouts.unwrap_or_default(),
            auto_pause_every: overrides.auto_pause_every.filter(|n| *n > 0),
            pause_on_browser_failure: overrides.pause_on_browser_failure.unwrap_or(true),
            acceptance_criteria: overrides.acceptance_criteria.unwrap_or_default(),
            changed_file_filters: overrides.changed_file_filters.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(TandemError::InvalidConfig {
                field: "max_iterations".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.coder_models.is_empty() {
            return Err(TandemError::InvalidConfig {
                field: "coder_models".into(),
                reason: "at least one coder model is required".into(),
            });
        }
        if self.reviewer_models.is_empty() {
            return Err(TandemError::InvalidConfig {
                field: "reviewer_models".into(),
                reason: "at least one reviewer model is required".into(),
            });
        }
        if self.require_binding && self.binding.targets.is_empty() {
            return Err(TandemError::InvalidConfig {
                field: "binding.targets".into(),
                reason: "require_binding is set but no targets are configured".into(),
            });
        }
        // Surface bad glob syntax at resolve time, not at loop end
        crate::git::filter_paths(Vec::new(), &self.changed_file_filters)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let config = WorkflowConfig::resolve("/tmp/project", ConfigOverrides::default()).unwrap();
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert!(config.commit_enabled);
        assert!(!config.require_binding);
        assert_eq!(config.state_dir, PathBuf::from("/tmp/project/.tandem"));
        assert_eq!(config.coder_models.len(), 2);
        assert_eq!(config.reviewer_models.len(), 1);
        assert!(config.alternate_backend.is_empty());
        assert!(config.gates.artifact_proof);
        assert!(config.parser.require_json);
    }

    #[test]
    fn test_resolve_rejects_zero_iterations() {
        let overrides = ConfigOverrides {
            max_iterations: Some(0),
            ..Default::default()
        };
        assert!(WorkflowConfig::resolve("/tmp", overrides).is_err());
    }

    #[test]
    fn test_resolve_rejects_binding_without_targets() {
        let overrides = ConfigOverrides {
            require_binding: Some(true),
            ..Default::default()
        };
        let err = WorkflowConfig::resolve("/tmp", overrides).unwrap_err();
        assert!(matches!(err, TandemError::InvalidConfig { .. }));
    }

    #[test]
    fn test_resolve_rejects_empty_model_list() {
        let overrides = ConfigOverrides {
            coder_models: Some(vec![]),
            ..Default::default()
        };
        assert!(WorkflowConfig::resolve("/tmp", overrides).is_err());
    }

    #[test]
    fn test_auto_pause_zero_disables() {
        let overrides = ConfigOverrides {
            auto_pause_every: Some(0),
            ..Default::default()
        };
        let config = WorkflowConfig::resolve("/tmp", overrides).unwrap();
        assert!(config.auto_pause_every.is_none());
    }

    #[test]
    fn test_overrides_parse_from_toml() {
        let toml_str = r#"
            max_iterations = 5
            commit_enabled = false
            verify_url = "http://localhost:3000"

            [[coder_models]]
            provider = "claude"
            model = "opus"

            [[checks]]
            command = "cargo test"
            required = true

            [gates]
            console_budget = false
        "#;
        let overrides: ConfigOverrides = toml::from_str(toml_str).unwrap();
        let config = WorkflowConfig::resolve("/tmp", overrides).unwrap();
        assert_eq!(config.max_iterations, 5);
        assert!(!config.commit_enabled);
        assert_eq!(config.coder_models.len(), 1);
        assert_eq!(config.checks.len(), 1);
        assert!(config.checks[0].required);
        assert!(!config.gates.console_budget);
        // Unspecified gate toggles still default on
        assert!(config.gates.artifact_proof);
    }

    #[test]
    fn test_invalid_changed_file_filter_rejected() {
        let overrides = ConfigOverrides {
            changed_file_filters: Some(vec!["[".into()]),
            ..Default::default()
        };
        assert!(WorkflowConfig::resolve("/tmp", overrides).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: std::result::Result<ConfigOverrides, _> =
            toml::from_str("definitely_not_a_field = true");
        assert!(result.is_err());
    }
}
