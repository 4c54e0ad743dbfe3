//! Agent invocation seam.
//!
//! The coder and reviewer are opaque external collaborators reached through
//! the [`AgentInvoker`] trait. The orchestrator never talks to a provider
//! directly; it hands a `(provider, model)` candidate and a prompt to an
//! invoker and gets free text back. [`CliAgent`] is the production
//! implementation (spawns a provider CLI); tests substitute scripted mocks.

pub mod fallback;
pub mod process;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

pub use fallback::{CandidateFailure, FallbackExhausted, FallbackOutcome, ModelFallbackRunner};
pub use process::CliAgent;

/// Default window for the spawn to be accepted (a handle to exist).
pub const DEFAULT_SPAWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default window for the spawned agent to run to completion.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(1800);

/// The two agent roles driving the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Proposes code changes.
    Coder,
    /// Verifies proposed changes.
    Reviewer,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Coder => write!(f, "coder"),
            AgentRole::Reviewer => write!(f, "reviewer"),
        }
    }
}

/// One `(provider, model)` pair in a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelCandidate {
    /// Provider key, which doubles as the CLI binary name (e.g. "claude").
    pub provider: String,
    /// Model identifier passed to the provider.
    pub model: String,
}

impl ModelCandidate {
    /// Create a new candidate.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl std::fmt::Display for ModelCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// A completed agent call.
#[derive(Debug, Clone)]
pub struct AgentReply {
    /// The agent's full reply text.
    pub text: String,
}

/// Timeouts applied to every agent call.
///
/// Spawning returns a handle immediately; completion is asynchronous. The
/// two windows are independent: a spawn that is never accepted and a spawned
/// agent that never finishes are distinct failures, both eligible for
/// fallback, never a silent hang.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentTimeouts {
    #[serde(default = "default_spawn_secs")]
    pub spawn_secs: u64,
    #[serde(default = "default_completion_secs")]
    pub completion_secs: u64,
}

fn default_spawn_secs() -> u64 {
    DEFAULT_SPAWN_TIMEOUT.as_secs()
}

fn default_completion_secs() -> u64 {
    DEFAULT_COMPLETION_TIMEOUT.as_secs()
}

impl Default for AgentTimeouts {
    fn default() -> Self {
        Self {
            spawn_secs: DEFAULT_SPAWN_TIMEOUT.as_secs(),
            completion_secs: DEFAULT_COMPLETION_TIMEOUT.as_secs(),
        }
    }
}

impl AgentTimeouts {
    /// Spawn-accept window as a [`Duration`].
    #[must_use]
    pub fn spawn(&self) -> Duration {
        Duration::from_secs(self.spawn_secs)
    }

    /// Completion window as a [`Duration`].
    #[must_use]
    pub fn completion(&self) -> Duration {
        Duration::from_secs(self.completion_secs)
    }
}

/// Abstraction over spawning an agent and waiting for its reply.
///
/// Implementations own the transport (CLI process, HTTP, test script) and
/// must enforce the two-timeout discipline from [`AgentTimeouts`].
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run one agent call to completion and return its reply text.
    async fn invoke(
        &self,
        role: AgentRole,
        candidate: &ModelCandidate,
        prompt: &str,
    ) -> Result<AgentReply>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_display() {
        let candidate = ModelCandidate::new("anthropic", "claude-opus");
        assert_eq!(candidate.to_string(), "anthropic/claude-opus");
    }

    #[test]
    fn test_role_display() {
        assert_eq!(AgentRole::Coder.to_string(), "coder");
        assert_eq!(AgentRole::Reviewer.to_string(), "reviewer");
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = AgentTimeouts::default();
        assert_eq!(timeouts.spawn(), DEFAULT_SPAWN_TIMEOUT);
        assert_eq!(timeouts.completion(), DEFAULT_COMPLETION_TIMEOUT);
    }
}
