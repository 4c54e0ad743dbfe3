//! Sequential model-fallback execution.
//!
//! An ordered list of `(provider, model)` candidates is tried strictly in
//! order, one in-flight attempt at a time, with no inter-attempt delay:
//! model-call failures are assumed per-model, not transient load, so waiting
//! buys nothing. Classification of each failure is recorded but never skips
//! a candidate - it only informs the caller's decision about cross-system
//! escalation after exhaustion.

use tracing::{debug, warn};

use super::{AgentInvoker, AgentReply, AgentRole, ModelCandidate};
use crate::error::TandemError;

/// Record of one failed candidate attempt.
#[derive(Debug, Clone)]
pub struct CandidateFailure {
    /// The candidate that failed.
    pub candidate: ModelCandidate,
    /// Human-readable failure reason.
    pub reason: String,
    /// Whether the failure was eligible for same-family retry.
    ///
    /// Recorded for diagnostics; the runner continues down the list either
    /// way.
    pub retryable_same_family: bool,
}

/// All candidates failed.
#[derive(Debug)]
pub struct FallbackExhausted {
    /// The role whose chain was exhausted.
    pub role: AgentRole,
    /// Every attempted candidate with its failure reason, in attempt order.
    pub attempts: Vec<CandidateFailure>,
}

impl std::fmt::Display for FallbackExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "all {} {} candidates failed: {}",
            self.attempts.len(),
            self.role,
            self.summary()
        )
    }
}

impl std::error::Error for FallbackExhausted {}

impl FallbackExhausted {
    /// One-line summary naming every candidate and its failure reason.
    #[must_use]
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| format!("{}: {}", a.candidate, a.reason))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Check whether any recorded failure came from the given provider.
    ///
    /// The orchestrator uses this as its oscillation guard: exhaustion is
    /// not escalated to an alternate backend whose provider already failed.
    #[must_use]
    pub fn involves_provider(&self, provider: &str) -> bool {
        self.attempts
            .iter()
            .any(|a| a.candidate.provider == provider)
    }
}

impl From<FallbackExhausted> for TandemError {
    fn from(err: FallbackExhausted) -> Self {
        TandemError::FallbackExhausted {
            attempted: err.attempts.len(),
            summary: err.summary(),
        }
    }
}

/// A successful run through the fallback chain.
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    /// The agent's reply.
    pub reply: AgentReply,
    /// The candidate that produced the reply.
    pub winner: ModelCandidate,
    /// Zero-based position of the winner in the candidate list.
    pub winner_index: usize,
    /// Failures recorded before the winner, in attempt order.
    pub attempts: Vec<CandidateFailure>,
}

impl FallbackOutcome {
    /// Whether a fallback candidate (not the primary) produced the reply.
    #[must_use]
    pub fn used_fallback(&self) -> bool {
        self.winner_index > 0
    }
}

/// Runs a unit of agent work through an ordered candidate list.
#[derive(Debug, Clone)]
pub struct ModelFallbackRunner {
    role: AgentRole,
    candidates: Vec<ModelCandidate>,
}

impl ModelFallbackRunner {
    /// Create a runner for the given role and ordered candidate list.
    #[must_use]
    pub fn new(role: AgentRole, candidates: Vec<ModelCandidate>) -> Self {
        Self { role, candidates }
    }

    /// The ordered candidate list.
    #[must_use]
    pub fn candidates(&self) -> &[ModelCandidate] {
        &self.candidates
    }

    /// Try candidates strictly in order until one succeeds.
    ///
    /// Exactly one attempt is in flight at a time. Every failure is recorded
    /// before the next candidate is attempted; exhaustion returns a terminal
    /// error naming every candidate and its reason.
    pub async fn run(
        &self,
        invoker: &dyn AgentInvoker,
        prompt: &str,
    ) -> Result<FallbackOutcome, FallbackExhausted> {
        let mut attempts: Vec<CandidateFailure> = Vec::new();

        for (index, candidate) in self.candidates.iter().enumerate() {
            debug!(
                "{} attempt {}/{}: {}",
                self.role,
                index + 1,
                self.candidates.len(),
                candidate
            );

            match invoker.invoke(self.role, candidate, prompt).await {
                Ok(reply) => {
                    if index > 0 {
                        warn!(
                            "{} succeeded on fallback candidate {} after {} failure(s)",
                            self.role,
                            candidate,
                            attempts.len()
                        );
                    }
                    return Ok(FallbackOutcome {
                        reply,
                        winner: candidate.clone(),
                        winner_index: index,
                        attempts,
                    });
                }
                Err(e) => {
                    let retryable = e.is_retryable_same_family();
                    warn!(
                        "{} candidate {} failed (retryable_same_family={}): {}",
                        self.role, candidate, retryable, e
                    );
                    attempts.push(CandidateFailure {
                        candidate: candidate.clone(),
                        reason: e.to_string(),
                        retryable_same_family: retryable,
                    });
                }
            }
        }

        Err(FallbackExhausted {
            role: self.role,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedAgent;

    fn candidates(n: usize) -> Vec<ModelCandidate> {
        (0..n)
            .map(|i| ModelCandidate::new("prov", format!("model-{i}")))
            .collect()
    }

    #[tokio::test]
    async fn test_first_candidate_success() {
        let agent = ScriptedAgent::new().reply("ok");
        let runner = ModelFallbackRunner::new(AgentRole::Coder, candidates(3));

        let outcome = runner.run(&agent, "do work").await.unwrap();
        assert_eq!(outcome.winner_index, 0);
        assert!(!outcome.used_fallback());
        assert!(outcome.attempts.is_empty());
        assert_eq!(agent.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_strict_order_no_skipping() {
        // A fails, B fails, C succeeds: C must be reported as the winner and
        // B's failure must be recorded before C was attempted.
        let agent = ScriptedAgent::new()
            .failure("A down")
            .failure("B down")
            .reply("C ok");
        let runner = ModelFallbackRunner::new(AgentRole::Reviewer, candidates(3));

        let outcome = runner.run(&agent, "review").await.unwrap();
        assert_eq!(outcome.winner.model, "model-2");
        assert_eq!(outcome.winner_index, 2);
        assert!(outcome.used_fallback());
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].candidate.model, "model-0");
        assert_eq!(outcome.attempts[1].candidate.model, "model-1");
        assert!(outcome.attempts[1].reason.contains("B down"));

        // One in-flight attempt at a time, in order
        assert_eq!(
            agent.invoked_models(),
            vec!["model-0", "model-1", "model-2"]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_names_every_candidate() {
        let agent = ScriptedAgent::new()
            .failure("first down")
            .failure("second down");
        let runner = ModelFallbackRunner::new(AgentRole::Coder, candidates(2));

        let err = runner.run(&agent, "work").await.unwrap_err();
        assert_eq!(err.attempts.len(), 2);
        let summary = err.summary();
        assert!(summary.contains("model-0"));
        assert!(summary.contains("model-1"));
        assert!(summary.contains("first down"));
        assert!(summary.contains("second down"));
    }

    #[tokio::test]
    async fn test_involves_provider() {
        let agent = ScriptedAgent::new().failure("down");
        let runner = ModelFallbackRunner::new(
            AgentRole::Coder,
            vec![ModelCandidate::new("alt-backend", "m")],
        );

        let err = runner.run(&agent, "work").await.unwrap_err();
        assert!(err.involves_provider("alt-backend"));
        assert!(!err.involves_provider("anthropic"));
    }

    #[tokio::test]
    async fn test_classification_does_not_skip_candidates() {
        // An auth failure is not retryable-same-family, but the runner still
        // proceeds to the next candidate.
        let agent = ScriptedAgent::new().auth_failure("401").reply("ok");
        let runner = ModelFallbackRunner::new(AgentRole::Coder, candidates(2));

        let outcome = runner.run(&agent, "work").await.unwrap();
        assert_eq!(outcome.winner_index, 1);
        assert!(!outcome.attempts[0].retryable_same_family);
    }
}
