//! Mock implementations for unit and integration tests.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use crate::agent::{AgentInvoker, AgentReply, AgentRole, ModelCandidate};
use crate::checks::{BrowserVerification, BrowserVerifier};
use crate::error::{Result, TandemError};
use crate::git::GitOperations;
use crate::workflow::intervention::{Decision, InterventionHandler, PauseContext};

// ============================================================================
// ScriptedAgent
// ============================================================================

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Failure(String),
    AuthFailure(String),
}

/// Agent invoker that replays a fixed sequence of outcomes.
///
/// Outcomes are consumed in order regardless of role or candidate; once the
/// script is empty every further call succeeds with a default reply. Used to
/// drive the fallback runner through exact failure sequences.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    script: Mutex<VecDeque<Scripted>>,
    invocations: Mutex<Vec<(AgentRole, String)>>,
}

impl ScriptedAgent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply.
    #[must_use]
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Reply(text.into()));
        self
    }

    /// Queue a process failure (retryable within the same family).
    #[must_use]
    pub fn failure(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Failure(message.into()));
        self
    }

    /// Queue an auth/quota failure (not retryable within the same family).
    #[must_use]
    pub fn auth_failure(self, detail: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::AuthFailure(detail.into()));
        self
    }

    /// Total number of invocations observed.
    #[must_use]
    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    /// Models invoked, in order.
    #[must_use]
    pub fn invoked_models(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|(_, model)| model.clone())
            .collect()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedAgent {
    async fn invoke(
        &self,
        role: AgentRole,
        candidate: &ModelCandidate,
        _prompt: &str,
    ) -> Result<AgentReply> {
        self.invocations
            .lock()
            .unwrap()
            .push((role, candidate.model.clone()));

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Reply(text)) => Ok(AgentReply { text }),
            Some(Scripted::Failure(message)) => Err(TandemError::AgentProcess {
                exit_code: 1,
                message,
            }),
            Some(Scripted::AuthFailure(detail)) => Err(TandemError::AgentAuth { detail }),
            None => Ok(AgentReply {
                text: "done".into(),
            }),
        }
    }
}

// ============================================================================
// PairedAgent
// ============================================================================

/// Role-aware agent mock for whole-loop tests.
///
/// The coder always replies with a fixed text; the reviewer replays a script
/// of replies, repeating the last one forever (so one rejecting reply models
/// an always-rejecting reviewer). Models listed in `failing_models` fail
/// deterministically for either role, which keeps tests independent of call
/// ordering in the concurrent explore fan-out.
#[derive(Debug)]
pub struct PairedAgent {
    coder_reply: String,
    reviewer_script: Vec<String>,
    reviewer_cursor: Mutex<usize>,
    failing_models: HashSet<String>,
    coder_calls: Mutex<u32>,
    reviewer_calls: Mutex<u32>,
}

impl PairedAgent {
    /// Create with a fixed coder reply and a reviewer reply script.
    #[must_use]
    pub fn new(coder_reply: impl Into<String>, reviewer_script: Vec<String>) -> Self {
        Self {
            coder_reply: coder_reply.into(),
            reviewer_script,
            reviewer_cursor: Mutex::new(0),
            failing_models: HashSet::new(),
            coder_calls: Mutex::new(0),
            reviewer_calls: Mutex::new(0),
        }
    }

    /// Mark a model as always failing.
    #[must_use]
    pub fn failing_model(mut self, model: impl Into<String>) -> Self {
        self.failing_models.insert(model.into());
        self
    }

    /// Number of coder invocations (including explore/plan calls).
    #[must_use]
    pub fn coder_calls(&self) -> u32 {
        *self.coder_calls.lock().unwrap()
    }

    /// Number of reviewer invocations.
    #[must_use]
    pub fn reviewer_calls(&self) -> u32 {
        *self.reviewer_calls.lock().unwrap()
    }
}

#[async_trait]
impl AgentInvoker for PairedAgent {
    async fn invoke(
        &self,
        role: AgentRole,
        candidate: &ModelCandidate,
        _prompt: &str,
    ) -> Result<AgentReply> {
        if self.failing_models.contains(&candidate.model) {
            return Err(TandemError::AgentProcess {
                exit_code: 1,
                message: format!("model {} is scripted to fail", candidate.model),
            });
        }

        match role {
            AgentRole::Coder => {
                *self.coder_calls.lock().unwrap() += 1;
                Ok(AgentReply {
                    text: self.coder_reply.clone(),
                })
            }
            AgentRole::Reviewer => {
                *self.reviewer_calls.lock().unwrap() += 1;
                let mut cursor = self.reviewer_cursor.lock().unwrap();
                let reply = self
                    .reviewer_script
                    .get(*cursor)
                    .or_else(|| self.reviewer_script.last())
                    .cloned()
                    .unwrap_or_default();
                if *cursor + 1 < self.reviewer_script.len() {
                    *cursor += 1;
                }
                Ok(AgentReply { text: reply })
            }
        }
    }
}

// ============================================================================
// MockGitOperations
// ============================================================================

/// Git seam with fixed branch/commit and scripted changed files.
#[derive(Debug)]
pub struct MockGitOperations {
    branch: String,
    commit: String,
    changed: Vec<String>,
    commits_made: Mutex<Vec<String>>,
    fail_commit: bool,
}

impl MockGitOperations {
    #[must_use]
    pub fn new(branch: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            commit: commit.into(),
            changed: Vec::new(),
            commits_made: Mutex::new(Vec::new()),
            fail_commit: false,
        }
    }

    /// Set the changed files reported after the run.
    #[must_use]
    pub fn with_changed_files(mut self, files: Vec<String>) -> Self {
        self.changed = files;
        self
    }

    /// Make `commit_all` fail.
    #[must_use]
    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// Commit messages recorded so far.
    #[must_use]
    pub fn commit_messages(&self) -> Vec<String> {
        self.commits_made.lock().unwrap().clone()
    }
}

impl GitOperations for MockGitOperations {
    fn head_commit(&self, _repo: &Path) -> Result<String> {
        Ok(self.commit.clone())
    }

    fn current_branch(&self, _repo: &Path) -> Result<String> {
        Ok(self.branch.clone())
    }

    fn changed_files(&self, _repo: &Path, _since_commit: &str) -> Result<Vec<String>> {
        Ok(self.changed.clone())
    }

    fn commit_all(&self, _repo: &Path, message: &str) -> Result<String> {
        if self.fail_commit {
            return Err(TandemError::git("commit", "scripted commit failure"));
        }
        self.commits_made.lock().unwrap().push(message.to_string());
        Ok("new-commit-sha".into())
    }
}

// ============================================================================
// AutoDecide
// ============================================================================

/// Intervention handler that always returns the same decision.
#[derive(Debug)]
pub struct AutoDecide {
    decision: Decision,
    pauses: Mutex<Vec<String>>,
}

impl AutoDecide {
    #[must_use]
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            pauses: Mutex::new(Vec::new()),
        }
    }

    /// Always redirect with an empty message (keep iterating).
    #[must_use]
    pub fn keep_going() -> Self {
        Self::new(Decision::Redirect {
            message: String::new(),
        })
    }

    /// Pause reasons observed so far.
    #[must_use]
    pub fn pause_reasons(&self) -> Vec<String> {
        self.pauses.lock().unwrap().clone()
    }
}

#[async_trait]
impl InterventionHandler for AutoDecide {
    async fn decide(&self, context: &PauseContext) -> Result<Decision> {
        self.pauses
            .lock()
            .unwrap()
            .push(context.reason.to_string());
        Ok(self.decision.clone())
    }
}

// ============================================================================
// MockBrowserVerifier
// ============================================================================

/// Browser verifier returning a scripted verification or failing outright.
#[derive(Debug, Default)]
pub struct MockBrowserVerifier {
    errors: Vec<String>,
    service_down: bool,
}

impl MockBrowserVerifier {
    #[must_use]
    pub fn healthy() -> Self {
        Self::default()
    }

    /// Report the given page errors.
    #[must_use]
    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }

    /// Fail as if the browser service were unreachable.
    #[must_use]
    pub fn service_down() -> Self {
        Self {
            errors: Vec::new(),
            service_down: true,
        }
    }
}

#[async_trait]
impl BrowserVerifier for MockBrowserVerifier {
    async fn verify(&self, _url: &str) -> Result<BrowserVerification> {
        if self.service_down {
            return Err(anyhow::anyhow!("browser service unreachable").into());
        }
        Ok(BrowserVerification {
            errors: self.errors.clone(),
            runtime: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_agent_replays_in_order() {
        let agent = ScriptedAgent::new().failure("down").reply("hello");
        let candidate = ModelCandidate::new("p", "m");

        let first = agent.invoke(AgentRole::Coder, &candidate, "x").await;
        assert!(first.is_err());
        let second = agent.invoke(AgentRole::Coder, &candidate, "x").await.unwrap();
        assert_eq!(second.text, "hello");
        // Empty script defaults to success
        let third = agent.invoke(AgentRole::Coder, &candidate, "x").await.unwrap();
        assert_eq!(third.text, "done");
        assert_eq!(agent.invocation_count(), 3);
    }

    #[tokio::test]
    async fn test_paired_agent_reviewer_repeats_last() {
        let agent = PairedAgent::new("did work", vec!["first".into(), "last".into()]);
        let candidate = ModelCandidate::new("p", "m");

        for expected in ["first", "last", "last"] {
            let reply = agent
                .invoke(AgentRole::Reviewer, &candidate, "x")
                .await
                .unwrap();
            assert_eq!(reply.text, expected);
        }
        let coder = agent.invoke(AgentRole::Coder, &candidate, "x").await.unwrap();
        assert_eq!(coder.text, "did work");
    }

    #[tokio::test]
    async fn test_paired_agent_failing_model() {
        let agent = PairedAgent::new("work", vec!["ok".into()]).failing_model("broken");
        let bad = ModelCandidate::new("p", "broken");
        let good = ModelCandidate::new("p", "fine");

        assert!(agent.invoke(AgentRole::Coder, &bad, "x").await.is_err());
        assert!(agent.invoke(AgentRole::Coder, &good, "x").await.is_ok());
    }
}
