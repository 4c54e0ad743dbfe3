//! Workflow orchestration.
//!
//! Composes the agent seam, reviewer parser, deterministic checks, approval
//! gates, and durable plan store into the Explore → Plan → Implement →
//! Commit sequence. Explore and Plan are best-effort: their failures are
//! logged and swallowed. Implement is the iteration state machine; agent
//! exhaustion there ends the loop as not-approved instead of raising.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::agent::{
    AgentInvoker, AgentRole, FallbackExhausted, FallbackOutcome, ModelFallbackRunner,
};
use crate::checks::{BrowserCheck, BrowserVerifier, CheckRunner};
use crate::config::WorkflowConfig;
use crate::error::Result;
use crate::git::GitOperations;
use crate::plan::PlanStateStore;
use crate::review::{evaluate_gates, parse_reviewer_reply, resolve_reply, TargetEvidence};
use crate::target::{resolve_target, ResolvedTarget};

use super::intervention::{Decision, InterventionHandler, PauseContext, PauseReason};
use super::lessons::LessonStore;
use super::narration::Narrator;
use super::signals::{self, CourseAction};
use super::state::{CommitInfo, IterationResult, LoopResult, LoopState, LoopStatus};

/// Cap on the coder summary recorded per iteration.
const SUMMARY_CHARS: usize = 240;

/// How many lessons to inject into coder prompts.
const LESSON_PROMPT_LIMIT: usize = 5;

/// How the implement phase ended.
enum Terminal {
    Approved { by_operator: bool },
    Exhausted,
    Rejected(String),
    AgentsExhausted(String),
}

/// Outcome of a pause, from the orchestrator's point of view.
enum PauseFlow {
    Resume(Option<String>),
    Approve,
    Reject(String),
}

/// Take a compact single-line summary of agent output.
fn summarize(text: &str) -> String {
    let line = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim();
    line.chars().take(SUMMARY_CHARS).collect()
}

/// The coder/reviewer workflow loop.
pub struct WorkflowOrchestrator {
    config: WorkflowConfig,
    invoker: Arc<dyn AgentInvoker>,
    git: Arc<dyn GitOperations>,
    intervention: Arc<dyn InterventionHandler>,
    browser: BrowserCheck,
    narrator: Narrator,
}

impl WorkflowOrchestrator {
    /// Create an orchestrator with no full-browser verifier (HTTP-only
    /// fallback applies when a verify URL is configured).
    #[must_use]
    pub fn new(
        config: WorkflowConfig,
        invoker: Arc<dyn AgentInvoker>,
        git: Arc<dyn GitOperations>,
        intervention: Arc<dyn InterventionHandler>,
    ) -> Self {
        Self {
            config,
            invoker,
            git,
            intervention,
            browser: BrowserCheck::new(None),
            narrator: Narrator::default(),
        }
    }

    /// Attach a full-browser verifier.
    #[must_use]
    pub fn with_browser(mut self, verifier: Box<dyn BrowserVerifier>) -> Self {
        self.browser = BrowserCheck::new(Some(verifier));
        self
    }

    /// Replace the progress narrator.
    #[must_use]
    pub fn with_narrator(mut self, narrator: Narrator) -> Self {
        self.narrator = narrator;
        self
    }

    /// Run the full workflow for one task.
    pub async fn run(&self, task: &str) -> Result<LoopResult> {
        // Bind the target before any agent is spawned; ambiguity fails
        // closed here.
        let target = if self.config.require_binding {
            Some(resolve_target(task, &self.config.binding, self.git.as_ref())?)
        } else {
            None
        };
        let repo: PathBuf = target
            .as_ref()
            .map(|t| t.path.clone())
            .unwrap_or_else(|| self.config.project_dir.clone());
        let baseline = match &target {
            Some(t) => Some(t.commit.clone()),
            None => self.git.head_commit(&repo).ok(),
        };

        let store = PlanStateStore::initialize(
            &self.config.state_dir,
            task,
            self.config.acceptance_criteria.clone(),
        )?;
        info!("Session {} initialized for task: {}", store.session_id(), task);
        let lessons = LessonStore::new(self.config.state_dir.join("lessons.json"));
        let mut state = LoopState::new(
            task,
            self.config.acceptance_criteria.clone(),
            store.session_id(),
        );

        self.narrator.phase("explore", "started");
        let exploration = self.explore(task).await;
        match &exploration {
            Some(notes) => {
                let count = notes.len();
                if let Err(e) = store.update_findings(|f| f.discoveries.extend(notes.clone())) {
                    warn!("Failed to persist exploration findings: {e}");
                }
                self.narrator.phase("explore", "finished");
                debug!("Explore produced {count} note(s)");
            }
            None => self.narrator.phase("explore", "skipped"),
        }

        self.narrator.phase("plan", "started");
        match self.plan_phase(task, exploration.as_deref()).await {
            Some(plan_text) => {
                if let Err(e) =
                    store.update_plan(|p| p.record_decision(format!("plan: {}", summarize(&plan_text))))
                {
                    warn!("Failed to persist plan decision: {e}");
                }
                self.narrator.phase("plan", "finished");
            }
            None => self.narrator.phase("plan", "skipped"),
        }

        self.narrator.phase("implement", "started");
        let checks = CheckRunner::new(&repo);
        let terminal = self
            .implement(&mut state, &store, &lessons, target.as_ref(), &checks)
            .await?;
        self.narrator.phase("implement", "finished");

        self.finish(terminal, state, &repo, baseline.as_deref(), task)
    }

    /// Close out the loop: changed files, optional commit, final message.
    fn finish(
        &self,
        terminal: Terminal,
        state: LoopState,
        repo: &Path,
        baseline: Option<&str>,
        task: &str,
    ) -> Result<LoopResult> {
        let changed_files = baseline
            .and_then(|commit| {
                self.git
                    .changed_files(repo, commit)
                    .map_err(|e| warn!("Changed-file detection failed: {e}"))
                    .ok()
            })
            .map(|files| {
                // Filter syntax was validated at config resolve time
                crate::git::filter_paths(files, &self.config.changed_file_filters)
                    .unwrap_or_default()
            })
            .unwrap_or_default();

        let (approved, status, mut final_message) = match &terminal {
            Terminal::Approved { by_operator: true } => (
                true,
                LoopStatus::Approved,
                format!("Approved by operator after {} iteration(s).", state.iteration),
            ),
            Terminal::Approved { by_operator: false } => (
                true,
                LoopStatus::Approved,
                format!("Approved after {} iteration(s).", state.iteration),
            ),
            Terminal::Exhausted => (
                false,
                LoopStatus::Exhausted,
                format!(
                    "Iteration budget of {} exhausted without approval.",
                    self.config.max_iterations
                ),
            ),
            Terminal::Rejected(reason) => (
                false,
                LoopStatus::Rejected,
                format!("Rejected by operator: {reason}"),
            ),
            Terminal::AgentsExhausted(detail) => (
                false,
                LoopStatus::Exhausted,
                format!("Agent model candidates exhausted: {detail}"),
            ),
        };

        let mut commit = None;
        if approved && self.config.commit_enabled {
            if changed_files.is_empty() {
                debug!("No changed files; skipping commit");
            } else {
                self.narrator.phase("commit", "started");
                match self.git.commit_all(repo, &format!("tandem: {task}")) {
                    Ok(sha) => {
                        commit = Some(CommitInfo {
                            committed: true,
                            sha: Some(sha),
                            pr_url: None,
                        });
                        self.narrator.phase("commit", "finished");
                    }
                    Err(e) => {
                        // Reported, but never flips the overall result
                        warn!("Commit failed (result stays approved): {e}");
                        final_message.push_str(&format!(" Commit failed: {e}."));
                        commit = Some(CommitInfo::default());
                        self.narrator.phase("commit", "failed");
                    }
                }
            }
        }

        let mut screenshots = Vec::new();
        for result in &state.history {
            for shot in &result.review.artifacts.screenshots {
                if !screenshots.contains(shot) {
                    screenshots.push(shot.clone());
                }
            }
        }

        self.narrator
            .finished(approved, &status.to_string(), &final_message);

        Ok(LoopResult {
            approved,
            iterations: state.iteration,
            history: state.history,
            changed_files,
            screenshots,
            commit,
            final_message,
        })
    }

    /// Best-effort exploration fan-out: narrow read-only questions asked
    /// concurrently and joined. The one sanctioned parallelism pattern.
    async fn explore(&self, task: &str) -> Option<Vec<String>> {
        let candidate = self.config.coder_models.first()?.clone();
        let questions = [
            format!(
                "List the files and modules most relevant to this task: {task}. \
                 Reply with a short bullet list."
            ),
            format!(
                "Summarize the existing tests that cover the area of this task: {task}. \
                 Reply with a short bullet list."
            ),
            format!(
                "Name codebase conventions or constraints that affect this task: {task}. \
                 Reply briefly."
            ),
        ];

        let calls = questions
            .iter()
            .map(|q| self.invoker.invoke(AgentRole::Coder, &candidate, q));
        let replies = join_all(calls).await;

        let notes: Vec<String> = replies
            .into_iter()
            .filter_map(|reply| match reply {
                Ok(r) => Some(summarize(&r.text)),
                Err(e) => {
                    warn!("Explore sub-call failed (continuing): {e}");
                    None
                }
            })
            .filter(|s| !s.is_empty())
            .collect();

        if notes.is_empty() {
            None
        } else {
            Some(notes)
        }
    }

    /// Best-effort planning; on failure the loop proceeds with direct
    /// implementation.
    async fn plan_phase(&self, task: &str, exploration: Option<&[String]>) -> Option<String> {
        let candidate = self.config.coder_models.first()?.clone();
        let mut prompt = format!(
            "Produce a brief implementation plan (3-6 steps) for this task: {task}\n"
        );
        if let Some(notes) = exploration {
            prompt.push_str("\nCodebase notes:\n");
            for note in notes {
                prompt.push_str(&format!("- {note}\n"));
            }
        }

        match self.invoker.invoke(AgentRole::Coder, &candidate, &prompt).await {
            Ok(reply) => Some(reply.text),
            Err(e) => {
                warn!("Plan phase failed, continuing with direct implementation: {e}");
                None
            }
        }
    }

    /// The iteration state machine.
    async fn implement(
        &self,
        state: &mut LoopState,
        store: &PlanStateStore,
        lessons: &LessonStore,
        target: Option<&ResolvedTarget>,
        checks: &CheckRunner,
    ) -> Result<Terminal> {
        let coder = ModelFallbackRunner::new(AgentRole::Coder, self.config.coder_models.clone());
        let reviewer =
            ModelFallbackRunner::new(AgentRole::Reviewer, self.config.reviewer_models.clone());
        let mut injected: Option<String> = None;

        while !state.approved && state.iteration < self.config.max_iterations {
            // (a) Course-correction signals
            if let CourseAction::Escalate(detail) = signals::evaluate(state, &self.config.signals)
            {
                match self
                    .pause(state, PauseReason::Escalation { detail })
                    .await?
                {
                    PauseFlow::Approve => return Ok(Terminal::Approved { by_operator: true }),
                    PauseFlow::Reject(reason) => return Ok(Terminal::Rejected(reason)),
                    PauseFlow::Resume(message) => {
                        state.consecutive_errors = 0;
                        injected = message.or(injected);
                    }
                }
            }

            // (b) 3-strike escalation
            if let Some(action) = state.last_error_action.clone() {
                if store.check_three_strikes(&action)? {
                    match self
                        .pause(state, PauseReason::ThreeStrikes { action: action.clone() })
                        .await?
                    {
                        PauseFlow::Approve => {
                            return Ok(Terminal::Approved { by_operator: true })
                        }
                        PauseFlow::Reject(reason) => return Ok(Terminal::Rejected(reason)),
                        PauseFlow::Resume(message) => {
                            store.resolve_error(&action, "operator redirect")?;
                            state.consecutive_errors = 0;
                            state.last_error_action = None;
                            injected = message.or(injected);
                        }
                    }
                }
            }

            // Periodic configured checkpoint
            if let Some(every) = self.config.auto_pause_every {
                if state.iteration > 0 && state.iteration % every == 0 {
                    match self
                        .pause(
                            state,
                            PauseReason::PeriodicCheckpoint {
                                iteration: state.iteration,
                            },
                        )
                        .await?
                    {
                        PauseFlow::Approve => {
                            return Ok(Terminal::Approved { by_operator: true })
                        }
                        PauseFlow::Reject(reason) => return Ok(Terminal::Rejected(reason)),
                        PauseFlow::Resume(message) => injected = message.or(injected),
                    }
                }
            }

            // (c) Refresh prompt context from durable state before spawning
            // anything (read-before-write discipline).
            let context = store.build_prompt_context()?;
            let lesson_block = lessons.prompt_block(LESSON_PROMPT_LIMIT);
            let coder_prompt = self.build_coder_prompt(state, &context, &lesson_block, injected.as_deref());

            // (d) Coder, with cross-system escalation on exhaustion
            let (coder_outcome, via_alternate) =
                match coder.run(self.invoker.as_ref(), &coder_prompt).await {
                    Ok(outcome) => (outcome, false),
                    Err(exhausted) => {
                        warn!("Coder chain exhausted: {exhausted}");
                        match self.escalate_coder(&exhausted, &coder_prompt).await {
                            Some(outcome) => (outcome, true),
                            None => {
                                return Ok(Terminal::AgentsExhausted(format!(
                                    "coder: {}",
                                    exhausted.summary()
                                )))
                            }
                        }
                    }
                };
            let mut coder_summary = summarize(&coder_outcome.reply.text);
            if via_alternate {
                coder_summary = format!("[alternate backend {}] {coder_summary}", coder_outcome.winner);
            } else if coder_outcome.used_fallback() {
                coder_summary = format!("[fallback {}] {coder_summary}", coder_outcome.winner);
            }

            // (e) Reviewer, then deterministic checks, then merge
            let reviewer_prompt =
                self.build_reviewer_prompt(state, &coder_outcome.reply.text, &context);
            let reviewer_outcome =
                match reviewer.run(self.invoker.as_ref(), &reviewer_prompt).await {
                    Ok(outcome) => outcome,
                    Err(exhausted) => {
                        warn!("Reviewer chain exhausted: {exhausted}");
                        return Ok(Terminal::AgentsExhausted(format!(
                            "reviewer: {}",
                            exhausted.summary()
                        )));
                    }
                };

            let parse = parse_reviewer_reply(&reviewer_outcome.reply.text);
            let mut review =
                resolve_reply(parse, &self.config.parser, &reviewer_outcome.reply.text);

            let mut deterministic = checks.run_all(&self.config.checks).await;
            review.checks.append(&mut deterministic);

            if let Some(url) = &self.config.verify_url {
                let browser = self.browser.run(url).await;
                if browser.service_failed && self.config.pause_on_browser_failure {
                    let detail = browser
                        .check
                        .error
                        .clone()
                        .unwrap_or_else(|| "browser service unavailable".into());
                    match self
                        .pause(state, PauseReason::BrowserFailure { detail })
                        .await?
                    {
                        PauseFlow::Approve => {
                            return Ok(Terminal::Approved { by_operator: true })
                        }
                        PauseFlow::Reject(reason) => return Ok(Terminal::Rejected(reason)),
                        PauseFlow::Resume(message) => injected = message.or(injected),
                    }
                }
                review.checks.push(browser.check);
                if review.runtime.is_none() {
                    review.runtime = browser.runtime;
                }
            }

            if review.target.is_none() {
                if let Some(t) = target {
                    review.target = Some(TargetEvidence {
                        repo: Some(t.name.clone()),
                        path: Some(t.path.display().to_string()),
                        branch: Some(t.branch.clone()),
                        commit: Some(t.commit.clone()),
                    });
                }
            }

            // (f) Hard gates
            let review = evaluate_gates(review, &self.config.gates);

            // (g) Record and persist
            state.iteration += 1;
            self.narrator
                .iteration(state.iteration, review.approved, review.feedback.len());
            let approved = review.approved;
            let feedback = review.feedback.clone();
            state.history.push(IterationResult {
                iteration: state.iteration,
                coder_summary: coder_summary.clone(),
                review,
                injected_message: injected.take(),
            });

            if approved {
                if let Some(action) = state.last_error_action.clone() {
                    store.resolve_error(&action, "approved in later iteration")?;
                }
                state.record_approval();
                store.record_iteration(state.iteration, &coder_summary, true, None)?;
            } else {
                let key = signals::action_key(&feedback);
                let key = if key.is_empty() {
                    "unspecified rejection".to_string()
                } else {
                    key
                };
                store.upsert_error(&key, &feedback)?;
                if let Err(e) = lessons.record(&feedback) {
                    warn!("Failed to record lesson: {e}");
                }
                state.record_rejection(key);
                store.record_iteration(state.iteration, &coder_summary, false, Some(&feedback))?;
            }
        }

        if state.approved {
            Ok(Terminal::Approved { by_operator: false })
        } else {
            Ok(Terminal::Exhausted)
        }
    }

    /// Cross-system escalation after primary-chain exhaustion.
    ///
    /// Skipped when no alternate backend is configured, or when the
    /// exhaustion already involves the alternate backend's provider (the
    /// oscillation guard).
    async fn escalate_coder(
        &self,
        exhausted: &FallbackExhausted,
        prompt: &str,
    ) -> Option<FallbackOutcome> {
        if self.config.alternate_backend.is_empty() {
            return None;
        }
        if self
            .config
            .alternate_backend
            .iter()
            .any(|c| exhausted.involves_provider(&c.provider))
        {
            debug!("Exhaustion already involves the alternate backend; not escalating");
            return None;
        }

        info!("Escalating coder call to alternate backend");
        let alternate =
            ModelFallbackRunner::new(AgentRole::Coder, self.config.alternate_backend.clone());
        match alternate.run(self.invoker.as_ref(), prompt).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Alternate backend also exhausted: {e}");
                None
            }
        }
    }

    async fn pause(&self, state: &mut LoopState, reason: PauseReason) -> Result<PauseFlow> {
        state.paused = true;
        self.narrator.pause(&reason.to_string());
        let context = PauseContext {
            reason,
            iteration: state.iteration,
            last_feedback: state.last_feedback().map(String::from),
        };
        let decision = self.intervention.decide(&context).await?;
        state.paused = false;

        Ok(match decision {
            Decision::Approve => PauseFlow::Approve,
            Decision::Reject { reason } => PauseFlow::Reject(reason),
            Decision::Redirect { message } => {
                PauseFlow::Resume((!message.is_empty()).then_some(message))
            }
        })
    }

    fn build_coder_prompt(
        &self,
        state: &LoopState,
        context: &str,
        lesson_block: &str,
        injected: Option<&str>,
    ) -> String {
        let mut prompt = format!("Task: {}\n\n{context}\n", state.task);
        if !state.acceptance_criteria.is_empty() {
            prompt.push_str("\nAcceptance criteria:\n");
            for criterion in &state.acceptance_criteria {
                prompt.push_str(&format!("- {criterion}\n"));
            }
        }
        if !lesson_block.is_empty() {
            prompt.push('\n');
            prompt.push_str(lesson_block);
        }
        if let Some(message) = injected {
            prompt.push_str(&format!("\nOperator direction: {message}\n"));
        }
        prompt.push_str("\nImplement the next increment of this task, then summarize what changed.\n");
        prompt
    }

    fn build_reviewer_prompt(&self, state: &LoopState, coder_output: &str, context: &str) -> String {
        format!(
            "Task: {}\n\n{context}\n\nThe coder reports:\n{coder_output}\n\n\
             Review the working tree against the task. Reply with a fenced JSON object: \
             {{\"approved\": bool, \"checks\": [{{\"name\", \"passed\", \"evidence\"}}], \
             \"issues\": [...], \"artifacts\": {{...}}, \"feedback\": string}}.\n",
            state.task
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_takes_first_nonempty_line() {
        assert_eq!(summarize("\n\n  first real line\nsecond"), "first real line");
        assert_eq!(summarize(""), "");
    }

    #[test]
    fn test_summarize_caps_length() {
        let long = "x".repeat(1000);
        assert_eq!(summarize(&long).len(), SUMMARY_CHARS);
    }
}
