//! Durable plan-state storage with atomic file operations.
//!
//! Each session owns a directory holding the authoritative `state.json`
//! plus markdown renderings (`plan.md`, `findings.md`, `progress.md`) for
//! the audit trail. Writes are tmp-file + rename under an advisory lock;
//! the design assumes a single writer per session and accepts lost updates
//! under concurrent writers.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::render;
use super::{Findings, Progress, TaskPlan, THREE_STRIKE_THRESHOLD};
use crate::error::{Result, TandemError};

/// Authoritative state file name.
const STATE_FILE: &str = "state.json";

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// Lock file suffix for concurrent access prevention.
const LOCK_SUFFIX: &str = ".lock";

/// Current state schema version.
pub const STATE_VERSION: u32 = 1;

/// The full durable record for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Schema version for forward compatibility.
    pub version: u32,
    /// Session identifier (also the directory name).
    pub session_id: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// The task plan.
    pub plan: TaskPlan,
    /// Supporting findings.
    pub findings: Findings,
    /// Running progress.
    pub progress: Progress,
}

/// Durable store for one session's plan state.
#[derive(Debug, Clone)]
pub struct PlanStateStore {
    dir: PathBuf,
    session_id: String,
}

impl PlanStateStore {
    /// Initialize a fresh session under `root` with a new session id.
    pub fn initialize(root: impl AsRef<Path>, task: &str, criteria: Vec<String>) -> Result<Self> {
        let session_id = Uuid::new_v4().to_string();
        let store = Self {
            dir: root.as_ref().join(&session_id),
            session_id,
        };
        let state = SessionState {
            version: STATE_VERSION,
            session_id: store.session_id.clone(),
            created_at: Utc::now(),
            plan: TaskPlan::with_default_phases(task, criteria),
            findings: Findings::default(),
            progress: Progress::default(),
        };
        store.save(&state)?;
        Ok(store)
    }

    /// Open an existing session directory.
    #[must_use]
    pub fn open(root: impl AsRef<Path>, session_id: &str) -> Self {
        Self {
            dir: root.as_ref().join(session_id),
            session_id: session_id.to_string(),
        }
    }

    /// Find the most recently modified session under `root`, if any.
    pub fn latest(root: impl AsRef<Path>) -> Result<Option<Self>> {
        let root = root.as_ref();
        if !root.exists() {
            return Ok(None);
        }
        let mut newest: Option<(std::time::SystemTime, String)> = None;
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.path().join(STATE_FILE).exists() {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
                newest = Some((modified, name));
            }
        }
        Ok(newest.map(|(_, id)| Self::open(root, &id)))
    }

    /// Session id of this store.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Session directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(format!("{STATE_FILE}{TMP_SUFFIX}"))
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{STATE_FILE}{LOCK_SUFFIX}"))
    }

    /// Load the session state.
    ///
    /// A corrupt or missing JSON record falls back to the lossy markdown
    /// path when `plan.md` exists: task, current phase, criteria, and errors
    /// are recovered; phases and decisions come back empty.
    pub fn load(&self) -> Result<SessionState> {
        let state_path = self.state_path();
        if state_path.exists() {
            let contents = fs::read_to_string(&state_path)?;
            match serde_json::from_str::<SessionState>(&contents) {
                Ok(state) => return Ok(state),
                Err(e) => {
                    warn!(
                        "Corrupted state file at {}: {}. Falling back to markdown.",
                        state_path.display(),
                        e
                    );
                }
            }
        }

        let plan_md = self.dir.join("plan.md");
        if plan_md.exists() {
            let plan = render::parse_plan(&fs::read_to_string(&plan_md)?);
            let findings = fs::read_to_string(self.dir.join("findings.md"))
                .map(|md| render::parse_findings(&md))
                .unwrap_or_default();
            return Ok(SessionState {
                version: STATE_VERSION,
                session_id: self.session_id.clone(),
                created_at: Utc::now(),
                plan,
                findings,
                progress: Progress::default(),
            });
        }

        Err(TandemError::plan_state(format!(
            "no state found for session {}",
            self.session_id
        )))
    }

    /// Save the session state atomically, then refresh the markdown
    /// renderings (best effort).
    pub fn save(&self, state: &SessionState) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let lock_file = File::create(self.lock_path())?;
        FileExt::lock_exclusive(&lock_file).map_err(|e| TandemError::SessionLock {
            detail: e.to_string(),
        })?;

        let json = serde_json::to_string_pretty(state)?;
        let tmp_path = self.tmp_path();
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(json.as_bytes())?;
        tmp_file.sync_all()?;
        fs::rename(&tmp_path, self.state_path())?;

        for (name, contents) in [
            ("plan.md", render::render_plan(&state.plan)),
            ("findings.md", render::render_findings(&state.findings)),
            ("progress.md", render::render_progress(&state.progress)),
        ] {
            if let Err(e) = fs::write(self.dir.join(name), contents) {
                warn!("Failed to write {} rendering: {}", name, e);
            }
        }

        Ok(())
    }

    /// Read-modify-write the plan. Only the fields the closure touches
    /// change; everything else is carried through.
    pub fn update_plan(&self, f: impl FnOnce(&mut TaskPlan)) -> Result<SessionState> {
        let mut state = self.load()?;
        f(&mut state.plan);
        self.save(&state)?;
        Ok(state)
    }

    /// Read-modify-write the findings.
    pub fn update_findings(&self, f: impl FnOnce(&mut Findings)) -> Result<SessionState> {
        let mut state = self.load()?;
        f(&mut state.findings);
        self.save(&state)?;
        Ok(state)
    }

    /// Read-modify-write the progress record.
    pub fn update_progress(&self, f: impl FnOnce(&mut Progress)) -> Result<SessionState> {
        let mut state = self.load()?;
        f(&mut state.progress);
        self.save(&state)?;
        Ok(state)
    }

    /// Record a failure for the action key; returns the attempt count.
    pub fn upsert_error(&self, action: &str, message: &str) -> Result<u32> {
        let mut state = self.load()?;
        state.plan.upsert_error(action, message);
        state.progress.last_action = Some(action.to_string());
        *state
            .progress
            .action_counts
            .entry(action.to_string())
            .or_insert(0) += 1;
        let attempts = state
            .plan
            .errors
            .iter()
            .find(|e| e.is_unresolved() && e.action == action)
            .map_or(1, |e| e.attempts);
        self.save(&state)?;
        Ok(attempts)
    }

    /// Attach a resolution to the action's unresolved entry.
    pub fn resolve_error(&self, action: &str, resolution: &str) -> Result<()> {
        self.update_plan(|plan| plan.resolve_error(action, resolution))?;
        Ok(())
    }

    /// Whether the action has three unresolved strikes.
    pub fn check_three_strikes(&self, action: &str) -> Result<bool> {
        Ok(self.load()?.plan.has_three_strikes(action))
    }

    /// Record the outcome of one iteration.
    pub fn record_iteration(
        &self,
        iteration: u32,
        summary: &str,
        approved: bool,
        feedback: Option<&str>,
    ) -> Result<()> {
        self.update_progress(|progress| {
            progress.iterations = iteration;
            progress.iteration_log.push(format!(
                "iteration {iteration}: {} - {summary}",
                if approved { "approved" } else { "rejected" }
            ));
            progress.last_feedback = feedback.map(|s| s.to_string());
        })?;
        Ok(())
    }

    /// Render the prompt-injection context from the durable state.
    ///
    /// Always reads fresh from disk (read-before-write discipline): the
    /// caller must not cache this across iterations.
    pub fn build_prompt_context(&self) -> Result<String> {
        let state = self.load()?;
        let mut out = String::from("## Plan Context\n\n");

        out.push_str(&format!("Task: {}\n", state.plan.task));
        out.push_str(&format!("Current phase: {}\n", state.plan.current_phase));
        out.push_str(&format!(
            "Iterations completed: {}\n",
            state.progress.iterations
        ));
        if let Some(action) = &state.progress.last_action {
            out.push_str(&format!("Last error action: {action}\n"));
        }

        let recent: Vec<&str> = state
            .plan
            .decisions
            .iter()
            .rev()
            .take(3)
            .map(|d| d.text.as_str())
            .collect();
        if !recent.is_empty() {
            out.push_str("\nRecent decisions:\n");
            for text in recent.iter().rev() {
                out.push_str(&format!("- {text}\n"));
            }
        }

        let unresolved: Vec<String> = state
            .plan
            .unresolved_errors()
            .map(|e| format!("- {} (attempts: {}): {}", e.action, e.attempts, e.message))
            .collect();
        if !unresolved.is_empty() {
            out.push_str("\nUnresolved errors:\n");
            for line in &unresolved {
                out.push_str(line);
                out.push('\n');
            }
        }

        if let Some(feedback) = &state.progress.last_feedback {
            out.push_str("\nLast review feedback:\n");
            out.push_str(feedback);
            out.push('\n');
        }

        let struck: Vec<&str> = state
            .plan
            .unresolved_errors()
            .filter(|e| e.attempts >= THREE_STRIKE_THRESHOLD)
            .map(|e| e.action.as_str())
            .collect();
        if !struck.is_empty() {
            out.push_str("\nWARNING: the following actions have failed ");
            out.push_str(&format!(
                "{THREE_STRIKE_THRESHOLD}+ times without resolution: {}. ",
                struck.join(", ")
            ));
            out.push_str("Do not repeat the same approach; change strategy.\n");
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (PlanStateStore, TempDir) {
        let temp = TempDir::new().expect("temp dir");
        let store = PlanStateStore::initialize(temp.path(), "add dark mode", vec![])
            .expect("initialize");
        (store, temp)
    }

    #[test]
    fn test_initialize_creates_state_and_renderings() {
        let (store, _temp) = test_store();
        assert!(store.dir().join("state.json").exists());
        assert!(store.dir().join("plan.md").exists());
        assert!(store.dir().join("findings.md").exists());
        assert!(store.dir().join("progress.md").exists());
    }

    #[test]
    fn test_load_roundtrip() {
        let (store, _temp) = test_store();
        let state = store.load().unwrap();
        assert_eq!(state.plan.task, "add dark mode");
        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.session_id, store.session_id());
    }

    #[test]
    fn test_update_plan_persists_across_open() {
        let (store, temp) = test_store();
        store
            .update_plan(|plan| plan.record_decision("use CSS variables"))
            .unwrap();

        let reopened = PlanStateStore::open(temp.path(), store.session_id());
        let state = reopened.load().unwrap();
        assert_eq!(state.plan.decisions.len(), 1);
    }

    #[test]
    fn test_upsert_error_returns_attempts() {
        let (store, _temp) = test_store();
        assert_eq!(store.upsert_error("fix tests", "boom").unwrap(), 1);
        assert_eq!(store.upsert_error("fix tests", "boom").unwrap(), 2);
        assert_eq!(store.upsert_error("fix tests", "boom").unwrap(), 3);
        assert!(store.check_three_strikes("fix tests").unwrap());

        store.resolve_error("fix tests", "rewrote").unwrap();
        assert!(!store.check_three_strikes("fix tests").unwrap());
    }

    #[test]
    fn test_corrupt_state_falls_back_to_markdown() {
        let (store, temp) = test_store();
        store
            .update_plan(|plan| plan.upsert_error("deploy", "boom"))
            .unwrap();

        fs::write(store.dir().join("state.json"), "{not valid json").unwrap();

        let reopened = PlanStateStore::open(temp.path(), store.session_id());
        let state = reopened.load().unwrap();
        assert_eq!(state.plan.task, "add dark mode");
        assert_eq!(state.plan.errors.len(), 1);
        // Lossy path: phases render but do not come back
        assert!(state.plan.phases.is_empty());
    }

    #[test]
    fn test_missing_session_errors() {
        let temp = TempDir::new().unwrap();
        let store = PlanStateStore::open(temp.path(), "nonexistent");
        assert!(store.load().is_err());
    }

    #[test]
    fn test_prompt_context_includes_three_strike_warning() {
        let (store, _temp) = test_store();
        for _ in 0..3 {
            store.upsert_error("fix flaky test", "timeout").unwrap();
        }
        let context = store.build_prompt_context().unwrap();
        assert!(context.contains("## Plan Context"));
        assert!(context.contains("fix flaky test (attempts: 3)"));
        assert!(context.contains("WARNING"));
    }

    #[test]
    fn test_prompt_context_without_errors_has_no_warning() {
        let (store, _temp) = test_store();
        store
            .record_iteration(1, "initial attempt", false, Some("needs tests"))
            .unwrap();
        let context = store.build_prompt_context().unwrap();
        assert!(!context.contains("WARNING"));
        assert!(context.contains("needs tests"));
        assert!(context.contains("Iterations completed: 1"));
    }

    #[test]
    fn test_latest_finds_most_recent_session() {
        let temp = TempDir::new().unwrap();
        let _first = PlanStateStore::initialize(temp.path(), "task one", vec![]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let second = PlanStateStore::initialize(temp.path(), "task two", vec![]).unwrap();

        let latest = PlanStateStore::latest(temp.path()).unwrap().unwrap();
        assert_eq!(latest.session_id(), second.session_id());
    }
}
