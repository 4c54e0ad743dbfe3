//! Deterministic verification checks.
//!
//! Two kinds of checks feed the approval gates:
//!
//! - shell commands with a timeout that escalates from SIGTERM to SIGKILL,
//!   producing a [`CheckResult`] (never a crash - an expired timeout is a
//!   failed check);
//! - browser verification through the [`BrowserVerifier`] seam, with an
//!   HTTP-only fallback when no browser service is available.
//!
//! # Example
//!
//! ```rust,ignore
//! use tandem::checks::{CheckRunner, CheckSpec};
//!
//! let runner = CheckRunner::new(".");
//! let result = runner.run(&CheckSpec::required("cargo test")).await;
//! assert!(result.passed);
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::Result;
use crate::review::{CheckResult, RuntimeEvidence, BROWSER_CHECK_NAME};

/// Default timeout for a deterministic check command.
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 120;

/// Grace period between SIGTERM and SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// How much output to keep from a successful check.
const SUCCESS_TAIL_CHARS: usize = 500;

/// A configured deterministic check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSpec {
    /// Shell command to run.
    pub command: String,
    /// Timeout in seconds; defaults to [`DEFAULT_CHECK_TIMEOUT_SECS`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Whether a failure of this check blocks approval.
    #[serde(default)]
    pub required: bool,
}

impl CheckSpec {
    /// Create an optional check.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout_seconds: None,
            required: false,
        }
    }

    /// Create a required check.
    pub fn required(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout_seconds: None,
            required: true,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(DEFAULT_CHECK_TIMEOUT_SECS))
    }
}

/// Keep the last `limit` characters of a string, on a char boundary.
fn tail(s: &str, limit: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= limit {
        s.to_string()
    } else {
        chars[chars.len() - limit..].iter().collect()
    }
}

/// Extract the most useful error block from failed-check output.
///
/// Takes everything from the first line mentioning "error" onward, capped at
/// roughly the success-tail size; falls back to the plain tail.
fn extract_error_block(output: &str) -> String {
    let from_error = output
        .lines()
        .position(|line| line.to_lowercase().contains("error"))
        .map(|idx| {
            output
                .lines()
                .skip(idx)
                .collect::<Vec<_>>()
                .join("\n")
        });
    match from_error {
        Some(block) if !block.is_empty() => tail(&block, SUCCESS_TAIL_CHARS * 2),
        _ => tail(output, SUCCESS_TAIL_CHARS),
    }
}

/// Send SIGTERM, wait out the grace period, then SIGKILL.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
                return;
            }
            warn!("Check ignored SIGTERM, escalating to SIGKILL");
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

/// Runs deterministic shell checks.
#[derive(Debug, Clone)]
pub struct CheckRunner {
    working_dir: PathBuf,
}

impl CheckRunner {
    /// Create a runner rooted at the given working directory.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    /// Run a single check to completion.
    ///
    /// Never returns an error: spawn failures and timeouts become failed
    /// check results with the detail in `error`.
    pub async fn run(&self, spec: &CheckSpec) -> CheckResult {
        debug!("Running check: {}", spec.command);

        let mut child = match Command::new("sh")
            .args(["-c", &spec.command])
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let mut result = CheckResult::fail(&spec.command)
                    .with_error(format!("failed to start: {e}"));
                result.required = spec.required;
                return result;
            }
        };

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let reader = tokio::spawn(async move {
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut stdout).await;
            }
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            (stdout, stderr)
        });

        let status = match tokio::time::timeout(spec.timeout(), child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                let mut result =
                    CheckResult::fail(&spec.command).with_error(format!("wait failed: {e}"));
                result.required = spec.required;
                return result;
            }
            Err(_) => {
                warn!(
                    "Check '{}' timed out after {}s",
                    spec.command,
                    spec.timeout().as_secs()
                );
                terminate(&mut child).await;
                reader.abort();
                let mut result = CheckResult::fail(&spec.command).with_error(format!(
                    "timed out after {}s",
                    spec.timeout().as_secs()
                ));
                result.required = spec.required;
                return result;
            }
        };

        let (stdout, stderr) = reader.await.unwrap_or_default();
        let combined = if stderr.is_empty() {
            stdout
        } else {
            format!("{stdout}\n{stderr}")
        };

        let mut result = if status.success() {
            CheckResult::pass(&spec.command).with_output(tail(&combined, SUCCESS_TAIL_CHARS))
        } else {
            CheckResult::fail(&spec.command).with_output(extract_error_block(&combined))
        };
        result.required = spec.required;
        result
    }

    /// Run all checks sequentially, preserving their configured order.
    pub async fn run_all(&self, specs: &[CheckSpec]) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            results.push(self.run(spec).await);
        }
        results
    }
}

// ============================================================================
// Browser Verification
// ============================================================================

/// What a browser verification observed.
#[derive(Debug, Clone, Default)]
pub struct BrowserVerification {
    /// Page or console errors observed (empty means healthy).
    pub errors: Vec<String>,
    /// Runtime session evidence, when the verifier can observe it.
    pub runtime: Option<RuntimeEvidence>,
}

/// Seam for browser verification (an external collaborator).
#[async_trait]
pub trait BrowserVerifier: Send + Sync {
    /// Drive the browser against the URL and report what was observed.
    async fn verify(&self, url: &str) -> Result<BrowserVerification>;
}

/// HTTP-only fallback used when no browser service is available.
///
/// Can only observe reachability and status codes - it reports no runtime
/// evidence, so the runtime gates judge whatever the reviewer supplied.
#[derive(Debug, Clone, Default)]
pub struct HttpFallbackVerifier {
    client: reqwest::Client,
}

#[async_trait]
impl BrowserVerifier for HttpFallbackVerifier {
    async fn verify(&self, url: &str) -> Result<BrowserVerification> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP fallback request failed: {e}"))?;

        let status = response.status();
        let errors = if status.is_success() {
            Vec::new()
        } else {
            vec![format!("HTTP status {status} from {url}")]
        };
        Ok(BrowserVerification {
            errors,
            runtime: None,
        })
    }
}

/// Outcome of the merged browser verification step.
#[derive(Debug, Clone)]
pub struct BrowserOutcome {
    /// The check result to merge into the review.
    pub check: CheckResult,
    /// Runtime evidence, when the verifier observed any.
    pub runtime: Option<RuntimeEvidence>,
    /// True when no verifier (primary or fallback) could run at all.
    pub service_failed: bool,
}

/// Browser verification with HTTP-only degradation.
pub struct BrowserCheck {
    primary: Option<Box<dyn BrowserVerifier>>,
    fallback: HttpFallbackVerifier,
}

impl BrowserCheck {
    /// Create with an optional primary (full-browser) verifier.
    #[must_use]
    pub fn new(primary: Option<Box<dyn BrowserVerifier>>) -> Self {
        Self {
            primary,
            fallback: HttpFallbackVerifier::default(),
        }
    }

    /// Verify the URL, degrading to HTTP-only when the browser service is
    /// unavailable.
    pub async fn run(&self, url: &str) -> BrowserOutcome {
        if let Some(primary) = &self.primary {
            match primary.verify(url).await {
                Ok(v) => return Self::outcome(v, false),
                Err(e) => {
                    warn!("Browser service unavailable, degrading to HTTP-only: {e}");
                }
            }
        }

        match self.fallback.verify(url).await {
            Ok(v) => {
                let mut outcome = Self::outcome(v, false);
                outcome.check.evidence = Some("verified via HTTP-only fallback".into());
                outcome
            }
            Err(e) => BrowserOutcome {
                check: CheckResult::fail(BROWSER_CHECK_NAME)
                    .with_error(format!("browser and HTTP fallback both failed: {e}")),
                runtime: None,
                service_failed: true,
            },
        }
    }

    fn outcome(v: BrowserVerification, service_failed: bool) -> BrowserOutcome {
        let check = if v.errors.is_empty() {
            CheckResult::pass(BROWSER_CHECK_NAME)
        } else {
            CheckResult::fail(BROWSER_CHECK_NAME).with_output(v.errors.join("\n"))
        };
        BrowserOutcome {
            check,
            runtime: v.runtime,
            service_failed,
        }
    }
}
