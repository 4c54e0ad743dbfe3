//! CLI-backed agent invoker.
//!
//! Spawns a provider CLI (the provider key is the binary name), writes the
//! prompt to stdin, and collects stdout as the reply. Auth and quota
//! failures are recognized from stderr so the fallback runner can classify
//! them as not-retryable within the same provider family.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{AgentInvoker, AgentReply, AgentRole, AgentTimeouts, ModelCandidate};
use crate::error::{Result, TandemError};

/// Markers in agent stderr that indicate an auth or quota failure.
const AUTH_MARKERS: [&str; 4] = ["unauthorized", "401", "quota", "rate limit"];

/// Agent invoker backed by provider CLI processes.
#[derive(Debug, Clone)]
pub struct CliAgent {
    /// Working directory for spawned agents.
    working_dir: PathBuf,
    /// Spawn/completion windows.
    timeouts: AgentTimeouts,
}

impl CliAgent {
    /// Create an invoker rooted at the given working directory.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>, timeouts: AgentTimeouts) -> Self {
        Self {
            working_dir: working_dir.into(),
            timeouts,
        }
    }

    fn locate_binary(&self, provider: &str) -> Result<PathBuf> {
        which::which(provider).map_err(|e| TandemError::SpawnTimeout {
            timeout_secs: self.timeouts.spawn_secs,
            detail: format!("provider binary '{provider}' not found: {e}"),
        })
    }
}

#[async_trait]
impl AgentInvoker for CliAgent {
    async fn invoke(
        &self,
        role: AgentRole,
        candidate: &ModelCandidate,
        prompt: &str,
    ) -> Result<AgentReply> {
        let binary = self.locate_binary(&candidate.provider)?;
        debug!(
            "Spawning {} agent: {} ({} chars of prompt)",
            role,
            candidate,
            prompt.len()
        );

        // Spawn-accept window: the process must exist with a pid before the
        // short timeout expires.
        let spawn = async {
            Command::new(&binary)
                .args(["-p", "--model", &candidate.model])
                .current_dir(&self.working_dir)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
        };
        let mut child = match tokio::time::timeout(self.timeouts.spawn(), spawn).await {
            Ok(Ok(child)) => child,
            Ok(Err(e)) => {
                return Err(TandemError::SpawnTimeout {
                    timeout_secs: self.timeouts.spawn_secs,
                    detail: e.to_string(),
                })
            }
            Err(_) => {
                return Err(TandemError::SpawnTimeout {
                    timeout_secs: self.timeouts.spawn_secs,
                    detail: "spawn not accepted".into(),
                })
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.flush().await?;
            drop(stdin);
        }

        // Completion window: independent of the spawn window and much longer.
        let output = match tokio::time::timeout(
            self.timeouts.completion(),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(TandemError::AgentProcess {
                    exit_code: -1,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                warn!("{} agent {} exceeded completion window", role, candidate);
                return Err(TandemError::CompletionTimeout {
                    timeout_secs: self.timeouts.completion_secs,
                });
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let lower = stderr.to_lowercase();
            if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
                return Err(TandemError::AgentAuth {
                    detail: stderr.trim().to_string(),
                });
            }
            return Err(TandemError::AgentProcess {
                exit_code: output.status.code().unwrap_or(1),
                message: stderr.trim().to_string(),
            });
        }

        Ok(AgentReply {
            text: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}
