//! Human-intervention seam.
//!
//! The loop suspends indefinitely (no timeout) at its pause points and
//! blocks on an external decision: approve the work as-is, reject the task,
//! or redirect the coder with a message. The handler is an external
//! collaborator; the CLI ships a stdin implementation and tests use
//! [`crate::testing::AutoDecide`].

use async_trait::async_trait;
use colored::Colorize;
use tracing::info;

use crate::error::Result;

/// Why the loop paused.
#[derive(Debug, Clone)]
pub enum PauseReason {
    /// An action failed three times without resolution.
    ThreeStrikes { action: String },
    /// Course-correction signals fired.
    Escalation { detail: String },
    /// The configured periodic checkpoint came due.
    PeriodicCheckpoint { iteration: u32 },
    /// Browser verification could not run at all.
    BrowserFailure { detail: String },
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ThreeStrikes { action } => {
                write!(f, "action '{action}' failed 3 times without resolution")
            }
            Self::Escalation { detail } => write!(f, "course correction: {detail}"),
            Self::PeriodicCheckpoint { iteration } => {
                write!(f, "periodic checkpoint at iteration {iteration}")
            }
            Self::BrowserFailure { detail } => write!(f, "browser verification failed: {detail}"),
        }
    }
}

/// Everything a human needs to decide.
#[derive(Debug, Clone)]
pub struct PauseContext {
    pub reason: PauseReason,
    pub iteration: u32,
    pub last_feedback: Option<String>,
}

/// The human's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Accept the work as it stands; the loop ends approved.
    Approve,
    /// Abandon the task; the loop ends rejected.
    Reject { reason: String },
    /// Keep iterating with an injected message for the coder.
    Redirect { message: String },
}

/// Seam for the blocking human decision.
#[async_trait]
pub trait InterventionHandler: Send + Sync {
    /// Block until a decision is made. There is deliberately no timeout.
    async fn decide(&self, context: &PauseContext) -> Result<Decision>;
}

/// Stdin-backed intervention for the CLI.
#[derive(Debug, Clone, Default)]
pub struct ConsoleIntervention;

#[async_trait]
impl InterventionHandler for ConsoleIntervention {
    async fn decide(&self, context: &PauseContext) -> Result<Decision> {
        info!("Loop paused: {}", context.reason);
        println!();
        println!("{} {}", "PAUSED:".yellow().bold(), context.reason);
        if let Some(feedback) = &context.last_feedback {
            println!("Last feedback:\n{feedback}");
        }
        println!(
            "{}",
            "[a]pprove as-is / [r]eject task / any other text redirects the coder:".cyan()
        );

        let line = tokio::task::spawn_blocking(|| {
            let mut buf = String::new();
            std::io::stdin().read_line(&mut buf).map(|_| buf)
        })
        .await
        .map_err(|e| anyhow::anyhow!("intervention input task failed: {e}"))??;

        let trimmed = line.trim();
        Ok(match trimmed {
            "a" | "approve" => Decision::Approve,
            "r" | "reject" => Decision::Reject {
                reason: "rejected at pause prompt".into(),
            },
            other => Decision::Redirect {
                message: other.to_string(),
            },
        })
    }
}
