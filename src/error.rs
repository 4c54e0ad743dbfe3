//! Custom error types for tandem.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the workflow loop.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for tandem operations
#[derive(Error, Debug)]
pub enum TandemError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Target Binding Errors
    // =========================================================================
    /// Task text matched no configured target
    #[error("No target matched task: {task}")]
    NoTargetMatch { task: String },

    /// Task text matched more than one target and no policy resolves the tie
    #[error("Ambiguous target for task: candidates {candidates:?}")]
    AmbiguousTarget {
        task: String,
        candidates: Vec<String>,
    },

    /// Bound repository is on an unexpected branch
    #[error("Target '{target}' is on branch '{actual}', expected '{expected}'")]
    BranchMismatch {
        target: String,
        expected: String,
        actual: String,
    },

    // =========================================================================
    // Agent Errors
    // =========================================================================
    /// Agent process failed to spawn within the accept window
    #[error("Agent spawn not accepted within {timeout_secs}s: {detail}")]
    SpawnTimeout { timeout_secs: u64, detail: String },

    /// Agent did not complete within the wait window
    #[error("Agent did not complete within {timeout_secs}s")]
    CompletionTimeout { timeout_secs: u64 },

    /// Agent process exited with a failure
    #[error("Agent process failed with exit code {exit_code}: {message}")]
    AgentProcess { exit_code: i32, message: String },

    /// Agent backend rejected credentials or quota
    #[error("Agent auth/quota failure: {detail}")]
    AgentAuth { detail: String },

    /// Every candidate in a model-fallback chain failed
    #[error("All {attempted} model candidates failed: {summary}")]
    FallbackExhausted { attempted: usize, summary: String },

    // =========================================================================
    // Loop Errors
    // =========================================================================
    /// Loop execution failed
    #[error("Loop execution error: {message}")]
    Loop { message: String },

    /// Maximum iterations exceeded
    #[error("Maximum iterations ({max}) exceeded without approval")]
    MaxIterations { max: u32 },

    /// Human reviewer rejected the task during a pause
    #[error("Rejected by operator: {reason}")]
    OperatorRejected { reason: String },

    // =========================================================================
    // Plan State Errors
    // =========================================================================
    /// Durable plan state operation failed
    #[error("Plan state error: {message}")]
    PlanState { message: String },

    /// Session lock could not be acquired
    #[error("Failed to acquire session lock: {detail}")]
    SessionLock { detail: String },

    // =========================================================================
    // Check Errors
    // =========================================================================
    /// Verification command could not be started
    #[error("Check '{command}' failed to start: {message}")]
    CheckSpawn { command: String, message: String },

    /// Git operation failed
    #[error("Git operation failed: {operation} - {message}")]
    Git { operation: String, message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TandemError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a loop error
    pub fn loop_error(message: impl Into<String>) -> Self {
        Self::Loop {
            message: message.into(),
        }
    }

    /// Create a plan state error
    pub fn plan_state(message: impl Into<String>) -> Self {
        Self::PlanState {
            message: message.into(),
        }
    }

    /// Create a git error
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            operation: operation.into(),
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this failure is eligible for same-family model fallback.
    ///
    /// Auth/quota failures are excluded: retrying the same provider family
    /// will not help, though cross-system escalation may still be attempted.
    pub fn is_retryable_same_family(&self) -> bool {
        matches!(
            self,
            Self::SpawnTimeout { .. }
                | Self::CompletionTimeout { .. }
                | Self::AgentProcess { .. }
                | Self::Io(_)
        )
    }

    /// Check if this error requires a human decision
    pub fn requires_human(&self) -> bool {
        matches!(
            self,
            Self::OperatorRejected { .. } | Self::AmbiguousTarget { .. }
        )
    }

    /// Check if this error is fatal (should abort before the loop starts)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoTargetMatch { .. }
                | Self::AmbiguousTarget { .. }
                | Self::BranchMismatch { .. }
                | Self::Config { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoTargetMatch { .. }
            | Self::AmbiguousTarget { .. }
            | Self::BranchMismatch { .. } => 2,
            Self::MaxIterations { .. } => 3,
            Self::OperatorRejected { .. } => 4,
            Self::FallbackExhausted { .. } => 5,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for tandem results
pub type Result<T> = std::result::Result<T, TandemError>;
