//! Tandem - Autonomous coder/reviewer workflow orchestration
//!
//! A Rust orchestrator for an autonomous "coder proposes, reviewer verifies"
//! loop with deterministic approval gates, sequential model fallback,
//! 3-strike escalation to a human, and durable cross-iteration plan state.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`agent`] - Agent invocation seam and the model-fallback runner
//! - [`checks`] - Deterministic shell checks and browser verification
//! - [`config`] - Single-pass resolved workflow configuration
//! - [`error`] - Custom error types and handling
//! - [`git`] - Git operations behind a testable seam
//! - [`plan`] - Durable session plan/findings/progress state
//! - [`review`] - Review data model, reply parser, and approval gates
//! - [`target`] - Target binding (task → repository/branch)
//! - [`testing`] - Testing infrastructure (mocks for every seam)
//! - [`workflow`] - The orchestrator and its iteration state machine
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tandem::agent::CliAgent;
//! use tandem::config::WorkflowConfig;
//! use tandem::git::GitCli;
//! use tandem::workflow::intervention::ConsoleIntervention;
//! use tandem::workflow::WorkflowOrchestrator;
//!
//! let config = WorkflowConfig::load(".")?;
//! let agent = Arc::new(CliAgent::new(".", config.agent_timeouts));
//! let orchestrator = WorkflowOrchestrator::new(
//!     config,
//!     agent,
//!     Arc::new(GitCli),
//!     Arc::new(ConsoleIntervention),
//! );
//! let result = orchestrator.run("add dark mode toggle").await?;
//! println!("{}", result.final_message);
//! ```

pub mod agent;
pub mod checks;
pub mod config;
pub mod error;
pub mod git;
pub mod plan;
pub mod review;
pub mod target;
pub mod testing;
pub mod workflow;

// Re-export commonly used types
pub use error::{Result, TandemError};

// Re-export config types
pub use config::{ConfigOverrides, WorkflowConfig};

// Re-export agent types
pub use agent::{
    AgentInvoker, AgentReply, AgentRole, CliAgent, FallbackExhausted, FallbackOutcome,
    ModelCandidate, ModelFallbackRunner,
};

// Re-export review types
pub use review::{
    evaluate_gates, parse_reviewer_reply, resolve_reply, Artifacts, CheckResult, GateConfig,
    ParseOutcome, ParserConfig, ReviewIssue, ReviewResult, RuntimeEvidence, TargetEvidence,
    ToolCallEvidence,
};

// Re-export plan types
pub use plan::{ErrorEntry, Findings, PlanStateStore, Progress, TaskPlan};

// Re-export workflow types
pub use workflow::{
    IterationResult, LoopResult, LoopState, LoopStatus, Narrator, WorkflowOrchestrator,
};

// Re-export target types
pub use target::{AmbiguityPolicy, BindingRules, ResolvedTarget, TargetRule};
