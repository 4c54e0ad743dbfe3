//! The coder/reviewer workflow loop.
//!
//! [`orchestrator::WorkflowOrchestrator`] composes the agent seam, the
//! reviewer parser, the deterministic checks, the approval gates, and the
//! durable plan store into the Explore → Plan → Implement → Commit sequence
//! and its iteration state machine.

pub mod intervention;
pub mod lessons;
pub mod narration;
pub mod orchestrator;
pub mod signals;
pub mod state;

pub use intervention::{Decision, InterventionHandler, PauseContext, PauseReason};
pub use lessons::LessonStore;
pub use narration::Narrator;
pub use orchestrator::WorkflowOrchestrator;
pub use signals::{CourseAction, SignalPolicy};
pub use state::{CommitInfo, IterationResult, LoopResult, LoopState, LoopStatus};
