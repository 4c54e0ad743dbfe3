//! Testing infrastructure.
//!
//! Mock implementations of the external seams (agents, git, browser, human
//! intervention) so loop logic can be exercised without real processes,
//! repositories, or people.

pub mod mocks;

pub use mocks::{
    AutoDecide, MockBrowserVerifier, MockGitOperations, PairedAgent, ScriptedAgent,
};
