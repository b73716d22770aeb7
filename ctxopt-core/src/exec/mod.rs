//! Sandbox executor: the host's single entry point for running guest code.

mod executor;

pub use executor::{ExecutionResult, ExecutionStats, FailureKind, SandboxError, SandboxExecutor};
