//! # ctxopt-core - sandboxed guest-code execution
//!
//! `ctxopt-core` runs untrusted JavaScript written by a coding agent against
//! a narrow, read-only view of one working directory.
//!
//! ## Highlights
//!
//! - **Security Analyzer**: lexical scan that rejects dynamic evaluation,
//!   module loading and host-global probes before any interpreter exists.
//! - **Path / Glob Validation**: every guest path is resolved, symlink-checked
//!   and matched against a sensitive-file denylist, producing proof-carrying
//!   [`ValidatedPath`] / [`SafePattern`] values.
//! - **Isolated Runtime**: one V8 isolate per execution with a hard heap
//!   ceiling and a watchdog that terminates even tight loops.
//! - **Capability Bridge**: the frozen `ctx` object (`files`, `git`,
//!   `search`, `pipeline`, `utils`, `compress`, `code`) backed by a
//!   [`CapabilityProvider`].
//! - **Executor**: analyze, acquire, execute, release, and a uniform
//!   [`ExecutionResult`] with host paths scrubbed from every message.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use ctxopt_core::{SandboxContext, SandboxExecutor};
//!
//! # async fn demo() {
//! let executor = SandboxExecutor::default();
//! let context = SandboxContext::new("/path/to/project").with_timeout_ms(2_000);
//! let result = executor
//!     .execute_sandbox("const src = await ctx.files.read('src/lib.rs'); return src.length;", &context)
//!     .await;
//! println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
//! # }
//! ```

pub mod bridge;
pub mod context;
pub mod errors;
pub mod exec;
pub mod guard;
pub mod runtime;
pub mod security;
pub mod tokens;

pub use bridge::{CapabilityBridge, CapabilityProvider, DefaultCapabilities};
pub use context::SandboxContext;
pub use errors::{
    CapabilityError, CompressError, ErrorCode, FileError, GitError, ParseError, PipelineError,
    TaggedError,
};
pub use exec::{ExecutionResult, ExecutionStats, FailureKind, SandboxError, SandboxExecutor};
pub use security::{
    SafePattern, SanitizedCode, SanitizedGitArg, SecurityAnalysis, ValidatedPath, analyze,
    validate_glob_pattern, validate_path,
};
pub use tokens::count_tokens;

pub use ctxopt_commons::{ErrorReporter, MemoryErrorReporter, NoopErrorReporter};
pub use ctxopt_config::SandboxConfig;
