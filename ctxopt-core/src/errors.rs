//! Closed error taxonomy for the capability surface.
//!
//! Every domain error is a [`TaggedError`] carrying a machine-readable code,
//! an optional step/context label, a message and an optional cause. Values are
//! only built through the named factories on each alias so every error site
//! can be found by grepping for its code.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Code enum shared contract for [`TaggedError`].
pub trait ErrorCode: Copy + fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn as_str(self) -> &'static str;

    /// Whether this code represents a rejected security check rather than an
    /// ordinary failure. Hosts alert on these.
    fn is_security_violation(self) -> bool {
        false
    }
}

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct TaggedError<C: ErrorCode> {
    code: C,
    context: Option<String>,
    message: String,
    #[source]
    cause: Option<Cause>,
}

impl<C: ErrorCode> TaggedError<C> {
    fn build(code: C, context: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            context,
            message: message.into(),
            cause: None,
        }
    }

    fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> C {
        self.code
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_security_violation(&self) -> bool {
        self.code.is_security_violation()
    }
}

macro_rules! error_codes {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? } security: [$($sec:ident),*]) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum $name {
            $($variant),+
        }

        impl ErrorCode for $name {
            fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            fn is_security_violation(self) -> bool {
                false $(|| matches!(self, Self::$sec))*
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

error_codes!(FileErrorCode {
    NotFound => "FILE_NOT_FOUND",
    PathTraversal => "PATH_TRAVERSAL",
    Blocked => "FILE_BLOCKED",
    InvalidPath => "INVALID_PATH",
    ReadFailed => "READ_FAILED",
    GlobFailed => "GLOB_FAILED",
} security: [PathTraversal, Blocked, InvalidPath]);

error_codes!(GitErrorCode {
    InvalidArgument => "GIT_INVALID_ARGUMENT",
    BlockedCommand => "GIT_BLOCKED_COMMAND",
    SpawnFailed => "GIT_SPAWN_FAILED",
    CommandFailed => "GIT_COMMAND_FAILED",
    Timeout => "GIT_TIMEOUT",
} security: [InvalidArgument, BlockedCommand]);

error_codes!(PipelineErrorCode {
    Empty => "EMPTY_PIPELINE",
    InvalidStep => "INVALID_STEP",
    StepFailed => "STEP_FAILED",
} security: []);

error_codes!(CompressErrorCode {
    Unsupported => "COMPRESS_UNSUPPORTED",
    InvalidInput => "COMPRESS_INVALID_INPUT",
    Failed => "COMPRESS_FAILED",
} security: []);

error_codes!(ParseErrorCode {
    Unsupported => "PARSE_UNSUPPORTED",
    UnknownLanguage => "UNKNOWN_LANGUAGE",
    Failed => "PARSE_FAILED",
} security: []);

pub type FileError = TaggedError<FileErrorCode>;
pub type GitError = TaggedError<GitErrorCode>;
pub type PipelineError = TaggedError<PipelineErrorCode>;
pub type CompressError = TaggedError<CompressErrorCode>;
pub type ParseError = TaggedError<ParseErrorCode>;

impl FileError {
    pub fn not_found(path: &str) -> Self {
        Self::build(
            FileErrorCode::NotFound,
            Some(path.to_string()),
            format!("File not found: {path}"),
        )
    }

    pub fn traversal(path: &str) -> Self {
        Self::build(
            FileErrorCode::PathTraversal,
            Some(path.to_string()),
            format!("Path escapes the working directory: {path}"),
        )
    }

    pub fn blocked(path: &str, reason: &str) -> Self {
        Self::build(
            FileErrorCode::Blocked,
            Some(path.to_string()),
            format!("Access to sensitive file blocked ({reason}): {path}"),
        )
    }

    pub fn invalid(path: &str, reason: &str) -> Self {
        Self::build(
            FileErrorCode::InvalidPath,
            Some(path.to_string()),
            format!("Invalid path {path:?}: {reason}"),
        )
    }

    pub fn read_failed(path: &str, cause: std::io::Error) -> Self {
        Self::build(
            FileErrorCode::ReadFailed,
            Some(path.to_string()),
            format!("Failed to read {path}: {cause}"),
        )
        .with_cause(cause)
    }

    pub fn glob_failed(pattern: &str, reason: impl fmt::Display) -> Self {
        Self::build(
            FileErrorCode::GlobFailed,
            Some(pattern.to_string()),
            format!("Glob {pattern:?} failed: {reason}"),
        )
    }
}

impl GitError {
    pub fn invalid_argument(arg: &str, reason: &str) -> Self {
        Self::build(
            GitErrorCode::InvalidArgument,
            Some(arg.to_string()),
            format!("Rejected git argument {arg:?}: {reason}"),
        )
    }

    pub fn blocked_command(subcommand: &str) -> Self {
        Self::build(
            GitErrorCode::BlockedCommand,
            Some(subcommand.to_string()),
            format!("git {subcommand} is not allowed in the sandbox"),
        )
    }

    pub fn spawn_failed(subcommand: &str, cause: std::io::Error) -> Self {
        Self::build(
            GitErrorCode::SpawnFailed,
            Some(subcommand.to_string()),
            format!("Failed to spawn git {subcommand}: {cause}"),
        )
        .with_cause(cause)
    }

    pub fn command_failed(subcommand: &str, status: Option<i32>, stderr: &str) -> Self {
        let status = status.map_or_else(|| "signal".to_string(), |code| code.to_string());
        Self::build(
            GitErrorCode::CommandFailed,
            Some(subcommand.to_string()),
            format!("git {subcommand} exited with {status}: {}", stderr.trim()),
        )
    }

    pub fn timeout(subcommand: &str, timeout_ms: u64) -> Self {
        Self::build(
            GitErrorCode::Timeout,
            Some(subcommand.to_string()),
            format!("git {subcommand} timed out after {timeout_ms}ms"),
        )
    }
}

impl PipelineError {
    pub fn empty() -> Self {
        Self::build(PipelineErrorCode::Empty, None, "Pipeline has no steps")
    }

    pub fn invalid_step(step: usize, reason: &str) -> Self {
        Self::build(
            PipelineErrorCode::InvalidStep,
            Some(format!("step {step}")),
            format!("Invalid pipeline step {step}: {reason}"),
        )
    }

    pub fn step_failed(step: usize, method: &str, cause: impl fmt::Display) -> Self {
        Self::build(
            PipelineErrorCode::StepFailed,
            Some(format!("step {step}")),
            format!("Pipeline step {step} ({method}) failed: {cause}"),
        )
    }
}

impl CompressError {
    pub fn unsupported(mode: &str) -> Self {
        Self::build(
            CompressErrorCode::Unsupported,
            Some(mode.to_string()),
            format!("Compression mode '{mode}' is not available in this host"),
        )
    }

    pub fn invalid_input(mode: &str, reason: &str) -> Self {
        Self::build(
            CompressErrorCode::InvalidInput,
            Some(mode.to_string()),
            format!("Invalid input for compress.{mode}: {reason}"),
        )
    }

    pub fn failed(mode: &str, cause: impl fmt::Display) -> Self {
        Self::build(
            CompressErrorCode::Failed,
            Some(mode.to_string()),
            format!("compress.{mode} failed: {cause}"),
        )
    }
}

impl ParseError {
    pub fn unsupported(operation: &str) -> Self {
        Self::build(
            ParseErrorCode::Unsupported,
            Some(operation.to_string()),
            format!("Code operation '{operation}' is not available in this host"),
        )
    }

    pub fn unknown_language(language: &str) -> Self {
        Self::build(
            ParseErrorCode::UnknownLanguage,
            Some(language.to_string()),
            format!("Unknown language: {language}"),
        )
    }

    pub fn failed(operation: &str, cause: impl fmt::Display) -> Self {
        Self::build(
            ParseErrorCode::Failed,
            Some(operation.to_string()),
            format!("code.{operation} failed: {cause}"),
        )
    }
}

/// Any failure a capability call can surface to the bridge.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Compress(#[from] CompressError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Invalid arguments for {method}: {reason}")]
    InvalidArguments { method: String, reason: String },
    #[error("Unknown capability: {0}")]
    UnknownMethod(String),
}

impl CapabilityError {
    pub fn invalid_arguments(method: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::File(err) => err.code().as_str(),
            Self::Git(err) => err.code().as_str(),
            Self::Pipeline(err) => err.code().as_str(),
            Self::Compress(err) => err.code().as_str(),
            Self::Parse(err) => err.code().as_str(),
            Self::InvalidArguments { .. } => "INVALID_ARGUMENTS",
            Self::UnknownMethod(_) => "UNKNOWN_METHOD",
        }
    }

    pub fn is_security_violation(&self) -> bool {
        match self {
            Self::File(err) => err.is_security_violation(),
            Self::Git(err) => err.is_security_violation(),
            Self::Pipeline(_)
            | Self::Compress(_)
            | Self::Parse(_)
            | Self::InvalidArguments { .. }
            | Self::UnknownMethod(_) => false,
        }
    }

    /// Message shown to guest code. Security violations collapse to a
    /// generic denial so the guest cannot probe the validator.
    pub fn guest_message(&self) -> String {
        if self.is_security_violation() {
            format!("Access denied: {}", self.code())
        } else {
            self.to_string()
        }
    }
}
