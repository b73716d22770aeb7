//! Pre-execution checks: the static analyzer plus the validators that turn
//! guest-supplied strings into proof-carrying values.

pub mod analyzer;
pub mod git;
pub mod paths;

pub use analyzer::{SanitizedCode, SecurityAnalysis, analyze};
pub use git::{GitSubcommand, SanitizedGitArg, sanitize_git_arg, sanitize_git_args};
pub use paths::{
    SafePattern, ValidatedPath, is_sensitive_path, validate_glob_pattern, validate_path,
};
