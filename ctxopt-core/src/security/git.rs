//! Argument hygiene for the git capability.
//!
//! Git is the only external process the sandbox spawns. Arguments are passed
//! as argv entries, never through a shell, and each one must first become a
//! [`SanitizedGitArg`].

use std::fmt;

use crate::errors::GitError;

/// Characters with shell meaning. Rejected outright even though no shell is
/// involved.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>', '\\', '!', '\'', '"',
];

/// Subcommands that touch the network or mutate repository configuration.
pub const BLOCKED_SUBCOMMANDS: &[&str] = &[
    "push",
    "fetch",
    "pull",
    "clone",
    "remote",
    "submodule",
    "ls-remote",
    "archive",
];

/// Options that write files, run helpers, or point git outside the working
/// directory.
const BLOCKED_OPTION_PREFIXES: &[&str] = &[
    "--output",
    "--exec",
    "--upload-pack",
    "--receive-pack",
    "--git-dir",
    "--work-tree",
    "--config-env",
    "--ext-diff",
    "--textconv",
    "--no-index",
    "--open-files-in-pager",
];

/// A git argv entry free of shell metacharacters and line breaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedGitArg(String);

impl SanitizedGitArg {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SanitizedGitArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<std::ffi::OsStr> for SanitizedGitArg {
    fn as_ref(&self) -> &std::ffi::OsStr {
        self.0.as_ref()
    }
}

/// Read-only subcommands reachable from guest code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitSubcommand {
    Diff,
    Log,
    Blame,
    Status,
    Branch,
}

impl GitSubcommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Diff => "diff",
            Self::Log => "log",
            Self::Blame => "blame",
            Self::Status => "status",
            Self::Branch => "branch",
        }
    }

    /// Map a guest-supplied name, rejecting the network/mutation denylist
    /// before anything else.
    pub fn parse(name: &str) -> Result<Self, GitError> {
        let name = name.trim();
        check_subcommand(name)?;
        match name {
            "diff" => Ok(Self::Diff),
            "log" => Ok(Self::Log),
            "blame" => Ok(Self::Blame),
            "status" => Ok(Self::Status),
            "branch" => Ok(Self::Branch),
            other => Err(GitError::blocked_command(other)),
        }
    }
}

/// Reject subcommands on [`BLOCKED_SUBCOMMANDS`].
pub fn check_subcommand(name: &str) -> Result<(), GitError> {
    if BLOCKED_SUBCOMMANDS.contains(&name) {
        return Err(GitError::blocked_command(name));
    }
    Ok(())
}

/// Validate one git argument.
pub fn sanitize_git_arg(arg: &str) -> Result<SanitizedGitArg, GitError> {
    if arg.is_empty() {
        return Err(GitError::invalid_argument(arg, "empty argument"));
    }
    if arg.contains(['\n', '\r', '\0']) {
        return Err(GitError::invalid_argument(arg, "line break or NUL"));
    }
    if let Some(bad) = arg.chars().find(|ch| SHELL_METACHARACTERS.contains(ch)) {
        return Err(GitError::invalid_argument(
            arg,
            &format!("shell metacharacter '{bad}'"),
        ));
    }
    if arg == "-c" || (arg.starts_with("-c") && arg.contains('=')) {
        return Err(GitError::invalid_argument(arg, "config override"));
    }
    if let Some(prefix) = BLOCKED_OPTION_PREFIXES
        .iter()
        .find(|prefix| arg.starts_with(*prefix))
    {
        return Err(GitError::invalid_argument(
            arg,
            &format!("option {prefix} is not allowed"),
        ));
    }
    Ok(SanitizedGitArg(arg.to_string()))
}

/// Sanitize every argument, failing on the first bad one.
pub fn sanitize_git_args<I, S>(args: I) -> Result<Vec<SanitizedGitArg>, GitError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|arg| sanitize_git_arg(arg.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GitErrorCode;

    #[test]
    fn rejects_every_metacharacter_and_newlines() {
        for ch in SHELL_METACHARACTERS {
            let arg = format!("HEAD{ch}x");
            let err = sanitize_git_arg(&arg).unwrap_err();
            assert_eq!(err.code(), GitErrorCode::InvalidArgument, "{arg}");
        }
        assert!(sanitize_git_arg("HEAD\nrm").is_err());
        assert!(sanitize_git_arg("HEAD\r").is_err());
    }

    #[test]
    fn accepts_plain_arguments() {
        for arg in ["HEAD~3", "--stat", "-n", "10", "src/lib.rs", "main..feature", "--oneline"] {
            assert_eq!(sanitize_git_arg(arg).unwrap().as_str(), arg);
        }
    }

    #[test]
    fn rejects_dangerous_options() {
        for arg in ["--output=/tmp/x", "--no-index", "--git-dir=/etc", "-c", "-ccore.pager=x"] {
            assert!(sanitize_git_arg(arg).is_err(), "{arg}");
        }
    }

    #[test]
    fn blocked_subcommands_are_rejected() {
        for name in BLOCKED_SUBCOMMANDS {
            let err = GitSubcommand::parse(name).unwrap_err();
            assert_eq!(err.code(), GitErrorCode::BlockedCommand);
        }
        assert_eq!(GitSubcommand::parse("log").unwrap(), GitSubcommand::Log);
        assert!(GitSubcommand::parse("commit").is_err());
    }
}
