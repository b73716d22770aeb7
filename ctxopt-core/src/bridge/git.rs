//! Read-only git plumbing for `ctx.git`.

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::GitError;
use crate::security::git::check_subcommand;
use crate::security::{GitSubcommand, SanitizedGitArg, ValidatedPath};

/// Cap on bytes kept from git stdout.
const MAX_GIT_OUTPUT_BYTES: u64 = 4 * 1024 * 1024;
const MAX_GIT_STDERR_BYTES: u64 = 64 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub status: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitStatus {
    pub branch: Option<String>,
    pub files: Vec<StatusEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitBranches {
    pub current: Option<String>,
    pub branches: Vec<String>,
}

/// Runs `git` directly (argv, no shell) inside the working directory.
#[derive(Debug, Clone)]
pub struct GitRunner {
    working_dir: PathBuf,
    timeout: Duration,
}

impl GitRunner {
    pub fn new(working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            working_dir: working_dir.into(),
            timeout,
        }
    }

    pub fn diff(&self, args: &[SanitizedGitArg], deadline: Instant) -> Result<String, GitError> {
        self.run(GitSubcommand::Diff, &["--no-color", "--no-ext-diff"], args, deadline)
    }

    pub fn log(&self, args: &[SanitizedGitArg], deadline: Instant) -> Result<String, GitError> {
        let fixed: &[&str] = if args.is_empty() {
            &["--no-color", "--oneline", "-n", "20"]
        } else {
            &["--no-color"]
        };
        self.run(GitSubcommand::Log, fixed, args, deadline)
    }

    pub fn blame(&self, path: &ValidatedPath, deadline: Instant) -> Result<String, GitError> {
        let relative = path
            .as_path()
            .strip_prefix(&self.working_dir)
            .unwrap_or(path.as_path())
            .to_string_lossy()
            .into_owned();
        self.run_raw(
            GitSubcommand::Blame,
            &["--porcelain", "--"],
            &[relative],
            deadline,
        )
    }

    pub fn status(&self, deadline: Instant) -> Result<GitStatus, GitError> {
        let output = self.run(
            GitSubcommand::Status,
            &["--porcelain=v1", "--branch"],
            &[],
            deadline,
        )?;
        Ok(parse_status(&output))
    }

    pub fn branch(&self, deadline: Instant) -> Result<GitBranches, GitError> {
        let output = self.run(GitSubcommand::Branch, &["--list", "--no-color"], &[], deadline)?;
        Ok(parse_branches(&output))
    }

    fn run(
        &self,
        subcommand: GitSubcommand,
        fixed: &[&str],
        args: &[SanitizedGitArg],
        deadline: Instant,
    ) -> Result<String, GitError> {
        let args: Vec<String> = args.iter().map(|arg| arg.as_str().to_string()).collect();
        self.run_raw(subcommand, fixed, &args, deadline)
    }

    /// `extra` must already be sanitized or derived from a validated path.
    fn run_raw(
        &self,
        subcommand: GitSubcommand,
        fixed: &[&str],
        extra: &[String],
        deadline: Instant,
    ) -> Result<String, GitError> {
        let name = subcommand.as_str();
        check_subcommand(name)?;
        let timeout = self
            .timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        if timeout.is_zero() {
            return Err(GitError::timeout(name, 0));
        }

        debug!(subcommand = name, args = ?extra, "running git");
        let mut command = Command::new("git");
        // Keep discovery from walking above the working directory.
        if let Some(parent) = self.working_dir.parent() {
            command.env("GIT_CEILING_DIRECTORIES", parent);
        }
        let mut child = command
            .arg("--no-pager")
            .arg(name)
            .args(fixed)
            .args(extra)
            .current_dir(&self.working_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_PAGER", "cat")
            .env("GIT_OPTIONAL_LOCKS", "0")
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| GitError::spawn_failed(name, err))?;

        let stdout = child
            .stdout
            .take()
            .map(|pipe| thread::spawn(move || read_capped(pipe, MAX_GIT_OUTPUT_BYTES)));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| thread::spawn(move || read_capped(pipe, MAX_GIT_STDERR_BYTES)));

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= timeout => {
                    warn!(subcommand = name, "git exceeded its deadline; killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(GitError::timeout(
                        name,
                        u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    ));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    return Err(GitError::spawn_failed(name, err));
                }
            }
        };

        let stdout = stdout
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        let stderr = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(GitError::command_failed(
                name,
                status.code(),
                &String::from_utf8_lossy(&stderr),
            ));
        }
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

/// Keep the first `cap` bytes and drain the rest, so git never dies on a
/// closed pipe. Truncation is marked on the last line.
fn read_capped(mut pipe: impl Read, cap: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = pipe.by_ref().take(cap).read_to_end(&mut buf);
    let dropped = io::copy(&mut pipe, &mut io::sink()).unwrap_or(0);
    if dropped > 0 {
        warn!(kept = buf.len(), dropped, "git output truncated");
        buf.extend_from_slice(format!("\n[truncated {dropped} bytes]\n").as_bytes());
    }
    buf
}

fn parse_status(output: &str) -> GitStatus {
    let mut branch = None;
    let mut files = Vec::new();
    for line in output.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            let name = header.split("...").next().unwrap_or(header);
            let name = name.strip_prefix("No commits yet on ").unwrap_or(name);
            branch = Some(name.trim().to_string());
        } else if let (Some(code), Some(path)) = (line.get(..2), line.get(3..)) {
            if !path.is_empty() {
                files.push(StatusEntry {
                    status: code.trim().to_string(),
                    path: path.to_string(),
                });
            }
        }
    }
    GitStatus { branch, files }
}

fn parse_branches(output: &str) -> GitBranches {
    let mut current = None;
    let mut branches = Vec::new();
    for line in output.lines() {
        let (is_current, name) = match line.strip_prefix("* ") {
            Some(name) => (true, name),
            None => (false, line.trim_start()),
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        if is_current {
            current = Some(name.to_string());
        }
        branches.push(name.to_string());
    }
    GitBranches { current, branches }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_reads_drain_the_pipe_and_mark_truncation() {
        let mut pipe = io::Cursor::new(vec![b'x'; 100]);
        let kept = read_capped(&mut pipe, 10);
        assert_eq!(pipe.position(), 100);
        assert!(kept.starts_with(&[b'x'; 10]));
        assert!(String::from_utf8_lossy(&kept).ends_with("[truncated 90 bytes]\n"));

        let whole = read_capped(io::Cursor::new(b"short".to_vec()), 10);
        assert_eq!(whole, b"short");
    }

    #[test]
    fn parses_porcelain_status() {
        let status = parse_status("## main...origin/main [ahead 1]\n M src/lib.rs\n?? notes.txt\n");
        assert_eq!(status.branch.as_deref(), Some("main"));
        assert_eq!(
            status.files,
            vec![
                StatusEntry {
                    status: "M".into(),
                    path: "src/lib.rs".into()
                },
                StatusEntry {
                    status: "??".into(),
                    path: "notes.txt".into()
                },
            ]
        );
    }

    #[test]
    fn parses_branch_list() {
        let branches = parse_branches("  feature\n* main\n");
        assert_eq!(branches.current.as_deref(), Some("main"));
        assert_eq!(branches.branches, vec!["feature".to_string(), "main".to_string()]);
    }

    #[test]
    fn non_repository_reports_command_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = GitRunner::new(dir.path(), Duration::from_secs(5));
        let deadline = Instant::now() + Duration::from_secs(5);
        // Either git is missing (spawn failure) or the directory is not a repo.
        assert!(runner.status(deadline).is_err());
    }

    #[test]
    fn expired_deadline_times_out_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let runner = GitRunner::new(dir.path(), Duration::from_secs(5));
        let err = runner.status(Instant::now()).unwrap_err();
        assert_eq!(err.code(), crate::errors::GitErrorCode::Timeout);
    }
}
