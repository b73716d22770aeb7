//! The `ctx` capability surface seen by guest code.
//!
//! Guest calls arrive as `(method, JSON args)` pairs from the runtime op and
//! are dispatched here. Path and glob arguments are validated before any
//! provider sees them; git arguments are sanitized before any process spawns.

mod fs;
mod git;
mod pipeline;
mod search;
mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use ctxopt_commons::{ErrorReporter, HostPathSanitizer, canonicalize_workspace};
use ctxopt_config::SandboxConfig;
use serde_json::{Value, json};
use tracing::{debug, warn};

pub use fs::DefaultCapabilities;
pub use git::{GitBranches, GitRunner, GitStatus, StatusEntry};
pub use pipeline::PREVIOUS_OUTPUT;
pub use search::GrepMatch;
pub use utils::{CodeOperation, CompressMode, ContentType, detect_language, detect_type};

use crate::errors::{CapabilityError, CompressError, FileError, ParseError};
use crate::security::{
    SafePattern, ValidatedPath, sanitize_git_args, validate_glob_pattern, validate_path,
};
use crate::tokens;

/// Implementations behind `ctx`. Filesystem methods only ever receive
/// validated values. Compression and code parsing are unsupported unless a
/// host overrides them.
pub trait CapabilityProvider: Send + Sync {
    fn read_file(&self, path: &ValidatedPath) -> Result<String, FileError>;

    fn file_exists(&self, path: &ValidatedPath) -> bool;

    /// Relative, `/`-separated paths under `pattern.root()`, at most `limit`.
    fn glob(&self, pattern: &SafePattern, limit: usize) -> Result<Vec<String>, FileError>;

    fn compress(
        &self,
        mode: CompressMode,
        _content: &str,
        _options: &Value,
    ) -> Result<Value, CompressError> {
        Err(CompressError::unsupported(mode.as_str()))
    }

    fn code(
        &self,
        operation: CodeOperation,
        _content: &str,
        _language: &str,
        _target: Option<&str>,
    ) -> Result<Value, ParseError> {
        Err(ParseError::unsupported(operation.as_str()))
    }

    fn count_tokens(&self, text: &str) -> usize {
        tokens::count_tokens(text)
    }

    fn detect_type(&self, content: &str) -> ContentType {
        utils::detect_type(content)
    }

    fn detect_language(&self, path: &str) -> Option<String> {
        utils::detect_language(path).map(str::to_string)
    }
}

/// Per-execution dispatcher installed in the isolate's op state.
pub struct CapabilityBridge {
    working_dir: PathBuf,
    provider: Arc<dyn CapabilityProvider>,
    git: GitRunner,
    reporter: Arc<dyn ErrorReporter>,
    sanitizer: HostPathSanitizer,
    max_glob_results: usize,
    deadline: Instant,
}

impl CapabilityBridge {
    pub fn new(
        working_dir: &Path,
        provider: Arc<dyn CapabilityProvider>,
        reporter: Arc<dyn ErrorReporter>,
        config: &SandboxConfig,
        deadline: Instant,
    ) -> Self {
        let working_dir = canonicalize_workspace(working_dir);
        Self {
            git: GitRunner::new(&working_dir, Duration::from_millis(config.git_timeout_ms)),
            sanitizer: HostPathSanitizer::for_working_dir(&working_dir),
            working_dir,
            provider,
            reporter,
            max_glob_results: config.max_glob_results,
            deadline,
        }
    }

    /// Dispatch a call and encode the reply as the JSON envelope the guest
    /// shim expects: `{"ok": value}` or `{"error": message, "code": code}`.
    pub fn call_json(&self, method: &str, args_json: &str) -> String {
        let reply = match serde_json::from_str::<Value>(args_json) {
            Ok(Value::Array(args)) => self.call(method, &args),
            Ok(Value::Null) => self.call(method, &[]),
            Ok(_) | Err(_) => Err(CapabilityError::invalid_arguments(
                method,
                "arguments must be a JSON array",
            )),
        };

        let envelope = match reply {
            Ok(value) => json!({ "ok": value }),
            Err(err) => json!({
                "error": self.sanitizer.sanitize(&err.guest_message()),
                "code": err.code(),
            }),
        };
        envelope.to_string()
    }

    pub fn call(&self, method: &str, args: &[Value]) -> Result<Value, CapabilityError> {
        debug!(method, "capability call");
        let result = self.dispatch(method, args);
        if let Err(err) = &result {
            self.report_violation(err);
        }
        result
    }

    /// Send security violations to the host reporter with topology stripped.
    fn report_violation(&self, err: &CapabilityError) {
        if !err.is_security_violation() {
            return;
        }
        let message = self.sanitizer.sanitize(&err.to_string());
        warn!(code = err.code(), %message, "sandbox security violation");
        if let Err(report_err) = self.reporter.capture(&anyhow!(message)) {
            warn!(error = %report_err, "failed to report security violation");
        }
    }

    fn dispatch(&self, method: &str, args: &[Value]) -> Result<Value, CapabilityError> {
        match method {
            "files.read" => {
                let path = validate_path(required_str(method, args, 0)?, &self.working_dir)?;
                Ok(Value::String(self.provider.read_file(&path)?))
            }
            "files.exists" => {
                let path = validate_path(required_str(method, args, 0)?, &self.working_dir)?;
                Ok(Value::Bool(self.provider.file_exists(&path)))
            }
            "files.glob" => {
                let pattern =
                    validate_glob_pattern(required_str(method, args, 0)?, &self.working_dir)?;
                Ok(json!(self.provider.glob(&pattern, self.max_glob_results)?))
            }

            "compress.auto" | "compress.logs" | "compress.diff" | "compress.semantic" => {
                let mode = match method {
                    "compress.logs" => CompressMode::Logs,
                    "compress.diff" => CompressMode::Diff,
                    "compress.semantic" => CompressMode::Semantic,
                    _ => CompressMode::Auto,
                };
                let content = required_str(method, args, 0)?;
                let options = args.get(1).cloned().unwrap_or(Value::Null);
                Ok(self.provider.compress(mode, content, &options)?)
            }

            "code.parse" | "code.extract" | "code.skeleton" => {
                let operation = match method {
                    "code.extract" => CodeOperation::Extract,
                    "code.skeleton" => CodeOperation::Skeleton,
                    _ => CodeOperation::Parse,
                };
                let content = required_str(method, args, 0)?;
                let language = required_str(method, args, 1)?;
                let target = optional_str(method, args, 2)?;
                Ok(self.provider.code(operation, content, language, target)?)
            }

            "utils.countTokens" => {
                let text = required_str(method, args, 0)?;
                Ok(json!(self.provider.count_tokens(text)))
            }
            "utils.detectType" => {
                let content = required_str(method, args, 0)?;
                Ok(json!(self.provider.detect_type(content)))
            }
            "utils.detectLanguage" => {
                let candidate = required_str(method, args, 0)?;
                let path = validate_path(candidate, &self.working_dir)?;
                let relative = path
                    .as_path()
                    .strip_prefix(&self.working_dir)
                    .unwrap_or(path.as_path())
                    .to_string_lossy()
                    .into_owned();
                Ok(json!(self.provider.detect_language(&relative)))
            }

            "git.diff" => {
                let git_args = sanitize_git_args(string_list(method, args.first())?)?;
                Ok(Value::String(self.git.diff(&git_args, self.deadline)?))
            }
            "git.log" => {
                let git_args = sanitize_git_args(string_list(method, args.first())?)?;
                Ok(Value::String(self.git.log(&git_args, self.deadline)?))
            }
            "git.blame" => {
                let path = validate_path(required_str(method, args, 0)?, &self.working_dir)?;
                Ok(Value::String(self.git.blame(&path, self.deadline)?))
            }
            "git.status" => Ok(json!(self.git.status(self.deadline)?)),
            "git.branch" => Ok(json!(self.git.branch(self.deadline)?)),

            "search.grep" => {
                let pattern = required_str(method, args, 0)?;
                let files = optional_str(method, args, 1)?.unwrap_or("**/*");
                let files = validate_glob_pattern(files, &self.working_dir)?;
                let matches = search::grep(
                    self.provider.as_ref(),
                    &self.working_dir,
                    pattern,
                    &files,
                    self.max_glob_results,
                )?;
                Ok(json!(matches))
            }

            "pipeline.run" => pipeline::run(self, args.first().unwrap_or(&Value::Null)),

            other => Err(CapabilityError::UnknownMethod(other.to_string())),
        }
    }
}

fn required_str<'a>(
    method: &str,
    args: &'a [Value],
    index: usize,
) -> Result<&'a str, CapabilityError> {
    match args.get(index) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(CapabilityError::invalid_arguments(
            method,
            format!("argument {} must be a string", index + 1),
        )),
        None => Err(CapabilityError::invalid_arguments(
            method,
            format!("missing argument {}", index + 1),
        )),
    }
}

fn optional_str<'a>(
    method: &str,
    args: &'a [Value],
    index: usize,
) -> Result<Option<&'a str>, CapabilityError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(_) => Err(CapabilityError::invalid_arguments(
            method,
            format!("argument {} must be a string", index + 1),
        )),
    }
}

/// Git args given as `"--stat HEAD~1"` or `["--stat", "HEAD~1"]`.
fn string_list(method: &str, value: Option<&Value>) -> Result<Vec<String>, CapabilityError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(text)) => Ok(text.split_whitespace().map(str::to_string).collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    CapabilityError::invalid_arguments(method, "git arguments must be strings")
                })
            })
            .collect(),
        Some(_) => Err(CapabilityError::invalid_arguments(
            method,
            "git arguments must be a string or an array of strings",
        )),
    }
}
