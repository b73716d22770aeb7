use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Instant;

use anyhow::{Result, anyhow};
use ctxopt_commons::{ErrorReporter, HostPathSanitizer, NoopErrorReporter};
use ctxopt_config::SandboxConfig;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Semaphore, oneshot};
use tracing::{debug, error, info, warn};

use crate::bridge::{CapabilityBridge, CapabilityProvider, DefaultCapabilities};
use crate::context::SandboxContext;
use crate::guard::{HostCancelGuard, Scoped, Watchdog, WatchdogSignal};
use crate::runtime::{
    ExecutionOutcome, IsolateOptions, IsolatedRuntime, RuntimeFailure, RuntimeFailureKind,
};
use crate::security::SanitizedCode;
use crate::tokens;

/// Why an execution did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The analyzer found blocked patterns or the source was too large.
    Rejected,
    /// Every concurrency slot was taken.
    Busy,
    Timeout,
    MemoryExceeded,
    GuestThrew,
    /// The serialized result exceeded the token budget.
    OutputTooLarge,
    InternalFault,
}

impl From<RuntimeFailureKind> for FailureKind {
    fn from(kind: RuntimeFailureKind) -> Self {
        match kind {
            RuntimeFailureKind::Timeout => Self::Timeout,
            RuntimeFailureKind::MemoryExceeded => Self::MemoryExceeded,
            RuntimeFailureKind::GuestThrew => Self::GuestThrew,
            RuntimeFailureKind::InternalFault => Self::InternalFault,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub execution_time_ms: u64,
    pub tokens_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used_mb: Option<u64>,
}

/// Uniform result of [`SandboxExecutor::execute_sandbox`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub stats: ExecutionStats,
}

impl ExecutionResult {
    fn failed(kind: FailureKind, message: String, started: Instant) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(message),
            failure: Some(kind),
            logs: Vec::new(),
            warnings: Vec::new(),
            stats: ExecutionStats {
                execution_time_ms: elapsed_ms(started),
                ..ExecutionStats::default()
            },
        }
    }
}

/// Failure surfaced by the legacy [`SandboxExecutor::execute_sandbox_or_err`]
/// adapter.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SandboxError {
    pub kind: FailureKind,
    pub message: String,
    pub logs: Vec<String>,
}

/// Host entry point: analyze, acquire an isolate, execute, release, and
/// report.
#[derive(Clone)]
pub struct SandboxExecutor {
    config: SandboxConfig,
    provider: Arc<dyn CapabilityProvider>,
    reporter: Arc<dyn ErrorReporter>,
    slots: Arc<Semaphore>,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            provider: Arc::new(DefaultCapabilities),
            reporter: Arc::new(NoopErrorReporter),
            slots,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `code` under `context`. Never panics and never returns early
    /// without a result; every failure is folded into [`ExecutionResult`].
    pub async fn execute_sandbox(&self, code: &str, context: &SandboxContext) -> ExecutionResult {
        let started = Instant::now();
        let sanitizer = HostPathSanitizer::for_working_dir(context.working_directory());

        if code.len() > self.config.max_code_bytes {
            warn!(
                bytes = code.len(),
                limit = self.config.max_code_bytes,
                "guest code rejected: too large"
            );
            return ExecutionResult::failed(
                FailureKind::Rejected,
                format!(
                    "Code size {} bytes exceeds limit of {} bytes",
                    code.len(),
                    self.config.max_code_bytes
                ),
                started,
            );
        }

        let code = match SanitizedCode::new(code) {
            Ok(code) => code,
            Err(analysis) => {
                let message = analysis.rejection_message();
                warn!(blocked = ?analysis.blocked_patterns, "guest code rejected by analyzer");
                if let Err(err) = self.reporter.capture(&anyhow!(message.clone())) {
                    warn!(error = %err, "failed to report rejected guest code");
                }
                return ExecutionResult::failed(FailureKind::Rejected, message, started);
            }
        };
        for warning in code.warnings() {
            debug!(%warning, "guest code warning");
        }

        let permit = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    max_concurrent = self.config.max_concurrent,
                    "sandbox concurrency limit reached"
                );
                return ExecutionResult::failed(
                    FailureKind::Busy,
                    format!(
                        "Too many concurrent executions (limit {})",
                        self.config.max_concurrent
                    ),
                    started,
                );
            }
        };

        let warnings = code.warnings().to_vec();
        let options = IsolateOptions {
            timeout: context.timeout(),
            memory_limit_bytes: context.memory_limit_bytes(),
        };
        let bridge = CapabilityBridge::new(
            context.working_directory(),
            Arc::clone(&self.provider),
            Arc::clone(&self.reporter),
            &self.config,
            started + context.timeout(),
        );

        let (signal, receiver) = Watchdog::channel();
        let cancel = HostCancelGuard::new(signal.clone());
        let (reply_tx, reply_rx) = oneshot::channel();

        let spawned = thread::Builder::new()
            .name("ctxopt-isolate".to_string())
            .spawn(move || {
                // Released only once the isolate is gone, even if the host
                // stopped waiting.
                let _permit = permit;
                let outcome = run_isolate(options, bridge, &code, signal, receiver);
                let _ = reply_tx.send(outcome);
            });
        if let Err(err) = spawned {
            cancel.disarm();
            error!(error = %err, "failed to spawn sandbox thread");
            return ExecutionResult::failed(
                FailureKind::InternalFault,
                format!("failed to spawn sandbox thread: {err}"),
                started,
            );
        }

        let outcome = match reply_rx.await {
            Ok(outcome) => outcome,
            Err(_) => ExecutionOutcome {
                result: Err(RuntimeFailure::internal("sandbox thread exited without a result")),
                logs: Vec::new(),
                memory_used_mb: None,
            },
        };
        cancel.disarm();

        self.finalize(outcome, warnings, context, &sanitizer, started)
    }

    /// Legacy adapter: failures become `Err(SandboxError)`.
    pub async fn execute_sandbox_or_err(
        &self,
        code: &str,
        context: &SandboxContext,
    ) -> Result<ExecutionResult> {
        let result = self.execute_sandbox(code, context).await;
        if result.success {
            return Ok(result);
        }
        Err(SandboxError {
            kind: result.failure.unwrap_or(FailureKind::InternalFault),
            message: result
                .error
                .unwrap_or_else(|| "sandbox execution failed".to_string()),
            logs: result.logs,
        }
        .into())
    }

    fn finalize(
        &self,
        outcome: ExecutionOutcome,
        warnings: Vec<String>,
        context: &SandboxContext,
        sanitizer: &HostPathSanitizer,
        started: Instant,
    ) -> ExecutionResult {
        let logs: Vec<String> = outcome.logs.iter().map(|line| sanitizer.sanitize(line)).collect();
        let mut stats = ExecutionStats {
            execution_time_ms: elapsed_ms(started),
            tokens_used: 0,
            memory_used_mb: outcome.memory_used_mb,
        };

        let output = match outcome.result {
            Ok(output) => output,
            Err(failure) => {
                let message = sanitizer.sanitize(&failure.message);
                match failure.kind {
                    RuntimeFailureKind::InternalFault => {
                        error!(error = %message, "sandbox internal fault");
                        if let Err(err) = self.reporter.capture(&anyhow!(message.clone())) {
                            warn!(error = %err, "failed to report internal fault");
                        }
                    }
                    kind => info!(
                        ?kind,
                        elapsed_ms = stats.execution_time_ms,
                        "guest execution failed"
                    ),
                }
                return ExecutionResult {
                    success: false,
                    output: None,
                    error: Some(message),
                    failure: Some(failure.kind.into()),
                    logs,
                    warnings,
                    stats,
                };
            }
        };

        if let Some(value) = &output {
            stats.tokens_used = tokens::count_tokens(&value.to_string());
        }
        if stats.tokens_used > context.max_output_tokens() {
            info!(
                tokens = stats.tokens_used,
                limit = context.max_output_tokens(),
                "guest output over token budget"
            );
            return ExecutionResult {
                success: false,
                output: None,
                error: Some(format!(
                    "Output exceeds token limit ({} > {})",
                    stats.tokens_used,
                    context.max_output_tokens()
                )),
                failure: Some(FailureKind::OutputTooLarge),
                logs,
                warnings,
                stats,
            };
        }

        debug!(
            elapsed_ms = stats.execution_time_ms,
            tokens = stats.tokens_used,
            "guest execution succeeded"
        );
        ExecutionResult {
            success: true,
            output,
            error: None,
            failure: None,
            logs,
            warnings,
            stats,
        }
    }
}

impl Default for SandboxExecutor {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

/// Body of the dedicated isolate thread. Creates, uses and disposes exactly
/// one runtime.
fn run_isolate(
    options: IsolateOptions,
    bridge: CapabilityBridge,
    code: &SanitizedCode,
    signal: mpsc::Sender<WatchdogSignal>,
    receiver: mpsc::Receiver<WatchdogSignal>,
) -> ExecutionOutcome {
    let failed = |failure: RuntimeFailure| ExecutionOutcome {
        result: Err(failure),
        logs: Vec::new(),
        memory_used_mb: None,
    };

    let tokio_runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            return failed(RuntimeFailure::internal(format!(
                "failed to build runtime: {err}"
            )));
        }
    };
    let mut isolate = match IsolatedRuntime::create(options, bridge) {
        Ok(isolate) => Scoped::new(isolate),
        Err(failure) => return failed(failure),
    };
    tokio_runtime.block_on(isolate.execute(code, signal, receiver))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
