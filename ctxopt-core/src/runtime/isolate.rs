//! One V8 isolate per execution.
//!
//! V8 isolates are `!Send`, so an [`IsolatedRuntime`] is created, used and
//! dropped on a single dedicated thread (see the executor). Wall-clock
//! deadlines are enforced by a [`Watchdog`] thread calling
//! `terminate_execution` on the isolate handle, which interrupts even
//! `while (true) {}`. Memory is capped twice: V8 heap limits plus a
//! near-heap-limit callback bound the managed heap, and a budgeted
//! ArrayBuffer allocator bounds backing stores. Either one terminates the
//! isolate instead of letting V8 abort. Code generation from strings is
//! disabled once the bootstrap has run.

use std::ffi::c_void;
use std::sync::mpsc;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use deno_core::{JsRuntime, PollEventLoopOptions, RuntimeOptions, v8};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, error};

use super::arena::{MemoryGuard, new_allocator};
use super::ops::{GuestLogs, GuestSettlement, ctxopt_guest};
use crate::bridge::CapabilityBridge;
use crate::guard::{Dispose, Watchdog, WatchdogSignal, WatchdogVerdict};
use crate::security::SanitizedCode;

const BOOTSTRAP: &str = include_str!("bootstrap.js");

/// Extra heap granted once the limit is hit so termination can unwind.
const TERMINATION_GRACE_BYTES: usize = 1024 * 1024;

static EXPORT_DEFAULT: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(r"(?m)^(\s*)export\s+default\s+") {
        Ok(regex) => regex,
        // Panic is acceptable thanks to the `load_regex` test
        Err(err) => panic!("invalid export-default regex: {err}"),
    }
});

#[derive(Debug, Clone)]
pub struct IsolateOptions {
    pub timeout: Duration,
    pub memory_limit_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFailureKind {
    Timeout,
    MemoryExceeded,
    GuestThrew,
    InternalFault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFailure {
    pub kind: RuntimeFailureKind,
    pub message: String,
}

impl RuntimeFailure {
    pub fn new(kind: RuntimeFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RuntimeFailureKind::InternalFault, message)
    }
}

/// Everything one execution produced.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// `Ok(None)` when the guest returned `undefined`.
    pub result: Result<Option<Value>, RuntimeFailure>,
    pub logs: Vec<String>,
    pub memory_used_mb: Option<u64>,
}

extern "C" fn near_heap_limit_callback(
    data: *mut c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points at the `MemoryGuard` shared by the owning
    // `IsolatedRuntime`, which outlives the isolate (field drop order) and
    // unregisters this callback in `dispose`.
    #[allow(unsafe_code)]
    let guard = unsafe { &*(data as *const MemoryGuard) };
    guard.trip();
    current_heap_limit + TERMINATION_GRACE_BYTES
}

/// A fresh interpreter with the `ctx` shim installed. Used for exactly one
/// [`execute`](Self::execute) and then disposed.
pub struct IsolatedRuntime {
    // Declared before `memory`: the isolate must drop first.
    runtime: JsRuntime,
    memory: Arc<MemoryGuard>,
    options: IsolateOptions,
    disposed: bool,
}

impl IsolatedRuntime {
    pub fn create(
        options: IsolateOptions,
        bridge: CapabilityBridge,
    ) -> Result<Self, RuntimeFailure> {
        let memory = Arc::new(MemoryGuard::new(options.memory_limit_bytes));
        let create_params = v8::CreateParams::default()
            .heap_limits(0, options.memory_limit_bytes)
            .array_buffer_allocator(new_allocator(&memory));
        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![ctxopt_guest::init_ops()],
            create_params: Some(create_params),
            ..Default::default()
        });

        {
            let op_state = runtime.op_state();
            let mut op_state = op_state.borrow_mut();
            op_state.put(bridge);
            op_state.put(GuestLogs::default());
        }

        memory.attach(runtime.v8_isolate().thread_safe_handle());
        runtime.v8_isolate().add_near_heap_limit_callback(
            near_heap_limit_callback,
            Arc::as_ptr(&memory) as *mut c_void,
        );

        runtime
            .execute_script("[ctxopt:bootstrap]", BOOTSTRAP)
            .map_err(|err| {
                RuntimeFailure::internal(format!(
                    "bootstrap failed: {}",
                    first_line(&err.to_string())
                ))
            })?;
        {
            // Aliases such as `const F = Function` must not compile strings.
            let scope = &mut runtime.handle_scope();
            let context = scope.get_current_context();
            context.set_allow_generation_from_strings(false);
        }

        debug!(
            memory_limit_bytes = options.memory_limit_bytes,
            timeout_ms = options.timeout.as_millis() as u64,
            "isolate created"
        );
        Ok(Self {
            runtime,
            memory,
            options,
            disposed: false,
        })
    }

    /// Run `code` to completion, deadline, or heap exhaustion.
    ///
    /// `signal`/`receiver` form the watchdog channel; the host keeps a clone
    /// of `signal` to cancel from outside.
    pub async fn execute(
        &mut self,
        code: &SanitizedCode,
        signal: mpsc::Sender<WatchdogSignal>,
        receiver: mpsc::Receiver<WatchdogSignal>,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let handle = self.runtime.v8_isolate().thread_safe_handle();
        let watchdog = match Watchdog::arm(self.options.timeout, signal, receiver, move || {
            handle.terminate_execution();
        }) {
            Ok(watchdog) => watchdog,
            Err(err) => {
                error!(error = %err, "failed to start sandbox watchdog");
                return self.finish(Err(RuntimeFailure::internal(format!(
                    "failed to start watchdog: {err}"
                ))));
            }
        };

        let exec_error = match self
            .runtime
            .execute_script("[ctxopt:guest]", wrap_guest(code.as_str()))
        {
            Ok(_) => {
                let remaining = self.options.timeout.saturating_sub(started.elapsed());
                match tokio::time::timeout(
                    remaining,
                    self.runtime.run_event_loop(PollEventLoopOptions::default()),
                )
                .await
                {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(first_line(&err.to_string())),
                    Err(_) => Some("async timeout".to_string()),
                }
            }
            Err(err) => Some(first_line(&err.to_string())),
        };

        let verdict = watchdog.disarm();
        let timeout_ms = u64::try_from(self.options.timeout.as_millis()).unwrap_or(u64::MAX);

        if self.memory.triggered() {
            return self.finish(Err(RuntimeFailure::new(
                RuntimeFailureKind::MemoryExceeded,
                format!(
                    "Memory limit exceeded ({} MB)",
                    self.options.memory_limit_bytes / (1024 * 1024)
                ),
            )));
        }
        match verdict {
            WatchdogVerdict::TimedOut => {
                return self.finish(Err(RuntimeFailure::new(
                    RuntimeFailureKind::Timeout,
                    format!("Execution timed out after {timeout_ms}ms"),
                )));
            }
            WatchdogVerdict::HostCancelled => {
                return self.finish(Err(RuntimeFailure::internal(
                    "Execution cancelled by host",
                )));
            }
            WatchdogVerdict::Completed => {}
        }
        if exec_error.as_deref() == Some("async timeout") {
            return self.finish(Err(RuntimeFailure::new(
                RuntimeFailureKind::Timeout,
                format!("Execution timed out after {timeout_ms}ms"),
            )));
        }

        let settlement = self
            .runtime
            .op_state()
            .borrow_mut()
            .try_take::<GuestSettlement>();
        let result = match (settlement, exec_error) {
            (Some(GuestSettlement::Value(json)), _) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|err| RuntimeFailure::internal(format!("malformed guest result: {err}"))),
            (Some(GuestSettlement::Undefined), _) => Ok(None),
            (Some(GuestSettlement::Threw(message)), _) => {
                Err(RuntimeFailure::new(RuntimeFailureKind::GuestThrew, message))
            }
            (None, Some(message)) => Err(RuntimeFailure::new(
                RuntimeFailureKind::GuestThrew,
                strip_uncaught(&message),
            )),
            (None, None) => Err(RuntimeFailure::new(
                RuntimeFailureKind::GuestThrew,
                "Guest code never settled (a promise was left pending)",
            )),
        };
        self.finish(result)
    }

    fn finish(&mut self, result: Result<Option<Value>, RuntimeFailure>) -> ExecutionOutcome {
        let logs = std::mem::take(
            &mut self
                .runtime
                .op_state()
                .borrow_mut()
                .borrow_mut::<GuestLogs>()
                .0,
        );
        ExecutionOutcome {
            result,
            logs,
            memory_used_mb: self.used_heap_mb(),
        }
    }

    /// Managed heap plus ArrayBuffer backing stores.
    fn used_heap_mb(&mut self) -> Option<u64> {
        let mut stats = v8::HeapStatistics::default();
        self.runtime.v8_isolate().get_heap_statistics(&mut stats);
        let used = stats.used_heap_size().checked_add(self.memory.arena_used())?;
        let used = u64::try_from(used).ok()?;
        Some(used.div_ceil(1024 * 1024))
    }
}

impl Dispose for IsolatedRuntime {
    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.runtime
            .v8_isolate()
            .remove_near_heap_limit_callback(near_heap_limit_callback, 0);
        debug!("isolate disposed");
    }
}

/// Wrap guest source as the body of an async function handed to the
/// bootstrap's single-use runner. A leading `export default` becomes `return`.
pub fn wrap_guest(source: &str) -> String {
    let body = EXPORT_DEFAULT.replace(source, "${1}return ");
    format!("__ctxoptRun(async () => {{\n{body}\n}});")
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().trim().to_string()
}

fn strip_uncaught(message: &str) -> String {
    message
        .strip_prefix("Uncaught ")
        .unwrap_or(message)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_regex() {
        let _ = EXPORT_DEFAULT.as_str();
    }

    #[test]
    fn wraps_guest_body() {
        assert_eq!(
            wrap_guest("return 1 + 1"),
            "__ctxoptRun(async () => {\nreturn 1 + 1\n});"
        );
        assert_eq!(
            wrap_guest("const x = 2;\nexport default x * 2;"),
            "__ctxoptRun(async () => {\nconst x = 2;\nreturn x * 2;\n});"
        );
    }

    #[test]
    fn strips_stack_and_prefix() {
        assert_eq!(
            first_line("Uncaught Error: boom\n    at [ctxopt:guest]:1:1"),
            "Uncaught Error: boom"
        );
        assert_eq!(
            strip_uncaught("Uncaught SyntaxError: Unexpected token"),
            "SyntaxError: Unexpected token"
        );
    }
}
