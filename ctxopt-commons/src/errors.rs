use std::borrow::Cow;

use anyhow::{Error, Result};
use parking_lot::Mutex;

/// Reports non-fatal errors to an observability backend.
///
/// The sandbox routes security violations (rejected guest code, path
/// traversal, blocked files, unsafe git arguments) and internal faults here
/// so a host can alert on them separately from ordinary guest failures.
pub trait ErrorReporter: Send + Sync {
    /// Capture the provided error for later inspection.
    fn capture(&self, error: &Error) -> Result<()>;

    /// Convenience helper to capture a simple message.
    fn capture_message(&self, message: impl Into<Cow<'static, str>>) -> Result<()>
    where
        Self: Sized,
    {
        let message: Cow<'static, str> = message.into();
        self.capture(&Error::msg(message))
    }
}

/// Error reporting implementation that drops every event. Useful for tests or
/// when a host does not yet integrate with error monitoring.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopErrorReporter;

impl ErrorReporter for NoopErrorReporter {
    fn capture(&self, _error: &Error) -> Result<()> {
        Ok(())
    }
}

/// Reporter that keeps rendered errors in memory.
#[derive(Debug, Default)]
pub struct MemoryErrorReporter {
    entries: Mutex<Vec<String>>,
}

impl MemoryErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every captured error, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

impl ErrorReporter for MemoryErrorReporter {
    fn capture(&self, error: &Error) -> Result<()> {
        self.entries.lock().push(format!("{error:#}"));
        Ok(())
    }
}
