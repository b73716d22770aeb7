use std::path::{Path, PathBuf};
use std::time::Duration;

use ctxopt_config::SandboxConfig;

/// Per-invocation limits and root for one guest execution.
///
/// Built by the host, never by guest code. Values are clamped into the
/// supported ranges on construction and cannot change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxContext {
    working_directory: PathBuf,
    timeout_ms: u64,
    memory_limit_mb: u64,
    max_output_tokens: usize,
}

impl SandboxContext {
    /// Context with the default limits.
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self::from_config(working_directory, &SandboxConfig::default())
    }

    pub fn from_config(working_directory: impl Into<PathBuf>, config: &SandboxConfig) -> Self {
        Self {
            working_directory: working_directory.into(),
            timeout_ms: SandboxConfig::clamp_timeout_ms(config.timeout_ms),
            memory_limit_mb: SandboxConfig::clamp_memory_limit_mb(config.memory_limit_mb),
            max_output_tokens: config.max_output_tokens.max(1),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = SandboxConfig::clamp_timeout_ms(timeout_ms);
        self
    }

    pub fn with_memory_limit_mb(mut self, memory_limit_mb: u64) -> Self {
        self.memory_limit_mb = SandboxConfig::clamp_memory_limit_mb(memory_limit_mb);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: usize) -> Self {
        self.max_output_tokens = max_output_tokens.max(1);
        self
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn memory_limit_mb(&self) -> u64 {
        self.memory_limit_mb
    }

    pub fn memory_limit_bytes(&self) -> usize {
        usize::try_from(self.memory_limit_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }

    pub fn max_output_tokens(&self) -> usize {
        self.max_output_tokens
    }
}
