//! Sandbox limits applied to every guest execution.
//!
//! These are host-side defaults. A host builds a per-call context from them
//! and may tighten (never widen) individual values per invocation.

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::constants::sandbox as defaults;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Wall-clock deadline for one guest execution, in milliseconds.
    #[serde(default = "SandboxConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    /// Heap ceiling for the guest interpreter, in MiB.
    #[serde(default = "SandboxConfig::default_memory_limit_mb")]
    pub memory_limit_mb: u64,

    /// Token budget for the serialized guest result.
    #[serde(default = "SandboxConfig::default_max_output_tokens")]
    pub max_output_tokens: usize,

    /// Maximum number of isolates alive at once across concurrent calls.
    #[serde(default = "SandboxConfig::default_max_concurrent")]
    pub max_concurrent: usize,

    /// Guest source larger than this is rejected before analysis.
    #[serde(default = "SandboxConfig::default_max_code_bytes")]
    pub max_code_bytes: usize,

    /// Deadline for one git subprocess, in milliseconds.
    #[serde(default = "SandboxConfig::default_git_timeout_ms")]
    pub git_timeout_ms: u64,

    /// Cap on entries returned by glob-shaped capabilities.
    #[serde(default = "SandboxConfig::default_max_glob_results")]
    pub max_glob_results: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            memory_limit_mb: Self::default_memory_limit_mb(),
            max_output_tokens: Self::default_max_output_tokens(),
            max_concurrent: Self::default_max_concurrent(),
            max_code_bytes: Self::default_max_code_bytes(),
            git_timeout_ms: Self::default_git_timeout_ms(),
            max_glob_results: Self::default_max_glob_results(),
        }
    }
}

impl SandboxConfig {
    const fn default_timeout_ms() -> u64 {
        defaults::DEFAULT_TIMEOUT_MS
    }

    const fn default_memory_limit_mb() -> u64 {
        defaults::DEFAULT_MEMORY_LIMIT_MB
    }

    const fn default_max_output_tokens() -> usize {
        defaults::DEFAULT_MAX_OUTPUT_TOKENS
    }

    const fn default_max_concurrent() -> usize {
        defaults::DEFAULT_MAX_CONCURRENT
    }

    const fn default_max_code_bytes() -> usize {
        defaults::DEFAULT_MAX_CODE_BYTES
    }

    const fn default_git_timeout_ms() -> u64 {
        defaults::DEFAULT_GIT_TIMEOUT_MS
    }

    const fn default_max_glob_results() -> usize {
        defaults::DEFAULT_MAX_GLOB_RESULTS
    }

    /// Clamp a requested deadline into the supported range.
    pub fn clamp_timeout_ms(timeout_ms: u64) -> u64 {
        timeout_ms.clamp(defaults::MIN_TIMEOUT_MS, defaults::MAX_TIMEOUT_MS)
    }

    /// Clamp a requested heap ceiling into the supported range.
    pub fn clamp_memory_limit_mb(memory_limit_mb: u64) -> u64 {
        memory_limit_mb.clamp(defaults::MIN_MEMORY_LIMIT_MB, defaults::MAX_MEMORY_LIMIT_MB)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (defaults::MIN_TIMEOUT_MS..=defaults::MAX_TIMEOUT_MS).contains(&self.timeout_ms),
            "sandbox.timeout_ms must be between {} and {}",
            defaults::MIN_TIMEOUT_MS,
            defaults::MAX_TIMEOUT_MS
        );
        ensure!(
            (defaults::MIN_MEMORY_LIMIT_MB..=defaults::MAX_MEMORY_LIMIT_MB)
                .contains(&self.memory_limit_mb),
            "sandbox.memory_limit_mb must be between {} and {}",
            defaults::MIN_MEMORY_LIMIT_MB,
            defaults::MAX_MEMORY_LIMIT_MB
        );
        ensure!(
            self.max_output_tokens > 0,
            "sandbox.max_output_tokens must be at least 1"
        );
        ensure!(
            self.max_concurrent > 0,
            "sandbox.max_concurrent must be at least 1"
        );
        ensure!(
            self.max_code_bytes > 0,
            "sandbox.max_code_bytes must be at least 1"
        );
        ensure!(
            self.git_timeout_ms >= 100,
            "sandbox.git_timeout_ms must be at least 100ms"
        );
        Ok(())
    }
}
