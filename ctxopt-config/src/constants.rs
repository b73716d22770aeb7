/// Config file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "ctxopt.toml";
/// Per-user config directory name under the home directory.
pub const HOME_CONFIG_DIR: &str = ".ctxopt";
/// Per-user config file name inside [`HOME_CONFIG_DIR`].
pub const HOME_CONFIG_FILE_NAME: &str = "config.toml";
/// Environment variable that points at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CTXOPT_CONFIG_PATH";

pub mod sandbox {
    /// Lower bound for the guest wall-clock deadline.
    pub const MIN_TIMEOUT_MS: u64 = 1_000;
    /// Upper bound for the guest wall-clock deadline.
    pub const MAX_TIMEOUT_MS: u64 = 30_000;
    pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

    /// Smallest heap a V8 isolate can bootstrap into reliably.
    pub const MIN_MEMORY_LIMIT_MB: u64 = 8;
    pub const MAX_MEMORY_LIMIT_MB: u64 = 2_048;
    pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 128;

    pub const DEFAULT_MAX_OUTPUT_TOKENS: usize = 25_000;
    pub const DEFAULT_MAX_CONCURRENT: usize = 8;

    /// Maximum size of guest source accepted for analysis.
    pub const DEFAULT_MAX_CODE_BYTES: usize = 256 * 1024;

    /// Deadline for a single git subprocess spawned by the capability bridge.
    pub const DEFAULT_GIT_TIMEOUT_MS: u64 = 10_000;

    /// Cap on files scanned by `ctx.search.grep` / returned by `ctx.files.glob`.
    pub const DEFAULT_MAX_GLOB_RESULTS: usize = 5_000;
}
