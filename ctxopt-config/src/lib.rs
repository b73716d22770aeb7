//! Configuration loader components shared by the ctxopt host binary and the
//! sandbox core. Everything here is plain data: the core never reads files or
//! environment variables on its own, the host loads a [`CtxoptConfig`] and
//! hands the relevant pieces down.

pub mod constants;
pub mod debug;
pub mod loader;
pub mod sandbox;

pub use debug::{DebugConfig, TraceLevel};
pub use loader::{ConfigManager, ConfigSource, CtxoptConfig};
pub use sandbox::SandboxConfig;
