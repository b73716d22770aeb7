//! Shared helpers reused across the ctxopt crates. The goal is to keep the
//! sandbox core decoupled from the host binary's configuration and logging
//! wiring while still sharing the path and message-hygiene contracts that
//! every layer must agree on.

pub mod errors;
pub mod paths;
pub mod sanitizer;

pub use errors::{ErrorReporter, MemoryErrorReporter, NoopErrorReporter};
pub use paths::{canonicalize_allow_missing, canonicalize_workspace, is_within, normalize_path};
pub use sanitizer::{HostPathSanitizer, redact_secrets};
