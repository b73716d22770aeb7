//! Isolated guest interpreter: a deno_core `JsRuntime` per execution with the
//! `ctx` shim as its only capability surface.

mod arena;
mod isolate;
mod ops;

pub use isolate::{
    ExecutionOutcome, IsolateOptions, IsolatedRuntime, RuntimeFailure, RuntimeFailureKind,
    wrap_guest,
};
pub use ops::{GuestLogs, GuestSettlement};
