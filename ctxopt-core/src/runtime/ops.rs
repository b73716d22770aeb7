//! Host ops reachable from the bootstrap shim. Guest code never sees these
//! directly: the shim captures them in closures and removes `Deno`.

use deno_core::{OpState, op2};

use crate::bridge::CapabilityBridge;

/// Console lines buffered in call order.
#[derive(Debug, Default)]
pub struct GuestLogs(pub Vec<String>);

/// How the guest's top-level function settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestSettlement {
    /// JSON text of the returned value.
    Value(String),
    /// The function returned `undefined`.
    Undefined,
    /// Guest-visible error message.
    Threw(String),
}

/// Upper bound on buffered console lines.
const MAX_LOG_LINES: usize = 1_000;
const MAX_LOG_LINE_CHARS: usize = 2_000;

#[op2]
#[string]
pub fn op_ctx_call(
    state: &mut OpState,
    #[string] method: String,
    #[string] args: String,
) -> String {
    let bridge = state.borrow::<CapabilityBridge>();
    bridge.call_json(&method, &args)
}

#[op2(fast)]
pub fn op_ctx_log(state: &mut OpState, #[string] line: &str) {
    let logs = state.borrow_mut::<GuestLogs>();
    if logs.0.len() < MAX_LOG_LINES {
        logs.0.push(line.chars().take(MAX_LOG_LINE_CHARS).collect());
    }
}

#[op2(fast)]
pub fn op_ctx_settle(state: &mut OpState, #[string] kind: &str, #[string] payload: &str) {
    let settlement = match kind {
        "ok" => GuestSettlement::Value(payload.to_string()),
        "undefined" => GuestSettlement::Undefined,
        _ => GuestSettlement::Threw(payload.to_string()),
    };
    // First settlement wins.
    if !state.has::<GuestSettlement>() {
        state.put(settlement);
    }
}

deno_core::extension!(
    ctxopt_guest,
    ops = [op_ctx_call, op_ctx_log, op_ctx_settle],
);
