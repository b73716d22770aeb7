//! `ctx.pipeline.run(steps)`: a sequence of bridge calls where a step can
//! consume the previous step's output.
//!
//! A step is `{ "method": "files.read", "args": ["src/lib.rs"] }`. An argument
//! equal to `"$prev"` is replaced with the previous output, and a step with no
//! `args` receives the previous output as its only argument.

use serde_json::Value;

use super::CapabilityBridge;
use crate::errors::{CapabilityError, PipelineError};

pub const PREVIOUS_OUTPUT: &str = "$prev";
const MAX_STEPS: usize = 32;

pub(super) fn run(bridge: &CapabilityBridge, steps: &Value) -> Result<Value, CapabilityError> {
    let steps = steps.as_array().ok_or_else(|| {
        CapabilityError::invalid_arguments("pipeline.run", "steps must be an array")
    })?;
    if steps.is_empty() {
        return Err(PipelineError::empty().into());
    }
    if steps.len() > MAX_STEPS {
        return Err(PipelineError::invalid_step(MAX_STEPS, "too many steps").into());
    }

    let mut previous: Option<Value> = None;
    for (index, step) in steps.iter().enumerate() {
        let method = step
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::invalid_step(index, "missing method"))?;
        if method.starts_with("pipeline.") {
            return Err(PipelineError::invalid_step(index, "pipelines cannot nest").into());
        }

        let args: Vec<Value> = match step.get("args") {
            Some(Value::Array(args)) => args
                .iter()
                .map(|arg| match (arg.as_str(), &previous) {
                    (Some(PREVIOUS_OUTPUT), Some(prev)) => prev.clone(),
                    _ => arg.clone(),
                })
                .collect(),
            Some(Value::Null) | None => previous.iter().cloned().collect(),
            Some(_) => {
                return Err(PipelineError::invalid_step(index, "args must be an array").into());
            }
        };

        match bridge.dispatch(method, &args) {
            Ok(output) => previous = Some(output),
            Err(err) => {
                bridge.report_violation(&err);
                return Err(PipelineError::step_failed(index, method, err.guest_message()).into());
            }
        }
    }

    Ok(previous.unwrap_or(Value::Null))
}
