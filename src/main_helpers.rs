use std::fs;
use std::io::{self, Read};

use anyhow::{Context, Result};
use ctxopt_config::DebugConfig;

/// Read guest source from a file path or stdin (`-`).
pub(crate) fn read_source(source: &str) -> Result<String> {
    if source == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read guest code from stdin")?;
        return Ok(buffer);
    }
    fs::read_to_string(source).with_context(|| format!("Failed to read guest code from {source}"))
}

/// Install the stderr subscriber. `RUST_LOG` takes precedence over the
/// config's `[debug]` section.
pub(crate) fn initialize_tracing(debug: &DebugConfig) {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(debug.filter_directive()));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(true);

    let init_result = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();

    if let Err(err) = init_result {
        tracing::warn!(error = %err, "tracing already initialized; skipping setup");
    }
}
