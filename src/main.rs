//! ctxopt - sandboxed execution of agent-written JavaScript
//!
//! Thin binary entry point over `ctxopt-core`.

use anyhow::{Context, Result};
use clap::Parser;
use ctxopt_config::ConfigManager;
use ctxopt_core::{SandboxContext, SandboxExecutor, analyze};
use tokio::signal;

mod cli;
mod main_helpers;

use cli::{Cli, Commands};
use main_helpers::{initialize_tracing, read_source};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let workdir = args
        .workdir
        .canonicalize()
        .with_context(|| {
            format!(
                "Working directory {} is not accessible",
                args.workdir.display()
            )
        })?;
    let manager = ConfigManager::load(args.config.as_deref(), &workdir)?;
    initialize_tracing(&manager.config().debug);
    tracing::debug!(
        source = ?manager.source(),
        workdir = %workdir.display(),
        "configuration loaded"
    );

    match args.command {
        Commands::Run {
            source,
            timeout_ms,
            memory_mb,
            max_output_tokens,
            pretty,
        } => {
            let code = read_source(&source)?;
            let config = manager.into_config().sandbox;

            let mut context = SandboxContext::from_config(&workdir, &config);
            if let Some(timeout_ms) = timeout_ms {
                context = context.with_timeout_ms(timeout_ms);
            }
            if let Some(memory_mb) = memory_mb {
                context = context.with_memory_limit_mb(memory_mb);
            }
            if let Some(max_output_tokens) = max_output_tokens {
                context = context.with_max_output_tokens(max_output_tokens);
            }

            let executor = SandboxExecutor::new(config);
            // Dropping the execution on Ctrl+C terminates the isolate.
            let result = tokio::select! {
                result = executor.execute_sandbox(&code, &context) => result,
                _ = signal::ctrl_c() => {
                    anyhow::bail!("Interrupted");
                }
            };

            let json = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{json}");
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Check { source } => {
            let code = read_source(&source)?;
            let analysis = analyze(&code);
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            if !analysis.safe {
                std::process::exit(1);
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(manager.config())?);
        }
    }

    Ok(())
}
