use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ctxopt")]
#[command(about = "Run agent-written JavaScript in an isolated sandbox")]
#[command(version)]
pub struct Cli {
    /// Explicit config file (otherwise ./ctxopt.toml, then ~/.ctxopt/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Working directory exposed to guest code
    #[arg(short, long, global = true, default_value = ".")]
    pub workdir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a snippet and print the JSON result
    Run {
        /// Source file, or `-` for stdin
        #[arg(default_value = "-")]
        source: String,

        /// Wall-clock deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Heap ceiling in MiB
        #[arg(long)]
        memory_mb: Option<u64>,

        /// Token budget for the serialized result
        #[arg(long)]
        max_output_tokens: Option<usize>,

        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },

    /// Run only the static analyzer and print its verdict
    Check {
        /// Source file, or `-` for stdin
        #[arg(default_value = "-")]
        source: String,
    },

    /// Print the effective configuration
    Config,
}
