//! trawl - file discovery with git status tracking
//!
//! trawl provides:
//! - Streaming file scans through fd, `rg --files`, or a built-in walker
//! - A git status cache with background refresh and index/HEAD watching
//! - Unified output format (jsonl/json/md/raw)

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use tracing_subscriber::prelude::*;

mod backends;
mod cli;
mod core;
mod status;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let default_level = if cli.verbose {
        "trawl=debug"
    } else if cli.quiet {
        "trawl=error"
    } else {
        "trawl=warn"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .with_target(false),
        )
        .init();

    cli::run(cli).await
}
