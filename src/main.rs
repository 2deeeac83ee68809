//! # tether
//!
//! Command-line front end for the membership reconciler.
//!
//! `plan` prints the delta for a scenario without touching anything.
//! `simulate` runs the full reconcile against an in-process directory:
//! attach/detach, trigger provisioning with transient retries, and poll the
//! operation until it settles or times out. Ctrl+C cancels the wait.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod commands;
mod scenario;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::commands::execute_command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    execute_command(cli.command).await
}

/// Initialize tracing subscriber with environment filter.
///
/// Logs go to stderr so JSON output on stdout stays machine-readable.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
