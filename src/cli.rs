//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// tether - policy membership reconciler
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version)]
#[command(about = "Reconcile the policies attached to a parent and wait for provisioning")]
#[command(
    long_about = "tether diffs the observed membership of a parent against a desired set, applies the attach/detach calls, triggers provisioning and polls it to completion. Scenarios run against an in-process simulated service."
)]
pub struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the create/remove/keep delta for a scenario
    Plan {
        /// Scenario file (TOML)
        #[arg(short, long)]
        scenario: PathBuf,
    },

    /// Run a full reconciliation of a scenario against the simulator
    Simulate {
        /// Scenario file (TOML)
        #[arg(short, long)]
        scenario: PathBuf,

        /// Reconciler configuration file (TOML, or JSON by extension)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
