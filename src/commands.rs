//! CLI command handlers.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tether_reconciler::memory::{KindService, RemoteError};
use tether_reconciler::{CancelHandle, Reconciler, ReconcilerConfig};
use tokio::signal;
use tracing::{info, warn};

use crate::cli::Commands;
use crate::scenario::Scenario;

/// Execute a CLI command.
///
/// This is the main command dispatcher that routes to the appropriate handler.
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Plan { scenario } => cmd_plan(&scenario).await,
        Commands::Simulate { scenario, config } => cmd_simulate(&scenario, config).await,
    }
}

/// Print the delta a reconciliation would apply.
async fn cmd_plan(scenario_path: &Path) -> Result<()> {
    let scenario = Scenario::from_file(scenario_path)?;
    let reconciler = build_reconciler(&scenario, ReconcilerConfig::default())?;

    let delta = reconciler
        .plan(&scenario.parent, &scenario.want)
        .await
        .context("Planning failed")?;

    info!(
        parent = %scenario.parent,
        create = delta.create.len(),
        remove = delta.remove.len(),
        keep = delta.keep.len(),
        "Plan computed"
    );
    print_json(&delta)
}

/// Reconcile a scenario against the simulator and print the outcome.
async fn cmd_simulate(scenario_path: &Path, config_path: Option<PathBuf>) -> Result<()> {
    let scenario = Scenario::from_file(scenario_path)?;
    let config = load_config(config_path.as_deref())?;
    let reconciler = build_reconciler(&scenario, config)?;

    let (handle, token) = CancelHandle::new();
    let ctrl_c = tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, cancelling wait");
                handle.cancel();
            }
            Err(err) => warn!(error = %err, "Failed to listen for Ctrl+C"),
        }
    });

    let result = reconciler
        .reconcile_until(&scenario.parent, &scenario.want, &token)
        .await;
    ctrl_c.abort();

    let outcome = result.with_context(|| format!("Reconciling {} failed", scenario.parent))?;
    print_json(&outcome)
}

/// File configuration if given, environment overrides on top.
fn load_config(path: Option<&Path>) -> Result<ReconcilerConfig> {
    let config = match path {
        Some(path) => ReconcilerConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?
            .with_env_overrides(|key| std::env::var(key).ok()),
        None => ReconcilerConfig::from_env(),
    };

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_reconciler(
    scenario: &Scenario,
    config: ReconcilerConfig,
) -> Result<Reconciler<KindService>> {
    let directory = scenario.directory();
    Reconciler::builder()
        .with_service(Arc::new(directory.kind(scenario.kind)))
        .with_classifier(Arc::new(RemoteError::classifier()))
        .with_config(config)
        .build()
        .context("Failed to build reconciler")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}
