//! Scenario files for the simulator.
//!
//! ```toml
//! kind = "managed"
//!
//! [parent]
//! instance = "arn:aws:sso:::instance/ssoins-1"
//! parent = "arn:aws:sso:::permissionSet/ps-1"
//!
//! [[have]]
//! kind = "managed"
//! arn = "arn:aws:iam::aws:policy/ReadOnlyAccess"
//!
//! [[want]]
//! kind = "customer-managed"
//! name = "Deploy"
//! path = "/ops/"
//!
//! [provisioning]
//! pending_polls = 2
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tether_reconciler::memory::{InMemoryDirectory, ProvisioningPlan};
use tether_reconciler::{ParentKey, PolicyKind, PolicyReference};

/// One reconciliation to simulate.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Membership kind being reconciled.
    pub kind: PolicyKind,
    pub parent: ParentKey,
    /// Members present before the run, of any kind.
    #[serde(default)]
    pub have: Vec<PolicyReference>,
    /// Desired members.
    #[serde(default)]
    pub want: Vec<PolicyReference>,
    /// How the provisioning operation evolves.
    #[serde(default)]
    pub provisioning: ProvisioningPlan,
}

impl Scenario {
    /// Load a scenario from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid scenario {}", path.display()))
    }

    /// Parse a scenario from TOML.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse scenario TOML")
    }

    /// A simulated directory holding `have` and following `provisioning`.
    pub fn directory(&self) -> InMemoryDirectory {
        let directory = InMemoryDirectory::new();
        directory.seed(&self.parent, self.have.iter().cloned());
        directory.set_plan(self.provisioning.clone());
        directory
    }
}
