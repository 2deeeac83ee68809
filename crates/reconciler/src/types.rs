//! Core types for the reconciler.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Key of the parent resource a membership set is attached to.
///
/// The parent is always scoped to an instance; operations started against a
/// parent are addressed by this key plus their request id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentKey {
    /// Instance that owns the parent.
    pub instance: String,
    /// The parent resource itself.
    pub parent: String,
}

impl ParentKey {
    /// Create a new parent key.
    pub fn new(instance: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            parent: parent.into(),
        }
    }
}

impl fmt::Display for ParentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.parent, self.instance)
    }
}

/// The kind of policy membership being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Provider-managed policy, referenced by ARN.
    Managed,
    /// Customer-managed policy, referenced by name and path.
    CustomerManaged,
    /// Inline policy document. At most one per parent.
    Inline,
}

impl PolicyKind {
    /// All kinds, in a stable order.
    pub const ALL: [Self; 3] = [Self::Managed, Self::CustomerManaged, Self::Inline];

    /// Whether a parent holds at most one member of this kind.
    ///
    /// The remote "put" for these kinds overwrites silently instead of
    /// rejecting duplicates.
    pub const fn is_single_membership(self) -> bool {
        matches!(self, Self::Inline)
    }

    /// Stable short name used in identifiers and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Managed => "managed",
            Self::CustomerManaged => "customer-managed",
            Self::Inline => "inline",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::invalid_id(s, "unknown policy kind"))
    }
}

/// Default path for customer-managed policies.
pub const DEFAULT_POLICY_PATH: &str = "/";

fn default_path() -> String {
    DEFAULT_POLICY_PATH.to_string()
}

/// A reference to one policy that can be a member of a parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PolicyReference {
    /// Provider-managed policy.
    Managed { arn: String },
    /// Customer-managed policy.
    CustomerManaged {
        name: String,
        #[serde(default = "default_path")]
        path: String,
    },
    /// Inline policy document (JSON).
    Inline { document: String },
}

impl PolicyReference {
    /// Reference a managed policy.
    pub fn managed(arn: impl Into<String>) -> Self {
        Self::Managed { arn: arn.into() }
    }

    /// Reference a customer-managed policy.
    pub fn customer_managed(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::CustomerManaged {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Reference an inline policy document.
    pub fn inline(document: impl Into<String>) -> Self {
        Self::Inline {
            document: document.into(),
        }
    }

    /// The kind of this reference.
    pub const fn kind(&self) -> PolicyKind {
        match self {
            Self::Managed { .. } => PolicyKind::Managed,
            Self::CustomerManaged { .. } => PolicyKind::CustomerManaged,
            Self::Inline { .. } => PolicyKind::Inline,
        }
    }
}

impl fmt::Display for PolicyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Managed { arn } => write!(f, "{arn}"),
            Self::CustomerManaged { name, path } => write!(f, "{path}{name}"),
            Self::Inline { document } => {
                write!(f, "inline document ({} bytes)", document.len())
            }
        }
    }
}

/// Handle to a server-tracked asynchronous operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle {
    /// Parent the operation was started against.
    pub parent: ParentKey,
    /// Server-assigned request id.
    pub request_id: String,
}

impl OperationHandle {
    /// Create a new operation handle.
    pub fn new(parent: ParentKey, request_id: impl Into<String>) -> Self {
        Self {
            parent,
            request_id: request_id.into(),
        }
    }
}

/// Status of an asynchronous operation as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed,
    /// Anything outside the known vocabulary, including an empty status.
    Unknown(String),
}

impl OperationStatus {
    /// Parse a remote status string.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "IN_PROGRESS" => Self::InProgress,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Whether the status belongs to the known vocabulary.
    pub const fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Render a list of statuses for error messages.
    pub fn join(statuses: &[Self]) -> String {
        statuses.iter().join(", ")
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => f.write_str("IN_PROGRESS"),
            Self::Succeeded => f.write_str("SUCCEEDED"),
            Self::Failed => f.write_str("FAILED"),
            Self::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// One observation of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub handle: OperationHandle,
    pub status: OperationStatus,
    pub failure_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl OperationSnapshot {
    /// Create a snapshot with no failure reason.
    pub fn new(handle: OperationHandle, status: OperationStatus) -> Self {
        Self {
            handle,
            status,
            failure_reason: None,
            created_at: None,
        }
    }

    /// Attach the remote failure reason.
    #[must_use]
    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    /// Attach the creation timestamp.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// Difference between observed and desired membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta<T> {
    /// Desired items missing remotely, in desired order.
    pub create: Vec<T>,
    /// Remote items no longer desired, in observed order.
    pub remove: Vec<T>,
    /// Desired items already present.
    pub keep: Vec<T>,
}

impl<T> Delta<T> {
    /// Whether applying this delta would change nothing.
    pub fn is_converged(&self) -> bool {
        self.create.is_empty() && self.remove.is_empty()
    }
}

impl<T> Default for Delta<T> {
    fn default() -> Self {
        Self {
            create: Vec::new(),
            remove: Vec::new(),
            keep: Vec::new(),
        }
    }
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutcome<T> {
    /// The parent that was reconciled.
    pub parent: ParentKey,
    /// Items attached by this run.
    pub created: Vec<T>,
    /// Items detached, or overwritten in a single-member slot, by this run.
    pub removed: Vec<T>,
    /// Items whose detach found them already gone.
    pub already_absent: Vec<T>,
    /// Items left untouched.
    pub kept: Vec<T>,
    /// Final snapshot of the provisioning operation, if one was started.
    pub operation: Option<OperationSnapshot>,
}

impl<T> ReconcileOutcome<T> {
    /// Whether the run found the parent already converged.
    pub fn converged(&self) -> bool {
        self.operation.is_none() && self.created.is_empty() && self.removed.is_empty()
    }
}
