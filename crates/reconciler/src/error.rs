//! Error types for the reconciler crate.

use std::time::Duration;

use thiserror::Error;

use crate::types::{OperationSnapshot, OperationStatus, ParentKey, PolicyKind};

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by remote collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which side of the delta a mutation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
    Attach,
    Detach,
}

impl std::fmt::Display for MutationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Attach => write!(f, "attach"),
            Self::Detach => write!(f, "detach"),
        }
    }
}

/// Reconciler error types.
#[derive(Debug, Error)]
pub enum Error {
    /// A create would duplicate an existing membership.
    #[error("{kind} policy {item} is already attached to {parent}")]
    AlreadyExists {
        kind: PolicyKind,
        parent: ParentKey,
        item: String,
    },

    /// The desired set is malformed.
    #[error("invalid desired state for {parent}: {reason}")]
    InvalidDesiredState { parent: ParentKey, reason: String },

    /// Listing the current membership failed.
    #[error("listing {kind} policies of {parent}: {source}")]
    ListFailed {
        kind: PolicyKind,
        parent: ParentKey,
        #[source]
        source: BoxError,
    },

    /// A single attach or detach call failed.
    #[error("{action} {kind} policy {item} on {parent}: {source}")]
    MutationFailed {
        action: MutationAction,
        kind: PolicyKind,
        parent: ParentKey,
        item: String,
        #[source]
        source: BoxError,
    },

    /// Starting provisioning failed (after transient retries).
    #[error("provisioning {parent}: {source}")]
    TriggerFailed {
        parent: ParentKey,
        #[source]
        source: BoxError,
    },

    /// The refresh call itself failed while waiting.
    #[error("describing operation {request_id}: {source}")]
    RefreshFailed {
        request_id: String,
        #[source]
        source: BoxError,
    },

    /// The wait deadline passed before a target status was observed.
    #[error(
        "timeout while waiting for state to become '{expected}' (last state: '{}', timeout: {timeout:?}){}",
        .last_status.as_ref().map_or_else(|| "none".to_string(), ToString::to_string),
        .last_error.as_ref().map_or_else(String::new, |e| format!(": {e}"))
    )]
    Timeout {
        expected: String,
        last_status: Option<OperationStatus>,
        timeout: Duration,
        last_error: Option<String>,
    },

    /// The operation could not be found often enough in a row.
    #[error("couldn't find operation (consecutive not-found checks: {checks})")]
    NotFound { checks: u32 },

    /// A recognized status outside both the pending and the target set.
    #[error("unexpected state '{status}', wanted target '{expected}'")]
    UnexpectedState {
        status: OperationStatus,
        expected: String,
    },

    /// The wait was cancelled by the caller.
    #[error("wait cancelled")]
    Cancelled,

    /// Waiting for provisioning failed; carries the remote failure reason.
    #[error(
        "waiting for provisioning of {parent} (request {request_id}){}: {source}",
        .failure_reason.as_ref().map_or_else(String::new, |r| format!(": {r}"))
    )]
    ProvisioningFailed {
        parent: ParentKey,
        request_id: String,
        failure_reason: Option<String>,
        #[source]
        source: Box<Error>,
    },

    /// Malformed composite identifier.
    #[error("invalid identifier '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Configuration file could not be read.
    #[error("failed to read config '{path}': {reason}")]
    ConfigRead { path: String, reason: String },
}

impl Error {
    /// Create an already exists error.
    pub fn already_exists(kind: PolicyKind, parent: &ParentKey, item: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            parent: parent.clone(),
            item: item.into(),
        }
    }

    /// Create an invalid desired state error.
    pub fn invalid_desired_state(parent: &ParentKey, reason: impl Into<String>) -> Self {
        Self::InvalidDesiredState {
            parent: parent.clone(),
            reason: reason.into(),
        }
    }

    /// Create an invalid id error.
    pub fn invalid_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Wrap a waiter failure with the provisioning context.
    pub fn provisioning_failed(
        parent: &ParentKey,
        request_id: impl Into<String>,
        last: Option<&OperationSnapshot>,
        source: Self,
    ) -> Self {
        Self::ProvisioningFailed {
            parent: parent.clone(),
            request_id: request_id.into(),
            failure_reason: last.and_then(|s| s.failure_reason.clone()),
            source: Box::new(source),
        }
    }

    /// Whether this error is the caller's cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::ProvisioningFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Whether this error is a wait timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::ProvisioningFailed { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
