//! Membership reconciliation with provisioning.
//!
//! Brings the set of policies attached to a parent in line with a desired
//! set, then makes sure the change has been propagated:
//!
//! - **Diff**: compare the remote membership with the desired set under a
//!   per-kind equivalence
//! - **Dispatch**: one attach or detach per item, creates first
//! - **Provision**: if anything changed, start provisioning (retrying
//!   transient conflicts) and poll the operation until it succeeds
//!
//! The remote service is reached only through [`MembershipService`] and
//! [`ErrorClassifier`]. [`memory::InMemoryDirectory`] implements both for
//! tests and dry runs.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tether_reconciler::{
//!     memory::{InMemoryDirectory, RemoteError},
//!     ParentKey, PolicyKind, PolicyReference, Reconciler,
//! };
//!
//! #[tokio::main]
//! async fn main() -> tether_reconciler::Result<()> {
//!     let directory = InMemoryDirectory::new();
//!     let reconciler = Reconciler::builder()
//!         .with_service(Arc::new(directory.kind(PolicyKind::Managed)))
//!         .with_classifier(Arc::new(RemoteError::classifier()))
//!         .build()?;
//!
//!     let parent = ParentKey::new("ins-1", "ps-1");
//!     let want = [PolicyReference::managed("arn:aws:iam::aws:policy/ReadOnlyAccess")];
//!     let outcome = reconciler.reconcile(&parent, &want).await?;
//!     println!("attached {}", outcome.created.len());
//!     Ok(())
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod cancel;
pub mod config;
pub mod diff;
pub mod dispatch;
pub mod equivalence;
pub mod error;
pub mod id;
pub mod memory;
pub mod reconciler;
pub mod retry;
pub mod service;
pub mod types;
pub mod waiter;

// Re-export main types
pub use cancel::{CancelHandle, CancelToken};
pub use config::{PollSettings, ReconcilerConfig};
pub use diff::diff;
pub use dispatch::{DispatchReport, Dispatcher, Equivalence};
pub use equivalence::Equivalent;
pub use error::{BoxError, Error, MutationAction, Result};
pub use id::AttachmentId;
pub use reconciler::{Reconciler, ReconcilerBuilder};
pub use retry::{retry_transient, with_retry, RetryOutcome, RetryPolicy};
pub use service::{ErrorClass, ErrorClassifier, FnClassifier, MembershipService};
pub use types::{
    Delta, OperationHandle, OperationSnapshot, OperationStatus, ParentKey, PolicyKind,
    PolicyReference, ReconcileOutcome,
};
pub use waiter::{wait_for_state, Observed, OperationRefresh, Refresh, WaitConfig, WaitFailure};
