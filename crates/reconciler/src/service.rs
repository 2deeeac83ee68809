//! Capabilities the reconciler consumes from the remote service.
//!
//! The engine never talks to a concrete API. Callers provide an
//! implementation of [`MembershipService`] per membership kind and an
//! [`ErrorClassifier`] that knows how that implementation reports failures.

use async_trait::async_trait;

use crate::types::{OperationHandle, OperationSnapshot, ParentKey, PolicyKind};

/// Remote operations on one kind of membership.
#[async_trait]
pub trait MembershipService: Send + Sync {
    /// Member type reconciled by this service.
    type Item: Clone + std::fmt::Debug + std::fmt::Display + Send + Sync + 'static;
    /// Error reported by every remote call.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The membership kind this service manages.
    fn kind(&self) -> PolicyKind;

    /// Kind of a single item. Services whose item type can carry another
    /// kind override this so mismatched desired items are caught up front.
    fn item_kind(&self, _item: &Self::Item) -> PolicyKind {
        self.kind()
    }

    /// Current membership of `parent`. Pagination is the implementation's
    /// concern; the full set is returned.
    async fn list_membership(&self, parent: &ParentKey) -> Result<Vec<Self::Item>, Self::Error>;

    /// Attach a single item.
    async fn attach(&self, parent: &ParentKey, item: &Self::Item) -> Result<(), Self::Error>;

    /// Detach a single item. Must report a not-found error the classifier
    /// recognizes when the item is already gone.
    async fn detach(&self, parent: &ParentKey, item: &Self::Item) -> Result<(), Self::Error>;

    /// Start propagating the parent's membership to its dependents.
    async fn trigger_provisioning(&self, parent: &ParentKey)
        -> Result<OperationHandle, Self::Error>;

    /// Describe an operation. `None` means the service does not know the
    /// request yet.
    async fn describe_operation(
        &self,
        handle: &OperationHandle,
    ) -> Result<Option<OperationSnapshot>, Self::Error>;
}

/// Coarse classification of a remote error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Conflict,
    Throttling,
    Other,
}

impl ErrorClass {
    /// Whether errors of this class are safe to retry.
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Conflict | Self::Throttling)
    }
}

/// Predicates over a service's error type.
pub trait ErrorClassifier<E>: Send + Sync {
    fn is_not_found(&self, err: &E) -> bool;

    fn is_conflict(&self, err: &E) -> bool;

    fn is_throttling(&self, err: &E) -> bool;

    /// Classify `err`, checking not-found first.
    fn classify(&self, err: &E) -> ErrorClass {
        if self.is_not_found(err) {
            ErrorClass::NotFound
        } else if self.is_conflict(err) {
            ErrorClass::Conflict
        } else if self.is_throttling(err) {
            ErrorClass::Throttling
        } else {
            ErrorClass::Other
        }
    }
}

/// Classifier backed by plain predicate functions.
pub struct FnClassifier<E> {
    not_found: fn(&E) -> bool,
    conflict: fn(&E) -> bool,
    throttling: fn(&E) -> bool,
}

impl<E> FnClassifier<E> {
    /// Create a classifier from three predicates.
    pub const fn new(
        not_found: fn(&E) -> bool,
        conflict: fn(&E) -> bool,
        throttling: fn(&E) -> bool,
    ) -> Self {
        Self {
            not_found,
            conflict,
            throttling,
        }
    }
}

impl<E> ErrorClassifier<E> for FnClassifier<E> {
    fn is_not_found(&self, err: &E) -> bool {
        (self.not_found)(err)
    }

    fn is_conflict(&self, err: &E) -> bool {
        (self.conflict)(err)
    }

    fn is_throttling(&self, err: &E) -> bool {
        (self.throttling)(err)
    }
}
