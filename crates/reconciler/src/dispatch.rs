//! Mutation dispatcher.
//!
//! Applies a [`Delta`] one remote call per item: creates first, then
//! removes, each in delta order. The first fatal error stops dispatch and is
//! returned as is. Already-applied items are not rolled back; the next
//! reconciliation diffs against fresh state and picks up where this one
//! stopped.

use tracing::{debug, info, warn};

use crate::error::{Error, MutationAction, Result};
use crate::service::{ErrorClass, ErrorClassifier, MembershipService};
use crate::types::{Delta, ParentKey};

/// Equivalence relation shared by the differ and the dispatcher.
pub type Equivalence<T> = dyn Fn(&T, &T) -> bool + Send + Sync;

/// What a dispatch actually did.
#[derive(Debug, Clone)]
pub struct DispatchReport<T> {
    /// Items attached.
    pub attached: Vec<T>,
    /// Items detached.
    pub detached: Vec<T>,
    /// Items whose detach reported them already gone.
    pub already_absent: Vec<T>,
    /// Removes skipped because a create overwrote the single slot.
    pub superseded: Vec<T>,
}

impl<T> Default for DispatchReport<T> {
    fn default() -> Self {
        Self {
            attached: Vec::new(),
            detached: Vec::new(),
            already_absent: Vec::new(),
            superseded: Vec::new(),
        }
    }
}

impl<T> DispatchReport<T> {
    /// Whether at least one remote mutation was applied.
    pub fn mutated(&self) -> bool {
        !self.attached.is_empty() || !self.detached.is_empty()
    }
}

/// Issues attach/detach calls for a delta.
pub struct Dispatcher<'a, S>
where
    S: MembershipService,
{
    service: &'a S,
    classifier: &'a dyn ErrorClassifier<S::Error>,
    equal: &'a Equivalence<S::Item>,
}

impl<'a, S> Dispatcher<'a, S>
where
    S: MembershipService,
{
    /// Create a dispatcher over `service`.
    pub fn new(
        service: &'a S,
        classifier: &'a dyn ErrorClassifier<S::Error>,
        equal: &'a Equivalence<S::Item>,
    ) -> Self {
        Self {
            service,
            classifier,
            equal,
        }
    }

    /// Apply `delta` to `parent`.
    pub async fn dispatch(
        &self,
        parent: &ParentKey,
        delta: &Delta<S::Item>,
    ) -> Result<DispatchReport<S::Item>> {
        let kind = self.service.kind();
        let mut report = DispatchReport::default();

        for item in &delta.create {
            if kind.is_single_membership() {
                self.ensure_not_attached(parent, item).await?;
            }

            debug!(parent = %parent, %kind, %item, "Attaching");
            self.service
                .attach(parent, item)
                .await
                .map_err(|e| mutation_failed(MutationAction::Attach, kind, parent, item, e))?;
            report.attached.push(item.clone());
        }

        if kind.is_single_membership() && !report.attached.is_empty() {
            if !delta.remove.is_empty() {
                info!(
                    parent = %parent,
                    %kind,
                    superseded = delta.remove.len(),
                    "Create replaced the existing member, skipping detach"
                );
            }
            report.superseded = delta.remove.clone();
            return Ok(report);
        }

        for item in &delta.remove {
            debug!(parent = %parent, %kind, %item, "Detaching");
            match self.service.detach(parent, item).await {
                Ok(()) => report.detached.push(item.clone()),
                Err(e) if self.classifier.classify(&e) == ErrorClass::NotFound => {
                    debug!(parent = %parent, %kind, %item, "Already detached");
                    report.already_absent.push(item.clone());
                }
                Err(e) => {
                    warn!(
                        parent = %parent,
                        %kind,
                        %item,
                        error = %e,
                        attached = report.attached.len(),
                        detached = report.detached.len(),
                        "Detach failed, stopping dispatch"
                    );
                    return Err(mutation_failed(MutationAction::Detach, kind, parent, item, e));
                }
            }
        }

        Ok(report)
    }

    /// Fail locally when `item` is already a member of `parent`.
    ///
    /// Only needed for kinds whose remote create silently overwrites.
    async fn ensure_not_attached(&self, parent: &ParentKey, item: &S::Item) -> Result<()> {
        let kind = self.service.kind();
        let current = self
            .service
            .list_membership(parent)
            .await
            .map_err(|e| Error::ListFailed {
                kind,
                parent: parent.clone(),
                source: Box::new(e),
            })?;

        if current.iter().any(|existing| (self.equal)(existing, item)) {
            warn!(parent = %parent, %kind, %item, "Refusing duplicate create");
            return Err(Error::already_exists(kind, parent, item.to_string()));
        }
        Ok(())
    }
}

fn mutation_failed<T, E>(
    action: MutationAction,
    kind: crate::types::PolicyKind,
    parent: &ParentKey,
    item: &T,
    source: E,
) -> Error
where
    T: std::fmt::Display,
    E: std::error::Error + Send + Sync + 'static,
{
    Error::MutationFailed {
        action,
        kind,
        parent: parent.clone(),
        item: item.to_string(),
        source: Box::new(source),
    }
}
