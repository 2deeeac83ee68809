//! Reconciler implementation.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::ReconcilerConfig;
use crate::diff::{diff, first_duplicate};
use crate::dispatch::{Dispatcher, Equivalence};
use crate::equivalence::Equivalent;
use crate::error::{Error, Result};
use crate::retry::retry_transient;
use crate::service::{ErrorClassifier, MembershipService};
use crate::types::{Delta, OperationSnapshot, ParentKey, ReconcileOutcome};
use crate::waiter::{wait_for_state, OperationRefresh, WaitConfig};

/// Drives one membership kind of a parent to its desired set.
///
/// Each call lists the remote membership afresh, applies the delta one item
/// at a time, and, if anything changed, starts provisioning and waits for it
/// to finish before returning.
pub struct Reconciler<S>
where
    S: MembershipService,
{
    service: Arc<S>,
    classifier: Arc<dyn ErrorClassifier<S::Error>>,
    equal: Arc<Equivalence<S::Item>>,
    config: ReconcilerConfig,
}

impl<S> Reconciler<S>
where
    S: MembershipService,
    S::Item: Equivalent,
{
    /// Create a reconciler using the item type's own equivalence.
    pub fn new(
        service: Arc<S>,
        classifier: Arc<dyn ErrorClassifier<S::Error>>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            service,
            classifier,
            equal: Arc::new(|a: &S::Item, b: &S::Item| a.equivalent(b)),
            config,
        }
    }
}

impl<S> Reconciler<S>
where
    S: MembershipService,
{
    /// Start building a reconciler.
    pub fn builder() -> ReconcilerBuilder<S> {
        ReconcilerBuilder::new()
    }

    /// Compute what a reconciliation of `parent` towards `want` would do.
    ///
    /// Validates `want` and lists the current membership; nothing is mutated.
    pub async fn plan(&self, parent: &ParentKey, want: &[S::Item]) -> Result<Delta<S::Item>> {
        self.validate_desired(parent, want)?;

        let kind = self.service.kind();
        let have = self
            .service
            .list_membership(parent)
            .await
            .map_err(|e| Error::ListFailed {
                kind,
                parent: parent.clone(),
                source: Box::new(e),
            })?;

        let delta = diff(&have, want, |a, b| (self.equal)(a, b));
        debug!(
            parent = %parent,
            %kind,
            have = have.len(),
            create = delta.create.len(),
            remove = delta.remove.len(),
            keep = delta.keep.len(),
            "Computed delta"
        );
        Ok(delta)
    }

    /// Reconcile `parent` towards `want`, waiting for provisioning without
    /// a cancellation signal.
    pub async fn reconcile(
        &self,
        parent: &ParentKey,
        want: &[S::Item],
    ) -> Result<ReconcileOutcome<S::Item>> {
        self.reconcile_until(parent, want, &CancelToken::never())
            .await
    }

    /// Reconcile `parent` towards `want`.
    ///
    /// Mutations are applied before this returns. When at least one attach
    /// or detach went through, provisioning is triggered and awaited; a
    /// cancelled `cancel` aborts only that wait.
    pub async fn reconcile_until(
        &self,
        parent: &ParentKey,
        want: &[S::Item],
        cancel: &CancelToken,
    ) -> Result<ReconcileOutcome<S::Item>> {
        let kind = self.service.kind();
        info!(parent = %parent, %kind, desired = want.len(), "Starting reconciliation");

        let delta = self.plan(parent, want).await?;
        let dispatcher = Dispatcher::new(
            self.service.as_ref(),
            self.classifier.as_ref(),
            self.equal.as_ref(),
        );
        let report = dispatcher.dispatch(parent, &delta).await?;
        let mutated = report.mutated();

        let mut outcome = ReconcileOutcome {
            parent: parent.clone(),
            created: report.attached,
            removed: report.detached,
            already_absent: report.already_absent,
            kept: delta.keep,
            operation: None,
        };
        outcome.removed.extend(report.superseded);

        if !mutated {
            info!(parent = %parent, %kind, "Membership already converged");
            return Ok(outcome);
        }

        let snapshot = self.provision(parent, cancel).await?;
        info!(
            parent = %parent,
            %kind,
            request_id = %snapshot.handle.request_id,
            created = outcome.created.len(),
            removed = outcome.removed.len(),
            "Reconciliation complete"
        );
        outcome.operation = Some(snapshot);
        Ok(outcome)
    }

    /// Trigger provisioning and wait for it to succeed.
    async fn provision(&self, parent: &ParentKey, cancel: &CancelToken) -> Result<OperationSnapshot> {
        let handle = retry_transient(&self.config.retry, self.classifier.as_ref(), || {
            self.service.trigger_provisioning(parent)
        })
        .await
        .map_err(|e| Error::TriggerFailed {
            parent: parent.clone(),
            source: Box::new(e),
        })?;

        info!(parent = %parent, request_id = %handle.request_id, "Provisioning started");

        let refresh = OperationRefresh::new(self.service.as_ref(), handle.clone());
        let wait = WaitConfig::provisioning(self.config.provisioning.clone());
        wait_for_state(&wait, &refresh, cancel)
            .await
            .map_err(|failure| {
                warn!(
                    parent = %parent,
                    request_id = %handle.request_id,
                    error = %failure.error,
                    "Provisioning did not succeed"
                );
                Error::provisioning_failed(
                    parent,
                    handle.request_id.clone(),
                    failure.last.as_ref(),
                    failure.error,
                )
            })
    }

    /// Reject desired sets the engine cannot apply.
    fn validate_desired(&self, parent: &ParentKey, want: &[S::Item]) -> Result<()> {
        let kind = self.service.kind();

        if let Some(item) = want.iter().find(|i| self.service.item_kind(i) != kind) {
            return Err(Error::invalid_desired_state(
                parent,
                format!(
                    "{item} is a {} policy, this reconciler manages {kind}",
                    self.service.item_kind(item)
                ),
            ));
        }

        if kind.is_single_membership() && want.len() > 1 {
            return Err(Error::invalid_desired_state(
                parent,
                format!("{kind} allows at most one member, got {}", want.len()),
            ));
        }

        if let Some((a, b)) = first_duplicate(want, |a, b| (self.equal)(a, b)) {
            return Err(Error::invalid_desired_state(
                parent,
                format!("{a} and {b} are equivalent"),
            ));
        }

        Ok(())
    }

    /// Get the service.
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder<S>
where
    S: MembershipService,
{
    service: Option<Arc<S>>,
    classifier: Option<Arc<dyn ErrorClassifier<S::Error>>>,
    equal: Option<Arc<Equivalence<S::Item>>>,
    config: ReconcilerConfig,
}

impl<S> ReconcilerBuilder<S>
where
    S: MembershipService,
{
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            service: None,
            classifier: None,
            equal: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the membership service.
    pub fn with_service(mut self, service: Arc<S>) -> Self {
        self.service = Some(service);
        self
    }

    /// Set the error classifier for the service's errors.
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier<S::Error>>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Set a custom equivalence between items.
    pub fn with_equivalence<F>(mut self, equal: F) -> Self
    where
        F: Fn(&S::Item, &S::Item) -> bool + Send + Sync + 'static,
    {
        let equal: Arc<Equivalence<S::Item>> = Arc::new(equal);
        self.equal = Some(equal);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the reconciler.
    ///
    /// Falls back to [`Equivalent`] when no equivalence was given.
    pub fn build(self) -> Result<Reconciler<S>>
    where
        S::Item: Equivalent,
    {
        let equal = self
            .equal
            .clone()
            .unwrap_or_else(|| Arc::new(|a: &S::Item, b: &S::Item| a.equivalent(b)));
        self.finish(equal)
    }

    /// Build the reconciler for an item type without a default equivalence.
    pub fn build_with_custom_equivalence(self) -> Result<Reconciler<S>> {
        let equal = self
            .equal
            .clone()
            .ok_or_else(|| Error::invalid_config("Equivalence is required"))?;
        self.finish(equal)
    }

    fn finish(self, equal: Arc<Equivalence<S::Item>>) -> Result<Reconciler<S>> {
        let service = self
            .service
            .ok_or_else(|| Error::invalid_config("Membership service is required"))?;
        let classifier = self
            .classifier
            .ok_or_else(|| Error::invalid_config("Error classifier is required"))?;
        self.config.validate()?;

        Ok(Reconciler {
            service,
            classifier,
            equal,
            config: self.config,
        })
    }
}

impl<S> Default for ReconcilerBuilder<S>
where
    S: MembershipService,
{
    fn default() -> Self {
        Self::new()
    }
}
