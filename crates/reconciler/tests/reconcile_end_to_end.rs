//! End-to-end reconciliation against the in-memory directory.
//!
//! All tests run on a paused clock, so waiter and retry delays complete
//! instantly while keeping their relative timing.

use std::sync::Arc;
use std::time::Duration;

use tether_reconciler::memory::{Call, Fault, InMemoryDirectory, KindService, ProvisioningPlan, RemoteError};
use tether_reconciler::{
    Error, OperationStatus, ParentKey, PolicyKind, PolicyReference, Reconciler, ReconcilerConfig,
    Result, RetryPolicy,
};

fn parent() -> ParentKey {
    ParentKey::new("arn:aws:sso:::instance/ssoins-1", "arn:aws:sso:::permissionSet/ps-1")
}

fn managed(name: &str) -> PolicyReference {
    PolicyReference::managed(format!("arn:aws:iam::aws:policy/{name}"))
}

fn reconciler_with(
    directory: &InMemoryDirectory,
    kind: PolicyKind,
    config: ReconcilerConfig,
) -> Result<Reconciler<KindService>> {
    Reconciler::builder()
        .with_service(Arc::new(directory.kind(kind)))
        .with_classifier(Arc::new(RemoteError::classifier()))
        .with_config(config)
        .build()
}

fn reconciler(directory: &InMemoryDirectory) -> Result<Reconciler<KindService>> {
    reconciler_with(directory, PolicyKind::Managed, ReconcilerConfig::default())
}

#[tokio::test(start_paused = true)]
async fn attach_detach_then_provision() -> Result<()> {
    let (a, b, c) = (managed("A"), managed("B"), managed("C"));
    let directory = InMemoryDirectory::new();
    directory.seed(&parent(), [b.clone(), c.clone()]);

    let outcome = reconciler(&directory)?
        .reconcile(&parent(), &[a.clone(), b.clone()])
        .await?;

    assert_eq!(outcome.created, vec![a.clone()]);
    assert_eq!(outcome.removed, vec![c.clone()]);
    assert_eq!(outcome.kept, vec![b.clone()]);

    let mutations: Vec<Call> = directory
        .history()
        .into_iter()
        .filter(|call| !matches!(call, Call::List(_) | Call::Describe(_)))
        .collect();
    assert_eq!(
        mutations,
        vec![
            Call::Attach(parent(), a.clone()),
            Call::Detach(parent(), c),
            Call::Trigger(parent()),
        ]
    );

    let snapshot = outcome
        .operation
        .ok_or_else(|| Error::invalid_config("missing provisioning snapshot"))?;
    assert_eq!(snapshot.status, OperationStatus::Succeeded);
    assert!(snapshot.created_at.is_some());

    let mut members = directory.members(&parent());
    members.sort_by_key(ToString::to_string);
    assert_eq!(members, vec![a, b]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn second_run_is_a_no_op() -> Result<()> {
    let directory = InMemoryDirectory::new();
    directory.seed(&parent(), [managed("B"), managed("C")]);
    let reconciler = reconciler(&directory)?;
    let want = [managed("A"), managed("B")];

    reconciler.reconcile(&parent(), &want).await?;
    let before = directory.calls();
    let second = reconciler.reconcile(&parent(), &want).await?;
    let after = directory.calls();

    assert!(second.converged());
    assert_eq!(after.list, before.list.saturating_add(1));
    assert_eq!(after.attach, before.attach);
    assert_eq!(after.detach, before.detach);
    assert_eq!(after.trigger, before.trigger);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn provisioning_failure_carries_remote_reason() -> Result<()> {
    let directory = InMemoryDirectory::new();
    directory.set_plan(ProvisioningPlan::fail_after(2, "account quota exceeded"));

    let result = reconciler(&directory)?
        .reconcile(&parent(), &[managed("A")])
        .await;

    match result {
        Err(Error::ProvisioningFailed {
            failure_reason,
            source,
            ..
        }) => {
            assert_eq!(failure_reason.as_deref(), Some("account quota exceeded"));
            assert!(matches!(
                *source,
                Error::UnexpectedState {
                    status: OperationStatus::Failed,
                    ..
                }
            ));
        }
        other => return Err(Error::invalid_config(format!("unexpected result: {other:?}"))),
    }

    // Mutations are not rolled back.
    assert_eq!(directory.members(&parent()), vec![managed("A")]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stuck_provisioning_times_out() -> Result<()> {
    let directory = InMemoryDirectory::new();
    directory.set_plan(ProvisioningPlan::stuck());
    let mut config = ReconcilerConfig::default();
    config.provisioning = config.provisioning.timeout(Duration::from_secs(60));
    let start = tokio::time::Instant::now();

    let result = reconciler_with(&directory, PolicyKind::Managed, config)?
        .reconcile(&parent(), &[managed("A")])
        .await;

    assert!(result.as_ref().is_err_and(Error::is_timeout));
    assert!(start.elapsed() >= Duration::from_secs(60));
    assert!(start.elapsed() < Duration::from_secs(61));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn invisible_operation_exhausts_not_found_checks() -> Result<()> {
    let directory = InMemoryDirectory::new();
    directory.set_plan(ProvisioningPlan::succeed_after(1).invisible_for(100));
    let mut config = ReconcilerConfig::default();
    config.provisioning = config.provisioning.not_found_checks(2);

    let result = reconciler_with(&directory, PolicyKind::Managed, config)?
        .reconcile(&parent(), &[managed("A")])
        .await;

    match result {
        Err(Error::ProvisioningFailed { source, .. }) => {
            assert!(matches!(*source, Error::NotFound { checks: 3 }));
        }
        other => return Err(Error::invalid_config(format!("unexpected result: {other:?}"))),
    }
    assert_eq!(directory.calls().describe, 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn briefly_invisible_operation_still_succeeds() -> Result<()> {
    let directory = InMemoryDirectory::new();
    directory.set_plan(ProvisioningPlan::succeed_after(1).invisible_for(2));

    let outcome = reconciler(&directory)?
        .reconcile(&parent(), &[managed("A")])
        .await?;

    assert!(outcome.operation.is_some());
    assert_eq!(directory.calls().describe, 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn conflicting_trigger_is_retried() -> Result<()> {
    let directory = InMemoryDirectory::new();
    directory.inject(
        Fault::Trigger,
        [RemoteError::Conflict, RemoteError::Throttling, RemoteError::Conflict],
    );

    let outcome = reconciler(&directory)?
        .reconcile(&parent(), &[managed("A")])
        .await?;

    assert!(outcome.operation.is_some());
    assert_eq!(directory.calls().trigger, 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn trigger_gets_one_last_try_after_the_budget() -> Result<()> {
    let directory = InMemoryDirectory::new();
    directory.inject(Fault::Trigger, std::iter::repeat_n(RemoteError::Conflict, 4));
    let config = ReconcilerConfig {
        retry: RetryPolicy::with_timeout(Duration::from_secs(1))
            .initial_delay(Duration::from_millis(300))
            .max_delay(Duration::from_millis(300)),
        ..Default::default()
    };

    let outcome = reconciler_with(&directory, PolicyKind::Managed, config)?
        .reconcile(&parent(), &[managed("A")])
        .await?;

    // Attempts at 0, 300, 600 and 900ms fail, the budget runs out at
    // 1000ms, and the final attempt goes through.
    assert_eq!(directory.calls().trigger, 5);
    assert!(outcome.operation.is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unbounded_timeouts_from_env_do_not_overflow() -> Result<()> {
    let directory = InMemoryDirectory::new();
    directory.inject(Fault::Trigger, [RemoteError::Throttling]);
    directory.set_plan(ProvisioningPlan::succeed_after(2));
    let config = ReconcilerConfig::default().with_env_overrides(|key| match key {
        "TETHER_PROVISION_TIMEOUT_SECS" | "TETHER_RETRY_TIMEOUT_SECS" => Some(u64::MAX.to_string()),
        _ => None,
    });
    config.validate()?;

    let outcome = reconciler_with(&directory, PolicyKind::Managed, config)?
        .reconcile(&parent(), &[managed("A")])
        .await?;

    let snapshot = outcome
        .operation
        .ok_or_else(|| Error::invalid_config("missing provisioning snapshot"))?;
    assert_eq!(snapshot.status, OperationStatus::Succeeded);
    assert_eq!(directory.calls().trigger, 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn denied_trigger_fails_without_retry() -> Result<()> {
    let directory = InMemoryDirectory::new();
    directory.inject(Fault::Trigger, [RemoteError::AccessDenied]);

    let result = reconciler(&directory)?
        .reconcile(&parent(), &[managed("A")])
        .await;

    assert!(matches!(result, Err(Error::TriggerFailed { .. })));
    assert_eq!(directory.calls().trigger, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_attach_stops_before_detach() -> Result<()> {
    let directory = InMemoryDirectory::new();
    directory.seed(&parent(), [managed("C")]);
    directory.inject(Fault::Attach, [RemoteError::Validation("bad arn".into())]);

    let result = reconciler(&directory)?
        .reconcile(&parent(), &[managed("A")])
        .await;

    assert!(matches!(result, Err(Error::MutationFailed { .. })));
    let calls = directory.calls();
    assert_eq!(calls.detach, 0);
    assert_eq!(calls.trigger, 0);
    assert_eq!(directory.members(&parent()), vec![managed("C")]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn customer_managed_paths_are_normalized() -> Result<()> {
    let directory = InMemoryDirectory::new();
    directory.seed(&parent(), [PolicyReference::customer_managed("Deploy", "/ops/")]);

    let outcome = reconciler_with(&directory, PolicyKind::CustomerManaged, ReconcilerConfig::default())?
        .reconcile(&parent(), &[PolicyReference::customer_managed("Deploy", "ops")])
        .await?;

    assert!(outcome.converged());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn inline_document_whitespace_is_not_a_change() -> Result<()> {
    let directory = InMemoryDirectory::new();
    directory.seed(
        &parent(),
        [PolicyReference::inline(r#"{"Version":"2012-10-17","Statement":[]}"#)],
    );

    let outcome = reconciler_with(&directory, PolicyKind::Inline, ReconcilerConfig::default())?
        .reconcile(
            &parent(),
            &[PolicyReference::inline(
                "{\n  \"Statement\": [],\n  \"Version\": \"2012-10-17\"\n}",
            )],
        )
        .await?;

    assert!(outcome.converged());
    assert_eq!(directory.calls().attach, 0);
    Ok(())
}
