//! Operation poller.
//!
//! Blocks until a refreshed status reaches one of the target statuses, the
//! wall-clock timeout passes, the refresh fails, or the caller cancels.
//!
//! Timing is flat: the first refresh happens after `delay`, every later one
//! after `min_timeout`. There is no backoff between refreshes.

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::{deadline_after, PollSettings};
use crate::error::{Error, Result};
use crate::service::MembershipService;
use crate::types::{OperationHandle, OperationSnapshot, OperationStatus};

/// A refreshed object together with its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed<T> {
    pub object: T,
    pub status: OperationStatus,
}

/// Source of fresh observations for the poller.
#[async_trait]
pub trait Refresh: Send + Sync {
    type Object: Clone + Send + Sync;

    /// Fetch the current state. `Ok(None)` means nothing is known yet.
    async fn refresh(&self) -> Result<Option<Observed<Self::Object>>>;
}

/// Refresh that describes one operation through a membership service.
pub struct OperationRefresh<'a, S> {
    service: &'a S,
    handle: OperationHandle,
}

impl<'a, S> OperationRefresh<'a, S>
where
    S: MembershipService,
{
    pub const fn new(service: &'a S, handle: OperationHandle) -> Self {
        Self { service, handle }
    }
}

#[async_trait]
impl<'a, S> Refresh for OperationRefresh<'a, S>
where
    S: MembershipService,
{
    type Object = OperationSnapshot;

    async fn refresh(&self) -> Result<Option<Observed<OperationSnapshot>>> {
        let snapshot = self
            .service
            .describe_operation(&self.handle)
            .await
            .map_err(|e| Error::RefreshFailed {
                request_id: self.handle.request_id.clone(),
                source: Box::new(e),
            })?;

        Ok(snapshot.map(|s| Observed {
            status: s.status.clone(),
            object: s,
        }))
    }
}

/// What to wait for and how.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Statuses meaning "keep waiting".
    pub pending: Vec<OperationStatus>,
    /// Statuses meaning "done".
    pub target: Vec<OperationStatus>,
    pub settings: PollSettings,
}

impl WaitConfig {
    /// Wait for `target` while any of `pending` is reported.
    pub fn new(
        pending: impl IntoIterator<Item = OperationStatus>,
        target: impl IntoIterator<Item = OperationStatus>,
        settings: PollSettings,
    ) -> Self {
        Self {
            pending: pending.into_iter().collect(),
            target: target.into_iter().collect(),
            settings,
        }
    }

    /// `InProgress` until `Succeeded`.
    pub fn provisioning(settings: PollSettings) -> Self {
        Self::new(
            [OperationStatus::InProgress],
            [OperationStatus::Succeeded],
            settings,
        )
    }

    fn expected(&self) -> String {
        OperationStatus::join(&self.target)
    }
}

/// A failed wait, with the last object observed before it failed.
#[derive(Debug)]
pub struct WaitFailure<T> {
    pub error: Error,
    pub last: Option<T>,
}

impl<T> WaitFailure<T> {
    const fn new(error: Error, last: Option<T>) -> Self {
        Self { error, last }
    }
}

impl<T> From<WaitFailure<T>> for Error {
    fn from(failure: WaitFailure<T>) -> Self {
        failure.error
    }
}

/// Per-call poll state. Created when the wait starts and dropped with it.
struct PollState<T> {
    deadline: Instant,
    refreshes: u32,
    not_found: u32,
    targets_seen: u32,
    last: Option<T>,
    last_status: Option<OperationStatus>,
}

impl<T> PollState<T> {
    fn timeout(self, config: &WaitConfig, last_error: Option<String>) -> WaitFailure<T> {
        WaitFailure::new(
            Error::Timeout {
                expected: config.expected(),
                last_status: self.last_status,
                timeout: config.settings.timeout,
                last_error,
            },
            self.last,
        )
    }
}

/// Poll `refresh` until a target status is reached.
pub async fn wait_for_state<R>(
    config: &WaitConfig,
    refresh: &R,
    cancel: &CancelToken,
) -> std::result::Result<R::Object, WaitFailure<R::Object>>
where
    R: Refresh + ?Sized,
{
    let start = Instant::now();
    let settings = &config.settings;
    let mut state = PollState {
        deadline: deadline_after(start, settings.timeout),
        refreshes: 0,
        not_found: 0,
        targets_seen: 0,
        last: None,
        last_status: None,
    };
    let mut wait = settings.delay;

    loop {
        let wake = state.deadline.min(deadline_after(Instant::now(), wait));
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(refreshes = state.refreshes, "Wait cancelled");
                return Err(WaitFailure::new(Error::Cancelled, state.last));
            }
            () = tokio::time::sleep_until(wake) => {}
        }

        if Instant::now() >= state.deadline {
            warn!(
                refreshes = state.refreshes,
                timeout_secs = settings.timeout.as_secs(),
                "Wait timed out"
            );
            return Err(state.timeout(config, None));
        }

        wait = settings.min_timeout;
        state.refreshes = state.refreshes.saturating_add(1);

        let refreshed = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(refreshes = state.refreshes, "Wait cancelled during refresh");
                return Err(WaitFailure::new(Error::Cancelled, state.last));
            }
            r = tokio::time::timeout_at(state.deadline, refresh.refresh()) => r,
        };

        let observed = match refreshed {
            Err(_) => {
                warn!(refreshes = state.refreshes, "Refresh still running at deadline");
                return Err(state.timeout(
                    config,
                    Some("refresh did not complete before the deadline".to_string()),
                ));
            }
            Ok(Err(e)) => {
                warn!(refreshes = state.refreshes, error = %e, "Refresh failed");
                return Err(WaitFailure::new(e, state.last));
            }
            Ok(Ok(observed)) => observed,
        };

        let Some(Observed { object, status }) =
            observed.filter(|o| o.status.is_recognized())
        else {
            state.not_found = state.not_found.saturating_add(1);
            state.targets_seen = 0;
            debug!(
                refreshes = state.refreshes,
                not_found = state.not_found,
                "Operation not found yet"
            );
            if state.not_found > settings.not_found_checks {
                return Err(WaitFailure::new(
                    Error::NotFound {
                        checks: state.not_found,
                    },
                    state.last,
                ));
            }
            continue;
        };

        state.not_found = 0;
        state.last = Some(object.clone());
        state.last_status = Some(status.clone());

        if config.target.contains(&status) {
            state.targets_seen = state.targets_seen.saturating_add(1);
            if state.targets_seen >= settings.continuous_target_occurrence {
                debug!(
                    refreshes = state.refreshes,
                    %status,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Target state reached"
                );
                return Ok(object);
            }
            continue;
        }

        state.targets_seen = 0;
        if config.pending.contains(&status) {
            debug!(refreshes = state.refreshes, %status, "Still pending");
            continue;
        }

        warn!(refreshes = state.refreshes, %status, "Unexpected state");
        return Err(WaitFailure::new(
            Error::UnexpectedState {
                status,
                expected: config.expected(),
            },
            state.last,
        ));
    }
}
