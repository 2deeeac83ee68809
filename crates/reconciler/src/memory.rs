//! In-process simulation of the remote membership service.
//!
//! `InMemoryDirectory` keeps per-parent membership, hands out operation
//! request ids, and advances each operation one step per describe call
//! according to a [`ProvisioningPlan`]. Faults can be queued per call type.
//! Every call is recorded so tests can assert on exact remote traffic.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::equivalence::Equivalent;
use crate::service::{FnClassifier, MembershipService};
use crate::types::{
    OperationHandle, OperationSnapshot, OperationStatus, ParentKey, PolicyKind, PolicyReference,
};

/// Errors reported by the simulated service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("conflicting operation in progress")]
    Conflict,

    #[error("rate exceeded")]
    Throttling,

    #[error("member already attached: {0}")]
    Duplicate(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("access denied")]
    AccessDenied,

    #[error("internal service error")]
    Internal,
}

impl RemoteError {
    /// Classifier matching this error type.
    pub fn classifier() -> FnClassifier<Self> {
        FnClassifier::new(
            |e| matches!(e, Self::ResourceNotFound(_)),
            |e| matches!(e, Self::Conflict),
            |e| matches!(e, Self::Throttling),
        )
    }
}

/// Call types faults can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    List,
    Attach,
    Detach,
    Trigger,
    Describe,
}

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(ParentKey),
    Attach(ParentKey, PolicyReference),
    Detach(ParentKey, PolicyReference),
    Trigger(ParentKey),
    Describe(String),
}

/// Per-type call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list: usize,
    pub attach: usize,
    pub detach: usize,
    pub trigger: usize,
    pub describe: usize,
}

/// How the next provisioning operations evolve, one step per describe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    /// Describes that report the request as unknown.
    #[serde(default)]
    pub invisible_polls: u32,
    /// Describes that report `IN_PROGRESS` after it becomes visible.
    #[serde(default = "default_pending_polls")]
    pub pending_polls: u32,
    /// Failure reason; `None` means the operation succeeds.
    #[serde(default)]
    pub failure_reason: Option<String>,
}

const fn default_pending_polls() -> u32 {
    1
}

impl Default for ProvisioningPlan {
    fn default() -> Self {
        Self {
            invisible_polls: 0,
            pending_polls: default_pending_polls(),
            failure_reason: None,
        }
    }
}

impl ProvisioningPlan {
    /// Succeed after `pending_polls` in-progress reports.
    pub fn succeed_after(pending_polls: u32) -> Self {
        Self {
            pending_polls,
            ..Default::default()
        }
    }

    /// Fail with `reason` after `pending_polls` in-progress reports.
    pub fn fail_after(pending_polls: u32, reason: impl Into<String>) -> Self {
        Self {
            pending_polls,
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Never leave `IN_PROGRESS`.
    pub fn stuck() -> Self {
        Self::succeed_after(u32::MAX)
    }

    /// Hide the request for the first `polls` describes.
    #[must_use]
    pub const fn invisible_for(mut self, polls: u32) -> Self {
        self.invisible_polls = polls;
        self
    }
}

#[derive(Debug)]
struct OperationRecord {
    handle: OperationHandle,
    plan: ProvisioningPlan,
    describes: u32,
    created_at: chrono::DateTime<Utc>,
}

impl OperationRecord {
    fn step(&mut self) -> Option<OperationSnapshot> {
        self.describes = self.describes.saturating_add(1);
        let visible_after = self.plan.invisible_polls;
        if self.describes <= visible_after {
            return None;
        }

        let seen = self.describes.saturating_sub(visible_after);
        let snapshot = if seen <= self.plan.pending_polls {
            OperationSnapshot::new(self.handle.clone(), OperationStatus::InProgress)
        } else {
            match &self.plan.failure_reason {
                Some(reason) => {
                    OperationSnapshot::new(self.handle.clone(), OperationStatus::Failed)
                        .with_failure_reason(reason.clone())
                }
                None => OperationSnapshot::new(self.handle.clone(), OperationStatus::Succeeded),
            }
        };
        Some(snapshot.with_created_at(self.created_at))
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    members: HashMap<ParentKey, Vec<PolicyReference>>,
    operations: HashMap<String, OperationRecord>,
    faults: HashMap<Fault, VecDeque<RemoteError>>,
    plan: ProvisioningPlan,
    history: Vec<Call>,
}

impl DirectoryState {
    fn record(&mut self, call: Call, fault: Fault) -> Result<(), RemoteError> {
        self.history.push(call);
        match self.faults.get_mut(&fault).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Simulated remote service shared by all membership kinds.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A membership service for one kind.
    pub fn kind(&self, kind: PolicyKind) -> KindService {
        KindService {
            directory: self.clone(),
            kind,
        }
    }

    /// Add members to `parent` directly, bypassing faults and history.
    pub fn seed(&self, parent: &ParentKey, items: impl IntoIterator<Item = PolicyReference>) {
        self.lock()
            .members
            .entry(parent.clone())
            .or_default()
            .extend(items);
    }

    /// Current members of `parent`, across all kinds.
    pub fn members(&self, parent: &ParentKey) -> Vec<PolicyReference> {
        self.lock().members.get(parent).cloned().unwrap_or_default()
    }

    /// Queue errors to be returned by the next calls of one type.
    pub fn inject(&self, fault: Fault, errors: impl IntoIterator<Item = RemoteError>) {
        self.lock().faults.entry(fault).or_default().extend(errors);
    }

    /// Plan used by operations started from now on.
    pub fn set_plan(&self, plan: ProvisioningPlan) {
        self.lock().plan = plan;
    }

    /// Every call made so far, in order.
    pub fn history(&self) -> Vec<Call> {
        self.lock().history.clone()
    }

    /// Call counts by type.
    pub fn calls(&self) -> CallCounts {
        self.lock()
            .history
            .iter()
            .fold(CallCounts::default(), |mut counts, call| {
                let slot = match call {
                    Call::List(_) => &mut counts.list,
                    Call::Attach(..) => &mut counts.attach,
                    Call::Detach(..) => &mut counts.detach,
                    Call::Trigger(_) => &mut counts.trigger,
                    Call::Describe(_) => &mut counts.describe,
                };
                *slot = slot.saturating_add(1);
                counts
            })
    }
}

/// View of an [`InMemoryDirectory`] restricted to one membership kind.
#[derive(Debug, Clone)]
pub struct KindService {
    directory: InMemoryDirectory,
    kind: PolicyKind,
}

impl KindService {
    fn check_kind(&self, item: &PolicyReference) -> Result<(), RemoteError> {
        if item.kind() == self.kind {
            Ok(())
        } else {
            Err(RemoteError::Validation(format!(
                "{} policy sent to the {} endpoint",
                item.kind(),
                self.kind
            )))
        }
    }
}

#[async_trait]
impl MembershipService for KindService {
    type Item = PolicyReference;
    type Error = RemoteError;

    fn kind(&self) -> PolicyKind {
        self.kind
    }

    fn item_kind(&self, item: &PolicyReference) -> PolicyKind {
        item.kind()
    }

    async fn list_membership(&self, parent: &ParentKey) -> Result<Vec<PolicyReference>, RemoteError> {
        let mut state = self.directory.lock();
        state.record(Call::List(parent.clone()), Fault::List)?;
        Ok(state
            .members
            .get(parent)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.kind() == self.kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn attach(&self, parent: &ParentKey, item: &PolicyReference) -> Result<(), RemoteError> {
        let mut state = self.directory.lock();
        state.record(Call::Attach(parent.clone(), item.clone()), Fault::Attach)?;
        self.check_kind(item)?;

        let members = state.members.entry(parent.clone()).or_default();
        if self.kind.is_single_membership() {
            members.retain(|existing| existing.kind() != self.kind);
        } else if members.iter().any(|existing| existing.equivalent(item)) {
            return Err(RemoteError::Duplicate(item.to_string()));
        }
        members.push(item.clone());
        Ok(())
    }

    async fn detach(&self, parent: &ParentKey, item: &PolicyReference) -> Result<(), RemoteError> {
        let mut state = self.directory.lock();
        state.record(Call::Detach(parent.clone(), item.clone()), Fault::Detach)?;
        self.check_kind(item)?;

        let members = state.members.entry(parent.clone()).or_default();
        let before = members.len();
        if self.kind.is_single_membership() {
            members.retain(|existing| existing.kind() != self.kind);
        } else {
            members.retain(|existing| !existing.equivalent(item));
        }
        if members.len() == before {
            return Err(RemoteError::ResourceNotFound(item.to_string()));
        }
        Ok(())
    }

    async fn trigger_provisioning(&self, parent: &ParentKey) -> Result<OperationHandle, RemoteError> {
        let mut state = self.directory.lock();
        state.record(Call::Trigger(parent.clone()), Fault::Trigger)?;

        let handle = OperationHandle::new(parent.clone(), Ulid::new().to_string());
        let record = OperationRecord {
            handle: handle.clone(),
            plan: state.plan.clone(),
            describes: 0,
            created_at: Utc::now(),
        };
        state.operations.insert(handle.request_id.clone(), record);
        Ok(handle)
    }

    async fn describe_operation(
        &self,
        handle: &OperationHandle,
    ) -> Result<Option<OperationSnapshot>, RemoteError> {
        let mut state = self.directory.lock();
        state.record(Call::Describe(handle.request_id.clone()), Fault::Describe)?;
        Ok(state
            .operations
            .get_mut(&handle.request_id)
            .and_then(OperationRecord::step))
    }
}
