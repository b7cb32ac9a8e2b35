//! Approval engine: the command pipeline of the requisition workflow.
//!
//! ```text
//! command
//!   ↓
//! 1. authenticate + authorize the actor (tenant-scoped permissions)
//!   ↓
//! 2. load the requisition and replay its ledger
//!   ↓
//! 3. resolve approvers from the org chart
//!   ↓
//! 4. decide events (pure, no mutation)
//!   ↓
//! 5. append to the ledger (optimistic, exact version)
//!   ↓
//! 6. write the requisition status cache, publish to the bus
//!   ↓
//! status view
//! ```
//!
//! Operations on one requisition are serialized in-process by a per-requisition
//! lock. Writers in other processes are caught by the ledger's version check;
//! a lost race is retried from step 1 a bounded number of times.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::instrument;

use procura_approvals::{
    ApprovalCommand, ApprovalHistoryEntry, ApprovalInstance, ApprovalInstanceId, ApprovalWorkflow,
    Cancel, Decide, DecisionOutcome, Requisition, RequisitionId, RequisitionStatus,
    ResolvedApprovers, ReturnToStage, StatusView, Submit,
};
use procura_auth::Permission;
use procura_core::{Aggregate, ExpectedVersion, TenantId, UserId};
use procura_events::{EventBus, EventEnvelope};

use crate::config::{Settings, WorkflowConfig};
use crate::directory::Directory;
use crate::error::WorkflowError;
use crate::event_store::{EventStore, StoredEvent};
use crate::ledger::{ApprovalLedger, LoadedWorkflow};
use crate::permission_store::PermissionStore;
use crate::projector::StatusProjector;
use crate::requisitions::RequisitionRepository;
use crate::resolver::ApproverResolver;

type LockKey = (TenantId, RequisitionId);

/// One async mutex per requisition, created on demand.
#[derive(Debug, Default)]
struct RequisitionLocks {
    inner: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl RequisitionLocks {
    async fn acquire(&self, key: LockKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // Only the map holds an idle lock.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct ApprovalEngine<S, R, D, B> {
    ledger: Arc<ApprovalLedger<S>>,
    requisitions: Arc<R>,
    permissions: PermissionStore<Arc<D>>,
    resolver: Arc<ApproverResolver<Arc<D>>>,
    projector: StatusProjector<S, R, Arc<D>>,
    bus: B,
    workflow: WorkflowConfig,
    locks: RequisitionLocks,
}

impl<S, R, D, B> ApprovalEngine<S, R, D, B>
where
    S: EventStore,
    R: RequisitionRepository,
    D: Directory,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, requisitions: R, directory: D, bus: B, settings: &Settings) -> Self {
        let ledger = Arc::new(ApprovalLedger::new(store));
        let requisitions = Arc::new(requisitions);
        let directory = Arc::new(directory);
        let resolver = Arc::new(ApproverResolver::new(
            directory.clone(),
            settings.workflow.stages.clone(),
        ));
        let projector = StatusProjector::new(
            ledger.clone(),
            requisitions.clone(),
            resolver.clone(),
            settings.workflow.approver_resolution,
        );

        Self {
            ledger,
            requisitions,
            permissions: PermissionStore::new(directory, &settings.permissions),
            resolver,
            projector,
            bus,
            workflow: settings.workflow.clone(),
            locks: RequisitionLocks::default(),
        }
    }

    pub fn permissions(&self) -> &PermissionStore<Arc<D>> {
        &self.permissions
    }

    pub fn resolver(&self) -> &ApproverResolver<Arc<D>> {
        &self.resolver
    }

    pub fn ledger(&self) -> &ApprovalLedger<S> {
        &self.ledger
    }

    /// Start a new approval instance for a draft or returned requisition.
    #[instrument(skip(self), fields(%tenant_id, %requisition_id, %actor))]
    pub async fn submit(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
        actor: UserId,
    ) -> Result<StatusView, WorkflowError> {
        let _guard = self.locks.acquire((tenant_id, requisition_id)).await;
        self.with_retries(move || self.try_submit(tenant_id, requisition_id, actor))
            .await
    }

    /// Approve or reject the current stage.
    #[instrument(skip(self, comments), fields(%tenant_id, %requisition_id, %actor, ?outcome))]
    pub async fn decide(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
        actor: UserId,
        outcome: DecisionOutcome,
        comments: Option<String>,
    ) -> Result<StatusView, WorkflowError> {
        // The stage the caller is looking at, fixed before queueing on the lock.
        let target = self
            .ledger
            .load(tenant_id, requisition_id)
            .await
            .inspect_err(log_failure)?
            .workflow
            .active_instance()
            .and_then(DecisionTarget::of);

        let _guard = self.locks.acquire((tenant_id, requisition_id)).await;
        self.with_retries(move || {
            self.try_decide(tenant_id, requisition_id, actor, outcome, target, comments.clone())
        })
        .await
    }

    /// Approve or reject stage `stage_order` of the approval in progress.
    ///
    /// Fails with `InvalidTransition` once that stage is no longer current, so a
    /// repeated request never carries over to the following stage.
    #[instrument(skip(self, comments), fields(%tenant_id, %requisition_id, %actor, ?outcome))]
    pub async fn decide_stage(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
        actor: UserId,
        stage_order: u32,
        outcome: DecisionOutcome,
        comments: Option<String>,
    ) -> Result<StatusView, WorkflowError> {
        let target = Some(DecisionTarget {
            instance_id: None,
            stage_order,
        });

        let _guard = self.locks.acquire((tenant_id, requisition_id)).await;
        self.with_retries(move || {
            self.try_decide(tenant_id, requisition_id, actor, outcome, target, comments.clone())
        })
        .await
    }

    /// Send the approval back to an earlier stage of the same instance.
    #[instrument(skip(self, comments), fields(%tenant_id, %requisition_id, %actor))]
    pub async fn return_to_stage(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
        actor: UserId,
        to_stage_order: u32,
        comments: Option<String>,
    ) -> Result<StatusView, WorkflowError> {
        let _guard = self.locks.acquire((tenant_id, requisition_id)).await;
        self.with_retries(move || {
            self.try_return(tenant_id, requisition_id, actor, to_stage_order, comments.clone())
        })
        .await
    }

    /// Cancel the requisition and any approval in progress.
    #[instrument(skip(self, comments), fields(%tenant_id, %requisition_id, %actor))]
    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
        actor: UserId,
        comments: Option<String>,
    ) -> Result<StatusView, WorkflowError> {
        let _guard = self.locks.acquire((tenant_id, requisition_id)).await;
        self.with_retries(move || {
            self.try_cancel(tenant_id, requisition_id, actor, comments.clone())
        })
        .await
    }

    pub async fn get_status(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
    ) -> Result<StatusView, WorkflowError> {
        self.projector
            .get_approval_status(tenant_id, requisition_id)
            .await
    }

    /// Whether `user_id` holds the permission `code` within the tenant.
    pub async fn authorize(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        code: &str,
    ) -> Result<bool, WorkflowError> {
        self.permissions
            .authorize(user_id, tenant_id, &Permission::new(code.to_string()))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Attempts
    // ─────────────────────────────────────────────────────────────────────

    async fn try_submit(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
        actor: UserId,
    ) -> Result<StatusView, WorkflowError> {
        self.permissions
            .require(actor, tenant_id, &Permission::PR_SUBMIT)
            .await?;
        let (requisition, loaded) = self.load(tenant_id, requisition_id).await?;

        let stages = self.resolver.plan_for(&requisition);
        let first_stage_approvers = match stages.first() {
            Some(first) => self.resolver.resolve_approvers(&requisition, first).await?,
            None => ResolvedApprovers::none(),
        };

        let command = ApprovalCommand::Submit(Submit {
            tenant_id,
            requisition_id,
            instance_id: ApprovalInstanceId::generate(),
            actor,
            requisition_status: effective_status(&requisition, &loaded.workflow),
            stages,
            first_stage_approvers,
            occurred_at: Utc::now(),
        });

        self.commit(&requisition, loaded, command).await
    }

    async fn try_decide(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
        actor: UserId,
        outcome: DecisionOutcome,
        target: Option<DecisionTarget>,
        comments: Option<String>,
    ) -> Result<StatusView, WorkflowError> {
        self.permissions
            .require(actor, tenant_id, &Permission::PR_APPROVE)
            .await?;
        let (requisition, loaded) = self.load(tenant_id, requisition_id).await?;

        let mut current_approvers = ResolvedApprovers::none();
        let mut next_stage_approvers = None;
        if let Some(instance) = loaded.workflow.active_instance() {
            if let Some(target) = target {
                target.check(instance)?;
            }
            if let Some(stage) = instance.current_stage() {
                current_approvers = self.projector.stage_approvers(&requisition, stage).await?;
            }
            // The next stage is always entered with its live approver set.
            if let (DecisionOutcome::Approve, Some(next)) = (outcome, instance.next_stage()) {
                next_stage_approvers = Some(
                    self.resolver
                        .resolve_approvers(&requisition, &next.planned())
                        .await?,
                );
            }
        }

        let command = ApprovalCommand::Decide(Decide {
            tenant_id,
            requisition_id,
            actor,
            outcome,
            comments,
            current_approvers,
            next_stage_approvers,
            occurred_at: Utc::now(),
        });

        self.commit(&requisition, loaded, command).await
    }

    async fn try_return(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
        actor: UserId,
        to_stage_order: u32,
        comments: Option<String>,
    ) -> Result<StatusView, WorkflowError> {
        self.permissions
            .require(actor, tenant_id, &Permission::PR_APPROVE)
            .await?;
        let (requisition, loaded) = self.load(tenant_id, requisition_id).await?;

        let mut current_approvers = ResolvedApprovers::none();
        let mut target_approvers = ResolvedApprovers::none();
        if let Some(instance) = loaded.workflow.active_instance() {
            if let Some(stage) = instance.current_stage() {
                current_approvers = self.projector.stage_approvers(&requisition, stage).await?;
            }
            if let Some(target) = instance.stage(to_stage_order) {
                target_approvers = self
                    .resolver
                    .resolve_approvers(&requisition, &target.planned())
                    .await?;
            }
        }

        let command = ApprovalCommand::ReturnToStage(ReturnToStage {
            tenant_id,
            requisition_id,
            actor,
            to_stage_order,
            comments,
            current_approvers,
            target_approvers,
            occurred_at: Utc::now(),
        });

        self.commit(&requisition, loaded, command).await
    }

    async fn try_cancel(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
        actor: UserId,
        comments: Option<String>,
    ) -> Result<StatusView, WorkflowError> {
        let principal = self.permissions.principal(actor, tenant_id).await?;
        let (requisition, loaded) = self.load(tenant_id, requisition_id).await?;

        // Creators may always withdraw their own requisition.
        if requisition.created_by != actor {
            procura_auth::authorize(&principal, tenant_id, &Permission::PR_CANCEL)?;
        }

        let command = ApprovalCommand::Cancel(Cancel {
            tenant_id,
            requisition_id,
            actor,
            requisition_status: effective_status(&requisition, &loaded.workflow),
            comments,
            occurred_at: Utc::now(),
        });

        self.commit(&requisition, loaded, command).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Pipeline
    // ─────────────────────────────────────────────────────────────────────

    async fn with_retries<F, Fut>(&self, mut attempt: F) -> Result<StatusView, WorkflowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<StatusView, WorkflowError>>,
    {
        let mut retries = 0u32;
        loop {
            match attempt().await {
                Err(e) if e.is_retryable() && retries < self.workflow.max_conflict_retries => {
                    retries += 1;
                    tracing::debug!(retries, error = %e, "lost a concurrent write, retrying");
                }
                Err(e) => {
                    log_failure(&e);
                    return Err(e);
                }
                ok => return ok,
            }
        }
    }

    async fn load(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
    ) -> Result<(Requisition, LoadedWorkflow), WorkflowError> {
        let requisition = self
            .requisitions
            .get(tenant_id, requisition_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("requisition"))?;
        let loaded = self.ledger.load(tenant_id, requisition_id).await?;
        Ok((requisition, loaded))
    }

    async fn commit(
        &self,
        requisition: &Requisition,
        mut loaded: LoadedWorkflow,
        command: ApprovalCommand,
    ) -> Result<StatusView, WorkflowError> {
        let events = loaded.workflow.handle(&command)?;
        if events.is_empty() {
            return self.projector.project(requisition, &loaded).await;
        }

        let stored = self
            .ledger
            .append(
                requisition.tenant_id,
                requisition.id,
                ExpectedVersion::Exact(loaded.version()),
                &events,
            )
            .await?;

        for (entry, event) in stored.iter().zip(&events) {
            loaded
                .history
                .push(ApprovalHistoryEntry::from_event(entry.sequence_number, event));
            loaded.workflow.apply(event);
        }

        self.record_status(requisition, &loaded.workflow).await;
        self.publish(&stored);

        self.projector.project(requisition, &loaded).await
    }

    /// Mirror the ledger onto the requisition row. The ledger entry is already
    /// durable, so a failure here is logged rather than returned; the next
    /// accepted transition rewrites the row.
    async fn record_status(&self, requisition: &Requisition, workflow: &ApprovalWorkflow) {
        let Some(status) = workflow.status() else {
            return;
        };
        let instance_id = workflow.instance().map(|i| i.id);
        let attempts = self.workflow.status_write_retries.max(1);

        for attempt in 1..=attempts {
            match self
                .requisitions
                .set_workflow_state(requisition.tenant_id, requisition.id, status, instance_id)
                .await
            {
                Ok(true) => return,
                Ok(false) => {
                    tracing::warn!(
                        requisition_id = %requisition.id,
                        "requisition disappeared before its status was recorded"
                    );
                    return;
                }
                Err(e) => tracing::warn!(attempt, error = %e, "requisition status write failed"),
            }
        }

        tracing::error!(
            requisition_id = %requisition.id,
            %status,
            "requisition status out of sync with the approval ledger"
        );
    }

    fn publish(&self, stored: &[StoredEvent]) {
        for event in stored {
            if let Err(e) = self.bus.publish(event.to_envelope()) {
                tracing::warn!(
                    error = ?e,
                    event_type = %event.event_type,
                    sequence = event.sequence_number,
                    "event publication failed"
                );
            }
        }
    }
}

/// The stage a decision was aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DecisionTarget {
    instance_id: Option<ApprovalInstanceId>,
    stage_order: u32,
}

impl DecisionTarget {
    fn of(instance: &ApprovalInstance) -> Option<Self> {
        instance.current_stage().map(|stage| Self {
            instance_id: Some(instance.id),
            stage_order: stage.order,
        })
    }

    fn check(&self, instance: &ApprovalInstance) -> Result<(), WorkflowError> {
        let same_instance = self.instance_id.is_none_or(|id| id == instance.id);
        let current = instance.current_stage().map(|stage| stage.order);
        if same_instance && current == Some(self.stage_order) {
            return Ok(());
        }
        Err(WorkflowError::InvalidTransition(format!(
            "stage {} is no longer awaiting a decision",
            self.stage_order
        )))
    }
}

/// Requisition status as the workflow sees it.
///
/// Draft and Returned rows are authoritative because the CRUD surface may
/// reopen a closed requisition; otherwise the ledger wins over a stale row.
fn effective_status(requisition: &Requisition, workflow: &ApprovalWorkflow) -> RequisitionStatus {
    if requisition.status.accepts_submission() && workflow.active_instance().is_none() {
        return requisition.status;
    }
    workflow.status().unwrap_or(requisition.status)
}

fn log_failure(error: &WorkflowError) {
    match error {
        WorkflowError::Storage(_) | WorkflowError::Configuration(_) => {
            tracing::error!(error = %error, "approval operation failed");
        }
        WorkflowError::ConcurrentModification(_) => {
            tracing::warn!(error = %error, "approval operation gave up after repeated conflicts");
        }
        _ => tracing::debug!(kind = error.kind(), error = %error, "approval operation rejected"),
    }
}
