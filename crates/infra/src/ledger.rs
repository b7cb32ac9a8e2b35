//! Append-only approval ledger.
//!
//! The ledger of a requisition is its event stream. Every stored event is one
//! history entry, and its sequence number doubles as the optimistic
//! concurrency token of the workflow aggregate.

use uuid::Uuid;

use procura_approvals::{ApprovalEvent, ApprovalHistoryEntry, ApprovalWorkflow, RequisitionId};
use procura_core::{Aggregate, AggregateRoot, ExpectedVersion, TenantId};

use crate::error::WorkflowError;
use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

pub const AGGREGATE_TYPE: &str = "approvals.requisition";

/// Rehydrated workflow plus the entries it was rebuilt from.
#[derive(Debug, Clone)]
pub struct LoadedWorkflow {
    pub workflow: ApprovalWorkflow,
    pub history: Vec<ApprovalHistoryEntry>,
}

impl LoadedWorkflow {
    /// Stream version the next append must expect.
    pub fn version(&self) -> u64 {
        self.workflow.version()
    }
}

#[derive(Debug)]
pub struct ApprovalLedger<S> {
    store: S,
}

impl<S> ApprovalLedger<S>
where
    S: EventStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Load, validate and replay the stream of a requisition.
    pub async fn load(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
    ) -> Result<LoadedWorkflow, WorkflowError> {
        let stream = self.store.load_stream(tenant_id, requisition_id.0).await?;
        validate_loaded_stream(tenant_id, requisition_id, &stream)?;

        let mut workflow = ApprovalWorkflow::empty(requisition_id);
        let mut history = Vec::with_capacity(stream.len());
        for stored in &stream {
            let event = decode(stored)?;
            history.push(ApprovalHistoryEntry::from_event(stored.sequence_number, &event));
            workflow.apply(&event);
        }

        Ok(LoadedWorkflow { workflow, history })
    }

    /// Append entries atomically; fails with `ConcurrentModification` when the
    /// stream moved past `expected`.
    pub async fn append(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
        expected: ExpectedVersion,
        events: &[ApprovalEvent],
    ) -> Result<Vec<StoredEvent>, WorkflowError> {
        let uncommitted = events
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    requisition_id.0,
                    AGGREGATE_TYPE,
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self.store.append(uncommitted, expected).await?)
    }

    /// History of a requisition in sequence order.
    pub async fn list_for(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
    ) -> Result<Vec<ApprovalHistoryEntry>, WorkflowError> {
        Ok(self.load(tenant_id, requisition_id).await?.history)
    }
}

pub(crate) fn decode(stored: &StoredEvent) -> Result<ApprovalEvent, WorkflowError> {
    serde_json::from_value(stored.payload.clone()).map_err(|e| {
        WorkflowError::Storage(format!(
            "undecodable ledger entry {} ({}): {e}",
            stored.sequence_number, stored.event_type
        ))
    })
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    requisition_id: RequisitionId,
    stream: &[StoredEvent],
) -> Result<(), WorkflowError> {
    // A buggy backend must never leak another tenant's entries.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id || e.aggregate_id != requisition_id.0 {
            return Err(EventStoreError::TenantIsolation(format!(
                "loaded stream contains a foreign entry at index {idx}"
            ))
            .into());
        }
        if e.aggregate_type != AGGREGATE_TYPE {
            return Err(EventStoreError::AggregateTypeMismatch(e.aggregate_type.clone()).into());
        }
        if e.sequence_number <= last {
            return Err(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))
            .into());
        }
        last = e.sequence_number;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use chrono::Utc;
    use procura_approvals::{
        ActionType, ApprovalCommand, ApproverRule, Cancel, PlannedStage, RequisitionStatus,
        ResolvedApprovers, Submit, ApprovalInstanceId,
    };
    use procura_core::{AggregateId, UserId};

    /// Backend that answers every read with the owner tenant's stream.
    struct LeakyStore {
        inner: InMemoryEventStore,
        owner: TenantId,
    }

    #[async_trait::async_trait]
    impl EventStore for LeakyStore {
        async fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.append(events, expected_version).await
        }

        async fn load_stream(
            &self,
            _tenant_id: TenantId,
            aggregate_id: AggregateId,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(self.owner, aggregate_id).await
        }
    }

    fn submit(
        tenant: TenantId,
        req: RequisitionId,
        actor: UserId,
        approver: UserId,
    ) -> ApprovalCommand {
        ApprovalCommand::Submit(Submit {
            tenant_id: tenant,
            requisition_id: req,
            instance_id: ApprovalInstanceId::generate(),
            actor,
            requisition_status: RequisitionStatus::Draft,
            stages: vec![PlannedStage {
                order: 0,
                name: "CostCenter".into(),
                rules: vec![ApproverRule::CostCenterHead],
            }],
            first_stage_approvers: ResolvedApprovers::by_rule(
                ApproverRule::CostCenterHead,
                [approver],
            ),
            occurred_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn appended_entries_come_back_in_order() {
        let ledger = ApprovalLedger::new(InMemoryEventStore::new());
        let (tenant, req, actor) = (TenantId::new(), RequisitionId::generate(), UserId::new());

        let empty = ledger.load(tenant, req).await.unwrap();
        let events = empty.workflow.handle(&submit(tenant, req, actor, UserId::new())).unwrap();
        ledger
            .append(tenant, req, ExpectedVersion::Exact(empty.version()), &events)
            .await
            .unwrap();

        let loaded = ledger.load(tenant, req).await.unwrap();
        let cancel = ApprovalCommand::Cancel(Cancel {
            tenant_id: tenant,
            requisition_id: req,
            actor,
            requisition_status: RequisitionStatus::InProgress,
            comments: Some("no longer needed".into()),
            occurred_at: Utc::now(),
        });
        let events = loaded.workflow.handle(&cancel).unwrap();
        ledger
            .append(tenant, req, ExpectedVersion::Exact(loaded.version()), &events)
            .await
            .unwrap();

        let history = ledger.list_for(tenant, req).await.unwrap();
        let kinds: Vec<_> = history.iter().map(|e| (e.sequence, e.action_type)).collect();
        assert_eq!(kinds, vec![(1, ActionType::Submitted), (2, ActionType::Cancelled)]);
        assert_eq!(history[1].status_to, RequisitionStatus::Cancelled);
        assert!(ledger.list_for(TenantId::new(), req).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_version_is_a_concurrent_modification() {
        let ledger = ApprovalLedger::new(InMemoryEventStore::new());
        let (tenant, req, actor) = (TenantId::new(), RequisitionId::generate(), UserId::new());

        let empty = ledger.load(tenant, req).await.unwrap();
        let events = empty.workflow.handle(&submit(tenant, req, actor, actor)).unwrap();
        ledger
            .append(tenant, req, ExpectedVersion::Exact(0), &events)
            .await
            .unwrap();

        let err = ledger
            .append(tenant, req, ExpectedVersion::Exact(0), &events)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(ledger.list_for(tenant, req).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn foreign_entries_from_the_backend_are_a_storage_failure() {
        let (owner, other, actor) = (TenantId::new(), TenantId::new(), UserId::new());
        let req = RequisitionId::generate();
        let ledger = ApprovalLedger::new(LeakyStore {
            inner: InMemoryEventStore::new(),
            owner,
        });

        let empty = ApprovalWorkflow::empty(req);
        let events = empty.handle(&submit(owner, req, actor, actor)).unwrap();
        ledger
            .append(owner, req, ExpectedVersion::Exact(0), &events)
            .await
            .unwrap();

        let err = ledger.load(other, req).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Storage(_)));
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.to_body().message, "internal server error");
    }
}
