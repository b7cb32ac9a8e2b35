//! Requisition records as seen by the approval engine.

use std::sync::Arc;

use procura_approvals::{ApprovalInstanceId, Requisition, RequisitionId, RequisitionStatus};
use procura_core::TenantId;

use crate::error::StoreError;
use crate::read_model::{InMemoryTenantStore, TenantStore};

/// Requisition read/write boundary.
///
/// The engine writes only the workflow fields; items and routing belong to
/// the CRUD surface.
#[async_trait::async_trait]
pub trait RequisitionRepository: Send + Sync {
    async fn get(
        &self,
        tenant_id: TenantId,
        id: RequisitionId,
    ) -> Result<Option<Requisition>, StoreError>;

    /// Record the workflow status cache and the active instance id.
    /// Returns `false` when the requisition does not exist in the tenant.
    async fn set_workflow_state(
        &self,
        tenant_id: TenantId,
        id: RequisitionId,
        status: RequisitionStatus,
        approval_instance_id: Option<ApprovalInstanceId>,
    ) -> Result<bool, StoreError>;
}

#[async_trait::async_trait]
impl<R> RequisitionRepository for Arc<R>
where
    R: RequisitionRepository + ?Sized,
{
    async fn get(
        &self,
        tenant_id: TenantId,
        id: RequisitionId,
    ) -> Result<Option<Requisition>, StoreError> {
        (**self).get(tenant_id, id).await
    }

    async fn set_workflow_state(
        &self,
        tenant_id: TenantId,
        id: RequisitionId,
        status: RequisitionStatus,
        approval_instance_id: Option<ApprovalInstanceId>,
    ) -> Result<bool, StoreError> {
        (**self)
            .set_workflow_state(tenant_id, id, status, approval_instance_id)
            .await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRequisitions {
    rows: InMemoryTenantStore<RequisitionId, Requisition>,
}

impl InMemoryRequisitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, requisition: Requisition) {
        self.rows
            .upsert(requisition.tenant_id, requisition.id, requisition);
    }

    /// Direct edit by the CRUD surface (e.g. reopening a rejected requisition).
    pub fn set_status(
        &self,
        tenant_id: TenantId,
        id: RequisitionId,
        status: RequisitionStatus,
    ) -> bool {
        self.rows
            .update(tenant_id, &id, &mut |r: &mut Requisition| r.status = status)
            .is_some()
    }
}

#[async_trait::async_trait]
impl RequisitionRepository for InMemoryRequisitions {
    async fn get(
        &self,
        tenant_id: TenantId,
        id: RequisitionId,
    ) -> Result<Option<Requisition>, StoreError> {
        Ok(self.rows.get(tenant_id, &id))
    }

    async fn set_workflow_state(
        &self,
        tenant_id: TenantId,
        id: RequisitionId,
        status: RequisitionStatus,
        approval_instance_id: Option<ApprovalInstanceId>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .rows
            .update(tenant_id, &id, &mut |r: &mut Requisition| {
                r.status = status;
                r.approval_instance_id = approval_instance_id;
            })
            .is_some())
    }
}
