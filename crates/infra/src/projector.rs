//! Read side: the approval status view of a requisition.

use std::sync::Arc;

use tracing::instrument;

use procura_approvals::{
    ApprovalInstance, Requisition, RequisitionId, ResolvedApprovers, Stage, StatusView,
};
use procura_core::{TenantId, UserId};

use crate::config::ApproverResolution;
use crate::directory::Directory;
use crate::error::WorkflowError;
use crate::event_store::EventStore;
use crate::ledger::{ApprovalLedger, LoadedWorkflow};
use crate::requisitions::RequisitionRepository;
use crate::resolver::ApproverResolver;

pub struct StatusProjector<S, R, D> {
    ledger: Arc<ApprovalLedger<S>>,
    requisitions: Arc<R>,
    resolver: Arc<ApproverResolver<D>>,
    resolution: ApproverResolution,
}

impl<S, R, D> StatusProjector<S, R, D>
where
    S: EventStore,
    R: RequisitionRepository,
    D: Directory,
{
    pub fn new(
        ledger: Arc<ApprovalLedger<S>>,
        requisitions: Arc<R>,
        resolver: Arc<ApproverResolver<D>>,
        resolution: ApproverResolution,
    ) -> Self {
        Self {
            ledger,
            requisitions,
            resolver,
            resolution,
        }
    }

    /// Status of the requisition's latest approval instance.
    ///
    /// A requisition of another tenant is reported as not found.
    #[instrument(skip(self), fields(%tenant_id, %requisition_id))]
    pub async fn get_approval_status(
        &self,
        tenant_id: TenantId,
        requisition_id: RequisitionId,
    ) -> Result<StatusView, WorkflowError> {
        let requisition = self
            .requisitions
            .get(tenant_id, requisition_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("requisition"))?;
        let loaded = self.ledger.load(tenant_id, requisition_id).await?;

        self.project(&requisition, &loaded).await
    }

    /// View of an already loaded workflow.
    pub async fn project(
        &self,
        requisition: &Requisition,
        loaded: &LoadedWorkflow,
    ) -> Result<StatusView, WorkflowError> {
        let instance = loaded.workflow.instance();
        let approvers = match instance {
            Some(instance) if instance.is_active() => {
                self.current_approvers(requisition, instance).await?
            }
            _ => Vec::new(),
        };

        Ok(StatusView::compose(instance, &loaded.history, approvers))
    }

    async fn current_approvers(
        &self,
        requisition: &Requisition,
        instance: &ApprovalInstance,
    ) -> Result<Vec<UserId>, WorkflowError> {
        let Some(stage) = instance.current_stage() else {
            return Ok(Vec::new());
        };

        Ok(self
            .stage_approvers(requisition, stage)
            .await?
            .approvers
            .into_iter()
            .collect())
    }

    /// Approvers of an entered stage under the configured resolution policy.
    pub async fn stage_approvers(
        &self,
        requisition: &Requisition,
        stage: &Stage,
    ) -> Result<ResolvedApprovers, WorkflowError> {
        match self.resolution {
            ApproverResolution::Live => {
                self.resolver
                    .resolve_approvers(requisition, &stage.planned())
                    .await
            }
            ApproverResolution::Snapshot => Ok(stage.approvers.clone()),
        }
    }
}
