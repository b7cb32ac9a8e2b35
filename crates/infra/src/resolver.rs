//! Approver resolution against the tenant's org chart.

use tracing::instrument;

use procura_approvals::{
    plan_stages, ApproverRule, PlannedStage, Requisition, ResolvedApprovers, StageDescriptor,
};
use procura_core::{TenantId, UserId};

use crate::directory::Directory;
use crate::error::WorkflowError;

/// Turns stage rules into concrete approver sets.
///
/// Rules of a stage are tried in order and the first non-empty set wins.
/// Heads and managers only count while they are active users of the tenant.
pub struct ApproverResolver<D> {
    directory: D,
    stages: Vec<StageDescriptor>,
}

impl<D> ApproverResolver<D>
where
    D: Directory,
{
    pub fn new(directory: D, stages: Vec<StageDescriptor>) -> Self {
        Self { directory, stages }
    }

    /// The tenant plan instantiated for `requisition`.
    pub fn plan_for(&self, requisition: &Requisition) -> Vec<PlannedStage> {
        plan_stages(&self.stages, requisition)
    }

    #[instrument(
        skip(self, requisition, stage),
        fields(requisition_id = %requisition.id, stage = %stage.name)
    )]
    pub async fn resolve_approvers(
        &self,
        requisition: &Requisition,
        stage: &PlannedStage,
    ) -> Result<ResolvedApprovers, WorkflowError> {
        for rule in &stage.rules {
            let approvers = self.apply_rule(requisition, rule).await?;
            if !approvers.is_empty() {
                return Ok(ResolvedApprovers::by_rule(rule.clone(), approvers));
            }
        }

        tracing::debug!("no rule yielded an approver");
        Ok(ResolvedApprovers::none())
    }

    pub async fn is_eligible_approver(
        &self,
        user_id: UserId,
        requisition: &Requisition,
        stage: &PlannedStage,
    ) -> Result<bool, WorkflowError> {
        Ok(self
            .resolve_approvers(requisition, stage)
            .await?
            .contains(user_id))
    }

    async fn apply_rule(
        &self,
        requisition: &Requisition,
        rule: &ApproverRule,
    ) -> Result<Vec<UserId>, WorkflowError> {
        let tenant_id = requisition.tenant_id;

        let single = match rule {
            ApproverRule::CostCenterHead => match requisition.cost_center_id {
                Some(id) => self
                    .directory
                    .cost_center(tenant_id, id)
                    .await?
                    .and_then(|cc| cc.head),
                None => None,
            },
            ApproverRule::DepartmentManager => match requisition.department_id {
                Some(id) => self
                    .directory
                    .department(tenant_id, id)
                    .await?
                    .and_then(|d| d.manager),
                None => None,
            },
            ApproverRule::RolePool { role } => {
                return Ok(self.directory.active_users_with_role(tenant_id, role).await?);
            }
        };

        match single {
            Some(user_id) if self.is_active(tenant_id, user_id).await? => Ok(vec![user_id]),
            _ => Ok(vec![]),
        }
    }

    async fn is_active(&self, tenant_id: TenantId, user_id: UserId) -> Result<bool, WorkflowError> {
        Ok(self
            .directory
            .user(tenant_id, user_id)
            .await?
            .is_some_and(|u| u.active))
    }
}
