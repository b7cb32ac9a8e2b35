//! Immutable audit records, one per accepted transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_core::{TenantId, UserId};

use crate::requisition::{ApprovalInstanceId, RequisitionId, RequisitionStatus};
use crate::workflow::{ApprovalEvent, StageRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    Submitted,
    Approved,
    Rejected,
    Returned,
    Cancelled,
}

impl ActionType {
    pub fn of(event: &ApprovalEvent) -> Self {
        match event {
            ApprovalEvent::ApprovalSubmitted(_) => ActionType::Submitted,
            ApprovalEvent::StageApproved(_) => ActionType::Approved,
            ApprovalEvent::StageRejected(_) => ActionType::Rejected,
            ApprovalEvent::ReturnedToStage(_) => ActionType::Returned,
            ApprovalEvent::ApprovalCancelled(_) => ActionType::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalHistoryEntry {
    /// Position in the requisition's ledger, starting at 1.
    pub sequence: u64,
    pub tenant_id: TenantId,
    pub requisition_id: RequisitionId,
    pub approval_instance_id: Option<ApprovalInstanceId>,
    pub action_type: ActionType,
    pub action_by: UserId,
    pub action_date: DateTime<Utc>,
    pub status_from: RequisitionStatus,
    pub status_to: RequisitionStatus,
    pub transient_status: Option<RequisitionStatus>,
    pub comments: Option<String>,
    pub approver_role: Option<String>,
    /// Stage acted on (the stage left, for returns).
    pub stage: Option<StageRef>,
    /// Target of a return.
    pub return_to: Option<StageRef>,
}

impl ApprovalHistoryEntry {
    pub fn from_event(sequence: u64, event: &ApprovalEvent) -> Self {
        let t = event.transition();
        let (approver_role, stage, return_to) = match event {
            ApprovalEvent::ApprovalSubmitted(_) => (None, None, None),
            ApprovalEvent::StageApproved(e) => {
                (e.approver_role.clone(), Some(e.stage.clone()), None)
            }
            ApprovalEvent::StageRejected(e) => {
                (e.approver_role.clone(), Some(e.stage.clone()), None)
            }
            ApprovalEvent::ReturnedToStage(e) => {
                (e.approver_role.clone(), Some(e.from.clone()), Some(e.to.clone()))
            }
            ApprovalEvent::ApprovalCancelled(e) => (None, e.stage.clone(), None),
        };

        Self {
            sequence,
            tenant_id: t.tenant_id,
            requisition_id: t.requisition_id,
            approval_instance_id: t.approval_instance_id,
            action_type: ActionType::of(event),
            action_by: t.action_by,
            action_date: t.action_date,
            status_from: t.status_from,
            status_to: t.status_to,
            transient_status: t.transient_status,
            comments: t.comments.clone(),
            approver_role,
            stage,
            return_to,
        }
    }
}
