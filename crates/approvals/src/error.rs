use thiserror::Error;

use procura_core::UserId;

use crate::requisition::RequisitionStatus;

/// Rejections produced by the approval state machine.
///
/// Any of these means the command produced no events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("user {user} is not an eligible approver for stage '{stage}'")]
    NotEligibleApprover { user: UserId, stage: String },

    #[error("no eligible approver for stage '{stage}'")]
    NoEligibleApprover { stage: String },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("tenant mismatch")]
    TenantMismatch,
}

impl ApprovalError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub(crate) fn from_status(action: &str, status: RequisitionStatus) -> Self {
        Self::InvalidTransition(format!("cannot {action} a requisition in status {status}"))
    }
}
