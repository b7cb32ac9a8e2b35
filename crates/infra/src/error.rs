//! Error taxonomy of the approval engine boundary.

use serde::Serialize;
use thiserror::Error;

use procura_approvals::ApprovalError;
use procura_auth::{AuthzError, RoleError};
use procura_core::UserId;

use crate::event_store::EventStoreError;

/// Failure of a collaborator store (requisitions, directory).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Structured error returned to callers (kind + message).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("caller is not a known user of this tenant")]
    NotAuthenticated,

    #[error("permission denied: missing '{permission}'")]
    PermissionDenied { permission: String },

    #[error("user {user} is not an eligible approver for stage '{stage}'")]
    NotEligibleApprover { user: UserId, stage: String },

    #[error("no eligible approver for stage '{stage}'")]
    NoEligibleApprover { stage: String },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Cross-tenant access. Reported to callers exactly like `NotFound`.
    #[error("resource not found")]
    TenantMismatch,

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl WorkflowError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Stable snake-case error code.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::NotAuthenticated => "not_authenticated",
            WorkflowError::PermissionDenied { .. } => "permission_denied",
            WorkflowError::NotEligibleApprover { .. } => "not_eligible_approver",
            WorkflowError::NoEligibleApprover { .. } => "no_eligible_approver",
            WorkflowError::InvalidTransition(_) => "invalid_transition",
            WorkflowError::ConcurrentModification(_) => "concurrent_modification",
            WorkflowError::NotFound(_) | WorkflowError::TenantMismatch => "not_found",
            WorkflowError::Configuration(_) => "invalid_configuration",
            WorkflowError::Storage(_) => "storage_error",
        }
    }

    /// HTTP status equivalent.
    pub fn http_status(&self) -> u16 {
        match self {
            WorkflowError::NotAuthenticated => 401,
            WorkflowError::PermissionDenied { .. }
            | WorkflowError::NotEligibleApprover { .. } => 403,
            WorkflowError::NotFound(_) | WorkflowError::TenantMismatch => 404,
            WorkflowError::NoEligibleApprover { .. }
            | WorkflowError::InvalidTransition(_)
            | WorkflowError::ConcurrentModification(_) => 409,
            WorkflowError::Configuration(_) | WorkflowError::Storage(_) => 500,
        }
    }

    /// Server-side failures are logged in full and surfaced generically.
    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            WorkflowError::Configuration(_) | WorkflowError::Storage(_) => {
                "internal server error".to_string()
            }
            WorkflowError::TenantMismatch => WorkflowError::not_found("requisition").to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            error: self.kind(),
            message,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::ConcurrentModification(_))
    }
}

impl From<ApprovalError> for WorkflowError {
    fn from(value: ApprovalError) -> Self {
        match value {
            ApprovalError::NotEligibleApprover { user, stage } => {
                WorkflowError::NotEligibleApprover { user, stage }
            }
            ApprovalError::NoEligibleApprover { stage } => {
                WorkflowError::NoEligibleApprover { stage }
            }
            ApprovalError::InvalidTransition(msg) => WorkflowError::InvalidTransition(msg),
            ApprovalError::TenantMismatch => WorkflowError::TenantMismatch,
        }
    }
}

impl From<EventStoreError> for WorkflowError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => WorkflowError::ConcurrentModification(msg),
            other => WorkflowError::Storage(other.to_string()),
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        WorkflowError::Storage(value.to_string())
    }
}

impl From<RoleError> for WorkflowError {
    fn from(value: RoleError) -> Self {
        WorkflowError::Configuration(value.to_string())
    }
}

impl From<AuthzError> for WorkflowError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::TenantMismatch => WorkflowError::TenantMismatch,
            AuthzError::Forbidden(permission) => WorkflowError::PermissionDenied { permission },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_mismatch_is_indistinguishable_from_not_found() {
        let hidden = WorkflowError::TenantMismatch;
        let missing = WorkflowError::not_found("requisition");

        assert_eq!(hidden.kind(), missing.kind());
        assert_eq!(hidden.http_status(), missing.http_status());
        assert_eq!(hidden.to_body(), missing.to_body());
    }

    #[test]
    fn storage_details_stay_out_of_the_body() {
        let err = WorkflowError::Storage("connection reset by 10.0.0.7".into());
        let body = err.to_body();

        assert_eq!(body.error, "storage_error");
        assert_eq!(body.message, "internal server error");
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn store_conflicts_become_concurrent_modification() {
        let err: WorkflowError = EventStoreError::Concurrency("expected 3, found 4".into()).into();
        assert!(err.is_retryable());
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn store_isolation_faults_are_server_errors() {
        let err: WorkflowError =
            EventStoreError::TenantIsolation("foreign entry at index 0".into()).into();

        assert!(matches!(err, WorkflowError::Storage(_)));
        assert_eq!(err.http_status(), 500);
        assert!(!err.is_retryable());
    }
}
