use thiserror::Error;

use procura_core::{TenantId, UserId};

use crate::{Permission, PermissionSet};

/// A user with their effective permissions resolved for one tenant.
///
/// Construction is decoupled from storage: the infrastructure layer resolves
/// the permission set and hands a `Principal` to the policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub permissions: PermissionSet,
}

impl Principal {
    pub fn new(user_id: UserId, tenant_id: TenantId, permissions: PermissionSet) -> Self {
        Self {
            user_id,
            tenant_id,
            permissions,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Authorize a principal for an operation inside `tenant_id`.
///
/// - No IO
/// - No panics
/// - A principal resolved for another tenant never passes
pub fn authorize(
    principal: &Principal,
    tenant_id: TenantId,
    required: &Permission,
) -> Result<(), AuthzError> {
    if principal.tenant_id != tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    if principal.permissions.contains(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granted_permission_passes() {
        let tenant = TenantId::new();
        let granted = [Permission::PR_APPROVE].into_iter().collect();
        let p = Principal::new(UserId::new(), tenant, granted);
        assert_eq!(authorize(&p, tenant, &Permission::PR_APPROVE), Ok(()));
    }

    #[test]
    fn missing_permission_is_forbidden() {
        let tenant = TenantId::new();
        let p = Principal::new(UserId::new(), tenant, [Permission::PR_READ].into_iter().collect());
        assert_eq!(
            authorize(&p, tenant, &Permission::PR_SUBMIT),
            Err(AuthzError::Forbidden("pr.submit".to_string()))
        );
    }

    #[test]
    fn admin_set_cannot_cross_tenants() {
        let p = Principal::new(UserId::new(), TenantId::new(), PermissionSet::All);
        assert_eq!(
            authorize(&p, TenantId::new(), &Permission::PR_READ),
            Err(AuthzError::TenantMismatch)
        );
    }
}
