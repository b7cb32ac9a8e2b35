//! Effective permission resolution with a per-(user, tenant) cache.
//!
//! ```text
//! user suspended         → empty set
//! admin role assigned    → PermissionSet::All
//! fresh cache entry      → cached set
//! otherwise              → union over assigned roles and their ancestor chains
//! ```

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::instrument;

use procura_auth::{
    InheritanceWalk, Permission, PermissionCache, PermissionSet, Principal, RoleCode,
};
use procura_core::{TenantId, UserId};

use crate::config::PermissionsConfig;
use crate::directory::{Directory, UserRecord};
use crate::error::WorkflowError;

pub struct PermissionStore<D> {
    directory: D,
    cache: PermissionCache,
    admin_role: RoleCode,
    max_inheritance_depth: usize,
}

impl<D> PermissionStore<D>
where
    D: Directory,
{
    pub fn new(directory: D, config: &PermissionsConfig) -> Self {
        Self {
            directory,
            cache: PermissionCache::new(config.cache_ttl()),
            admin_role: config.admin_role.clone(),
            max_inheritance_depth: config.max_inheritance_depth,
        }
    }

    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    /// Effective permissions of a user within a tenant.
    ///
    /// Fails with `NotFound` when the user does not belong to the tenant.
    #[instrument(skip(self), fields(%user_id, %tenant_id))]
    pub async fn resolve_permissions(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<PermissionSet, WorkflowError> {
        let user = self
            .directory
            .user(tenant_id, user_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("user"))?;

        if !user.active {
            return Ok(PermissionSet::empty());
        }
        if user.has_role(&self.admin_role) {
            return Ok(PermissionSet::All);
        }

        let now = Utc::now();
        if let Some(cached) = self.cache.get(user_id, tenant_id, now) {
            return Ok(cached);
        }

        let computed = self.compute(&user).await?;
        if let Err(e) = self.cache.put(user_id, tenant_id, computed.clone(), now) {
            tracing::warn!(error = %e, "permission cache write failed");
        }

        Ok(computed)
    }

    /// Whether the user holds `permission` in the tenant.
    pub async fn authorize(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        permission: &Permission,
    ) -> Result<bool, WorkflowError> {
        Ok(self
            .resolve_permissions(user_id, tenant_id)
            .await?
            .contains(permission))
    }

    /// Resolve the caller as a principal; an unknown caller is not authenticated.
    pub async fn principal(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<Principal, WorkflowError> {
        match self.resolve_permissions(user_id, tenant_id).await {
            Ok(permissions) => Ok(Principal::new(user_id, tenant_id, permissions)),
            Err(WorkflowError::NotFound(_)) => Err(WorkflowError::NotAuthenticated),
            Err(e) => Err(e),
        }
    }

    /// Resolve the caller and fail with `PermissionDenied` unless `permission` is held.
    pub async fn require(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        permission: &Permission,
    ) -> Result<Principal, WorkflowError> {
        let principal = self.principal(user_id, tenant_id).await?;
        procura_auth::authorize(&principal, tenant_id, permission)?;
        Ok(principal)
    }

    /// Sorted permission codes, `["*"]` for administrators.
    pub async fn effective_permissions(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<Vec<String>, WorkflowError> {
        Ok(self.resolve_permissions(user_id, tenant_id).await?.codes())
    }

    /// Drop the cached set after a user's role assignments changed.
    pub fn invalidate(&self, user_id: UserId, tenant_id: TenantId) {
        self.cache.invalidate(user_id, tenant_id);
    }

    /// Drop every cached set of a tenant after a role definition changed.
    pub fn invalidate_tenant(&self, tenant_id: TenantId) {
        self.cache.invalidate_tenant(tenant_id);
    }

    async fn compute(&self, user: &UserRecord) -> Result<PermissionSet, WorkflowError> {
        let mut granted: BTreeSet<Permission> = BTreeSet::new();

        for code in &user.roles {
            let mut walk = InheritanceWalk::new(code, self.max_inheritance_depth);
            // Unknown role codes and missing parents contribute nothing.
            let mut current = self.directory.role(user.tenant_id, code).await?;

            while let Some(role) = current {
                granted.extend(role.permissions.iter().cloned());
                current = match &role.inherits_from {
                    Some(parent) => {
                        walk.visit(parent)?;
                        self.directory.role(user.tenant_id, parent).await?
                    }
                    None => None,
                };
            }
        }

        Ok(PermissionSet::Granted(granted))
    }
}
