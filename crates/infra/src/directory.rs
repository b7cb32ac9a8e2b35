//! Read-only view of tenant users, role definitions and org units.
//!
//! Owned by the surrounding CRUD surface; the approval engine only reads.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use procura_approvals::{CostCenter, CostCenterId, Department, DepartmentId};
use procura_auth::{RoleCode, RoleDefinition};
use procura_core::{TenantId, UserId};

use crate::error::StoreError;
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub display_name: String,
    /// Directly assigned role codes.
    pub roles: Vec<RoleCode>,
    pub active: bool,
}

impl UserRecord {
    pub fn new(tenant_id: TenantId, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            tenant_id,
            display_name: display_name.into(),
            roles: Vec::new(),
            active: true,
        }
    }

    pub fn with_role(mut self, role: impl Into<RoleCode>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &RoleCode) -> bool {
        self.roles.contains(role)
    }
}

#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    async fn user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<UserRecord>, StoreError>;

    async fn role(
        &self,
        tenant_id: TenantId,
        code: &RoleCode,
    ) -> Result<Option<RoleDefinition>, StoreError>;

    async fn cost_center(
        &self,
        tenant_id: TenantId,
        id: CostCenterId,
    ) -> Result<Option<CostCenter>, StoreError>;

    async fn department(
        &self,
        tenant_id: TenantId,
        id: DepartmentId,
    ) -> Result<Option<Department>, StoreError>;

    /// Active users directly assigned `role`, sorted by id.
    async fn active_users_with_role(
        &self,
        tenant_id: TenantId,
        role: &RoleCode,
    ) -> Result<Vec<UserId>, StoreError>;
}

#[async_trait::async_trait]
impl<D> Directory for Arc<D>
where
    D: Directory + ?Sized,
{
    async fn user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<UserRecord>, StoreError> {
        (**self).user(tenant_id, user_id).await
    }

    async fn role(
        &self,
        tenant_id: TenantId,
        code: &RoleCode,
    ) -> Result<Option<RoleDefinition>, StoreError> {
        (**self).role(tenant_id, code).await
    }

    async fn cost_center(
        &self,
        tenant_id: TenantId,
        id: CostCenterId,
    ) -> Result<Option<CostCenter>, StoreError> {
        (**self).cost_center(tenant_id, id).await
    }

    async fn department(
        &self,
        tenant_id: TenantId,
        id: DepartmentId,
    ) -> Result<Option<Department>, StoreError> {
        (**self).department(tenant_id, id).await
    }

    async fn active_users_with_role(
        &self,
        tenant_id: TenantId,
        role: &RoleCode,
    ) -> Result<Vec<UserId>, StoreError> {
        (**self).active_users_with_role(tenant_id, role).await
    }
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: InMemoryTenantStore<UserId, UserRecord>,
    roles: InMemoryTenantStore<RoleCode, RoleDefinition>,
    cost_centers: InMemoryTenantStore<CostCenterId, CostCenter>,
    departments: InMemoryTenantStore<DepartmentId, Department>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_user(&self, user: UserRecord) {
        self.users.upsert(user.tenant_id, user.id, user);
    }

    pub fn upsert_role(&self, tenant_id: TenantId, role: RoleDefinition) {
        self.roles.upsert(tenant_id, role.code.clone(), role);
    }

    pub fn upsert_cost_center(&self, cost_center: CostCenter) {
        self.cost_centers
            .upsert(cost_center.tenant_id, cost_center.id, cost_center);
    }

    pub fn upsert_department(&self, department: Department) {
        self.departments
            .upsert(department.tenant_id, department.id, department);
    }

    /// Replace a user's role assignments; `false` if the user is unknown.
    pub fn assign_roles(&self, tenant_id: TenantId, user_id: UserId, roles: Vec<RoleCode>) -> bool {
        self.users
            .update(tenant_id, &user_id, &mut |u: &mut UserRecord| u.roles = roles.clone())
            .is_some()
    }

    pub fn set_active(&self, tenant_id: TenantId, user_id: UserId, active: bool) -> bool {
        self.users
            .update(tenant_id, &user_id, &mut |u: &mut UserRecord| u.active = active)
            .is_some()
    }
}

#[async_trait::async_trait]
impl Directory for InMemoryDirectory {
    async fn user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.get(tenant_id, &user_id))
    }

    async fn role(
        &self,
        tenant_id: TenantId,
        code: &RoleCode,
    ) -> Result<Option<RoleDefinition>, StoreError> {
        Ok(self.roles.get(tenant_id, code))
    }

    async fn cost_center(
        &self,
        tenant_id: TenantId,
        id: CostCenterId,
    ) -> Result<Option<CostCenter>, StoreError> {
        Ok(self.cost_centers.get(tenant_id, &id))
    }

    async fn department(
        &self,
        tenant_id: TenantId,
        id: DepartmentId,
    ) -> Result<Option<Department>, StoreError> {
        Ok(self.departments.get(tenant_id, &id))
    }

    async fn active_users_with_role(
        &self,
        tenant_id: TenantId,
        role: &RoleCode,
    ) -> Result<Vec<UserId>, StoreError> {
        let mut ids: Vec<UserId> = self
            .users
            .find(tenant_id, &|u: &UserRecord| u.active && u.has_role(role))
            .into_iter()
            .map(|u| u.id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn role_pool_skips_inactive_users_and_other_tenants() {
        let dir = InMemoryDirectory::new();
        let tenant = TenantId::new();
        let finance = RoleCode::new("finance");

        let active = UserRecord::new(tenant, "Ada").with_role("finance");
        let mut suspended = UserRecord::new(tenant, "Bo").with_role("finance");
        suspended.active = false;
        let elsewhere = UserRecord::new(TenantId::new(), "Cy").with_role("finance");
        let active_id = active.id;
        for u in [active, suspended, elsewhere] {
            dir.upsert_user(u);
        }

        let pool = dir.active_users_with_role(tenant, &finance).await.unwrap();

        assert_eq!(pool, vec![active_id]);
    }

    #[tokio::test]
    async fn role_reassignment_is_visible_immediately() {
        let dir = InMemoryDirectory::new();
        let tenant = TenantId::new();
        let user = UserRecord::new(tenant, "Ada");
        let id = user.id;
        dir.upsert_user(user);

        assert!(dir.assign_roles(tenant, id, vec![RoleCode::new("buyer")]));
        assert!(!dir.assign_roles(TenantId::new(), id, vec![]));

        let stored = dir.user(tenant, id).await.unwrap().unwrap();
        assert_eq!(stored.roles, vec![RoleCode::new("buyer")]);
    }
}
