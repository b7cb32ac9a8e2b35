//! Effective-permission cache keyed by `(user, tenant)`.
//!
//! Entries expire after a TTL and can be dropped explicitly whenever role
//! assignments or role definitions change. Reads and writes are not
//! linearizable with each other; a stale entry costs at most one extra
//! recomputation.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use procura_core::{TenantId, UserId};

use crate::PermissionSet;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("permission cache lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone)]
struct CachedPermissions {
    permissions: PermissionSet,
    cached_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct PermissionCache {
    ttl: Duration,
    entries: RwLock<HashMap<(UserId, TenantId), CachedPermissions>>,
}

impl PermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A fresh entry for the user in this tenant, if one exists.
    pub fn get(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        now: DateTime<Utc>,
    ) -> Option<PermissionSet> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(&(user_id, tenant_id))?;
        // An entry stamped in the future (clock skew) counts as fresh.
        let age = (now - entry.cached_at).to_std().unwrap_or_default();
        if age >= self.ttl {
            return None;
        }
        Some(entry.permissions.clone())
    }

    pub fn put(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        permissions: PermissionSet,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        entries.insert(
            (user_id, tenant_id),
            CachedPermissions {
                permissions,
                cached_at: now,
            },
        );
        Ok(())
    }

    pub fn invalidate(&self, user_id: UserId, tenant_id: TenantId) {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.remove(&(user_id, tenant_id));
            }
            Err(_) => {
                tracing::warn!(
                    %user_id,
                    %tenant_id,
                    "permission cache poisoned; invalidate skipped"
                )
            }
        }
    }

    /// Drop every entry of a tenant (e.g. after a role definition changed).
    pub fn invalidate_tenant(&self, tenant_id: TenantId) {
        match self.entries.write() {
            Ok(mut entries) => entries.retain(|(_, t), _| *t != tenant_id),
            Err(_) => {
                tracing::warn!(%tenant_id, "permission cache poisoned; tenant invalidate skipped")
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Permission;
    use chrono::TimeDelta;

    fn granted() -> PermissionSet {
        [Permission::PR_SUBMIT].into_iter().collect()
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = PermissionCache::new(Duration::from_secs(60));
        let (user, tenant) = (UserId::new(), TenantId::new());
        let t0 = Utc::now();

        cache.put(user, tenant, granted(), t0).unwrap();

        assert_eq!(cache.get(user, tenant, t0 + TimeDelta::seconds(59)), Some(granted()));
        assert_eq!(cache.get(user, tenant, t0 + TimeDelta::seconds(60)), None);
    }

    #[test]
    fn keys_are_tenant_scoped() {
        let cache = PermissionCache::new(Duration::from_secs(60));
        let user = UserId::new();
        let (tenant_a, tenant_b) = (TenantId::new(), TenantId::new());
        let now = Utc::now();

        cache.put(user, tenant_a, granted(), now).unwrap();

        assert!(cache.get(user, tenant_a, now).is_some());
        assert!(cache.get(user, tenant_b, now).is_none());
    }

    #[test]
    fn invalidation_by_user_and_by_tenant() {
        let cache = PermissionCache::new(Duration::from_secs(60));
        let (u1, u2) = (UserId::new(), UserId::new());
        let (tenant_a, tenant_b) = (TenantId::new(), TenantId::new());
        let now = Utc::now();

        cache.put(u1, tenant_a, granted(), now).unwrap();
        cache.put(u2, tenant_a, granted(), now).unwrap();
        cache.put(u1, tenant_b, granted(), now).unwrap();

        cache.invalidate(u1, tenant_a);
        assert!(cache.get(u1, tenant_a, now).is_none());
        assert_eq!(cache.len(), 2);

        cache.invalidate_tenant(tenant_a);
        assert!(cache.get(u2, tenant_a, now).is_none());
        assert!(cache.get(u1, tenant_b, now).is_some());
    }
}
