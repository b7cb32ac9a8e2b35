use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

use procura_core::TenantId;
use std::sync::Arc;

/// Tenant-partitioned key/value table.
///
/// Every operation names the tenant; a key stored under one tenant is
/// invisible from any other.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V);
    /// Apply `f` to the stored value in place; `None` if the key is absent.
    fn update(&self, tenant_id: TenantId, key: &K, f: &mut dyn FnMut(&mut V)) -> Option<V>;
    /// Values of the tenant matching `pred`.
    fn find(&self, tenant_id: TenantId, pred: &dyn Fn(&V) -> bool) -> Vec<V>;
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn update(&self, tenant_id: TenantId, key: &K, f: &mut dyn FnMut(&mut V)) -> Option<V> {
        (**self).update(tenant_id, key, f)
    }

    fn find(&self, tenant_id: TenantId, pred: &dyn Fn(&V) -> bool) -> Vec<V> {
        (**self).find(tenant_id, pred)
    }
}

/// In-memory tenant-partitioned table for tests/dev.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    inner: RwLock<HashMap<(TenantId, K), V>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(tenant_id, key.clone())).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((tenant_id, key), value);
        }
    }

    fn update(&self, tenant_id: TenantId, key: &K, f: &mut dyn FnMut(&mut V)) -> Option<V> {
        let mut map = self.inner.write().ok()?;
        let value = map.get_mut(&(tenant_id, key.clone()))?;
        f(value);
        Some(value.clone())
    }

    fn find(&self, tenant_id: TenantId, pred: &dyn Fn(&V) -> bool) -> Vec<V> {
        let Ok(map) = self.inner.read() else {
            return vec![];
        };

        map.iter()
            .filter(|((t, _), v)| *t == tenant_id && pred(v))
            .map(|(_, v)| v.clone())
            .collect()
    }
}
