//! Tenant-partitioned in-memory tables backing the collaborator stores.

pub mod tenant_store;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
