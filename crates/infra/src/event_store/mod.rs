//! Append-only event store boundary.
//!
//! Tenant-scoped event streams without storage assumptions. The approval
//! ledger is one stream per requisition on top of this.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
