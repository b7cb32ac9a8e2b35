//! `procura-events` — event contracts and pub/sub mechanics.
//!
//! Accepted workflow transitions are persisted first and then published here
//! for downstream consumers (notifications, search indexing, analytics).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
