//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes events that are already durable in the ledger, so
//! delivery is at-least-once and consumers must tolerate duplicates. It is
//! never the source of truth.

use std::sync::Arc;
use std::sync::mpsc::Receiver;

/// A subscription to a bus (broadcast: every subscriber sees every message).
///
/// Intended for a single consuming thread or task.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<M> {
        let mut out = Vec::new();
        while let Ok(m) = self.receiver.try_recv() {
            out.push(m);
        }
        out
    }
}

/// Domain-agnostic event bus (pub/sub).
///
/// ```text
/// transition accepted → ledger append → bus publish → consumers
/// ```
///
/// `publish` may fail (closed transport, poisoned lock); callers decide whether
/// that is fatal. The approval engine treats it as best-effort because the
/// ledger already holds the fact.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
