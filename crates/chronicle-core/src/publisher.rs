//! Deferred publication of collected events.
//!
//! Events are collected while a unit of work runs but only handed to the
//! dispatcher once the storage transaction has committed. A rollback
//! discards them.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::message::{DomainEventMessage, Payload};
use crate::queue::EventQueue;

/// Downstream delivery of committed events to subscribers.
#[async_trait]
pub trait EventDispatcher<P: Payload>: Send + Sync {
    /// Delivers events in order.
    async fn dispatch(&self, events: &[DomainEventMessage<P>]) -> Result<(), DomainError>;
}

/// Two-phase publisher: [`collect`](Self::collect) buffers, and
/// [`flush`](Self::flush) delivers once the transaction has committed.
///
/// Several collects before one flush coalesce into a single ordered batch.
#[derive(Debug)]
pub struct DeferredEventPublisher<P, D> {
    dispatcher: D,
    pending: Vec<DomainEventMessage<P>>,
}

impl<P: Payload, D: EventDispatcher<P>> DeferredEventPublisher<P, D> {
    /// Creates a publisher delivering to `dispatcher`.
    pub fn new(dispatcher: D) -> Self {
        Self {
            dispatcher,
            pending: Vec::new(),
        }
    }

    /// The dispatcher events are delivered to.
    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Dequeues everything from `queue` into the buffer and returns how many
    /// events were added.
    pub fn collect(&mut self, queue: &mut impl EventQueue<P>) -> usize {
        self.enqueue(queue.dequeue_all_events())
    }

    /// Buffers events that were already dequeued, after any still pending,
    /// and returns how many were added.
    pub fn enqueue(&mut self, events: Vec<DomainEventMessage<P>>) -> usize {
        let enqueued = events.len();
        self.pending.extend(events);
        enqueued
    }

    /// Events waiting for the commit notification.
    pub fn pending(&self) -> &[DomainEventMessage<P>] {
        &self.pending
    }

    /// Delivers the buffered events; call only after the transaction has
    /// durably committed. Returns how many events were delivered.
    ///
    /// # Errors
    ///
    /// Returns the dispatcher's error. The batch stays buffered so the flush
    /// can be retried.
    pub async fn flush(&mut self) -> Result<usize, DomainError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let events = std::mem::take(&mut self.pending);
        if let Err(err) = self.dispatcher.dispatch(&events).await {
            self.pending = events;
            return Err(err);
        }
        tracing::debug!(event_count = events.len(), "published committed events");
        Ok(events.len())
    }

    /// Drops the buffered events after a rollback and returns how many were
    /// dropped.
    pub fn discard(&mut self) -> usize {
        let discarded = self.pending.len();
        if discarded > 0 {
            tracing::warn!(event_count = discarded, "discarding events of a rolled back unit of work");
        }
        self.pending.clear();
        discarded
    }
}
