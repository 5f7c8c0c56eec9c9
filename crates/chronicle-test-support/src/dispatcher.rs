//! Test dispatchers: mock `EventDispatcher` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::message::{DomainEventMessage, Payload};
use chronicle_core::publisher::EventDispatcher;

/// A dispatcher that records every delivered batch and always succeeds.
#[derive(Debug)]
pub struct RecordingDispatcher<P> {
    batches: Mutex<Vec<Vec<DomainEventMessage<P>>>>,
}

impl<P: Payload> RecordingDispatcher<P> {
    /// Creates a dispatcher with nothing recorded.
    #[must_use]
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Returns a snapshot of all delivered batches.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn batches(&self) -> Vec<Vec<DomainEventMessage<P>>> {
        self.batches.lock().unwrap().clone()
    }

    /// Returns every delivered event, flattened in delivery order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn delivered(&self) -> Vec<DomainEventMessage<P>> {
        self.batches().into_iter().flatten().collect()
    }
}

impl<P: Payload> Default for RecordingDispatcher<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<P: Payload> EventDispatcher<P> for RecordingDispatcher<P> {
    async fn dispatch(&self, events: &[DomainEventMessage<P>]) -> Result<(), DomainError> {
        self.batches.lock().unwrap().push(events.to_vec());
        Ok(())
    }
}

/// A dispatcher that always fails. Useful for testing that a failed flush
/// keeps its batch.
#[derive(Debug)]
pub struct FailingDispatcher;

#[async_trait]
impl<P: Payload> EventDispatcher<P> for FailingDispatcher {
    async fn dispatch(&self, _events: &[DomainEventMessage<P>]) -> Result<(), DomainError> {
        Err(DomainError::StorageFailure("subscriber unreachable".into()))
    }
}
