//! Per-aggregate buffer of uncommitted domain events.

use crate::clock::Clock;
use crate::error::DomainError;
use crate::message::{DomainEventMessage, EventMessage, Metadata};

/// Buffers the events one aggregate produces and numbers them.
///
/// Every registered message is tagged with this container's aggregate type
/// and id and the next sequence number. Sequence numbers start at `0` for a
/// new aggregate, or right after the seed passed to
/// [`initialize_sequence_number`](Self::initialize_sequence_number), and are
/// never reused: [`commit`](Self::commit) only empties the buffer.
#[derive(Debug)]
pub struct EventContainer<P> {
    aggregate_type: String,
    aggregate_id: String,
    events: Vec<DomainEventMessage<P>>,
    last_sequence_number: Option<i64>,
    last_committed_sequence_number: Option<i64>,
}

impl<P> EventContainer<P> {
    /// Creates an empty container for one aggregate instance.
    pub fn new(aggregate_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            events: Vec::new(),
            last_sequence_number: None,
            last_committed_sequence_number: None,
        }
    }

    /// The aggregate kind attached to every event.
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// The aggregate instance attached to every event.
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// Wraps `payload` in a new message and registers it.
    pub fn add_event(
        &mut self,
        payload: P,
        metadata: Metadata,
        clock: &dyn Clock,
    ) -> &DomainEventMessage<P> {
        self.register(EventMessage::new(payload, metadata, clock))
    }

    /// Tags an existing message with this aggregate's identity and the next
    /// sequence number, keeping its id and timestamp.
    pub fn register(&mut self, message: EventMessage<P>) -> &DomainEventMessage<P> {
        let sequence_number = self.next_sequence_number();
        let event = DomainEventMessage::new(
            self.aggregate_type.clone(),
            self.aggregate_id.clone(),
            sequence_number,
            message,
        );
        self.last_sequence_number = Some(sequence_number);

        let index = self.events.len();
        self.events.push(event);
        &self.events[index]
    }

    /// Uncommitted events in the order they were added.
    pub fn events(&self) -> &[DomainEventMessage<P>] {
        &self.events
    }

    /// Marks everything added so far as committed and clears the buffer.
    pub fn commit(&mut self) {
        self.drain();
    }

    /// Commits and hands back the events that were buffered.
    pub fn drain(&mut self) -> Vec<DomainEventMessage<P>> {
        self.last_committed_sequence_number = self.last_sequence_number();
        std::mem::take(&mut self.events)
    }

    /// Number of uncommitted events.
    pub fn count(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` when nothing is waiting to be committed.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Seeds the counter of a rehydrated aggregate with the last sequence
    /// number already in storage.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidContainerState` if this container has
    /// already numbered an event.
    pub fn initialize_sequence_number(&mut self, last_known: i64) -> Result<(), DomainError> {
        if !self.events.is_empty() || self.last_sequence_number.is_some() {
            return Err(DomainError::InvalidContainerState(format!(
                "cannot seed the sequence number of {} {} after events have been added",
                self.aggregate_type, self.aggregate_id
            )));
        }
        self.last_committed_sequence_number = Some(last_known);
        Ok(())
    }

    /// Highest sequence number assigned, committed or not; `None` for an
    /// aggregate without history.
    pub fn last_sequence_number(&self) -> Option<i64> {
        if self.events.is_empty() {
            self.last_committed_sequence_number
        } else {
            self.last_sequence_number
        }
    }

    /// Sequence number as of the last commit.
    pub fn last_committed_sequence_number(&self) -> Option<i64> {
        self.last_committed_sequence_number
    }

    fn next_sequence_number(&self) -> i64 {
        self.last_sequence_number().map_or(0, |n| n + 1)
    }
}
