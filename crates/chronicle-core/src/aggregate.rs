//! Event-sourced aggregate root abstraction.
//!
//! State changes only through [`EventSourcedAggregate::apply`]: the payload is
//! wrapped in a message, dispatched to the handler registered for its type,
//! and only then numbered by the aggregate's [`EventContainer`]. Replay feeds
//! stored events through the same dispatch without registering them again.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::container::EventContainer;
use crate::error::DomainError;
use crate::message::{DomainEventMessage, EventMessage, Metadata, Payload};

/// Mutation handler: receives the payload, its timestamp, and its metadata.
pub type Handler<A> =
    fn(&mut A, &<A as EventSourcedAggregate>::Event, DateTime<Utc>, &Metadata);

/// Derives the event name from a payload type tag.
///
/// Drops any `::`, `.` or `\` qualified prefix, then a trailing `Event`, so
/// `orders::ItemAddedEvent` becomes `ItemAdded`.
#[must_use]
pub fn event_name(payload_type: &str) -> &str {
    let name = payload_type
        .rsplit([':', '.', '\\'])
        .next()
        .unwrap_or(payload_type);
    name.strip_suffix("Event").unwrap_or(name)
}

/// Name of the handler an aggregate needs for `payload_type` (`apply<Name>`).
#[must_use]
pub fn handler_name(payload_type: &str) -> String {
    format!("apply{}", event_name(payload_type))
}

/// Registration table mapping event names to an aggregate's handlers.
///
/// Built once per aggregate type, usually in a `static LazyLock`.
pub struct Handlers<A: EventSourcedAggregate> {
    table: HashMap<String, Handler<A>>,
}

impl<A: EventSourcedAggregate> Handlers<A> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Registers `handler` for a payload type; either the full tag or the
    /// bare event name may be given.
    #[must_use]
    pub fn on(mut self, payload_type: &str, handler: Handler<A>) -> Self {
        self.table
            .insert(event_name(payload_type).to_owned(), handler);
        self
    }

    /// Looks up the handler for a payload type tag.
    #[must_use]
    pub fn get(&self, payload_type: &str) -> Option<Handler<A>> {
        self.table.get(event_name(payload_type)).copied()
    }

    /// Checks that every payload type the aggregate can produce has a handler.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NoHandlerFound` for the first uncovered type.
    pub fn ensure_covers<'a>(
        &self,
        payload_types: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), DomainError> {
        for payload_type in payload_types {
            if self.get(payload_type).is_none() {
                return Err(DomainError::NoHandlerFound {
                    aggregate_type: A::AGGREGATE_TYPE.to_owned(),
                    handler: handler_name(payload_type),
                });
            }
        }
        Ok(())
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl<A: EventSourcedAggregate> Default for Handlers<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: EventSourcedAggregate> fmt::Debug for Handlers<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.table.keys().collect();
        names.sort();
        f.debug_struct("Handlers").field("events", &names).finish()
    }
}

/// Trait for aggregate roots whose state is rebuilt from their own events.
pub trait EventSourcedAggregate: Sized + Send + Sync + 'static {
    /// The payload type this aggregate produces and consumes.
    type Event: Payload;

    /// Stable tag identifying this aggregate kind.
    const AGGREGATE_TYPE: &'static str;

    /// The handler table for this aggregate type.
    fn handlers() -> &'static Handlers<Self>;

    /// The container holding this aggregate's uncommitted events.
    fn container(&self) -> &EventContainer<Self::Event>;

    /// Mutable access to the container.
    fn container_mut(&mut self) -> &mut EventContainer<Self::Event>;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> &str {
        self.container().aggregate_id()
    }

    /// Records a new fact: dispatches it to this aggregate's handler, then
    /// registers it with the container.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NoHandlerFound` if no handler matches the
    /// payload type. Nothing is registered in that case.
    fn apply(
        &mut self,
        payload: Self::Event,
        metadata: Metadata,
        clock: &dyn Clock,
    ) -> Result<&DomainEventMessage<Self::Event>, DomainError> {
        let message = EventMessage::new(payload, metadata, clock);
        self.handle(&message)?;
        Ok(self.container_mut().register(message))
    }

    /// Dispatches a message to the handler registered for its payload type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NoHandlerFound` if no handler matches.
    fn handle(&mut self, message: &EventMessage<Self::Event>) -> Result<(), DomainError> {
        let payload_type = message.payload_type();
        let Some(handler) = Self::handlers().get(payload_type) else {
            return Err(DomainError::NoHandlerFound {
                aggregate_type: self.container().aggregate_type().to_owned(),
                handler: handler_name(payload_type),
            });
        };
        tracing::trace!(
            aggregate_type = self.container().aggregate_type(),
            aggregate_id = self.aggregate_id(),
            event = event_name(payload_type),
            "applying event"
        );
        handler(self, message.payload(), message.timestamp(), message.metadata());
        Ok(())
    }

    /// Rebuilds state from stored events, in ascending sequence order, and
    /// seeds the container with the last replayed sequence number.
    ///
    /// On error the aggregate may hold part of the history and its container
    /// is left unseeded; discard it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidHistory` if an event belongs to another
    /// aggregate or is out of sequence, `DomainError::NoHandlerFound` if an
    /// event has no handler, and `DomainError::InvalidContainerState` if
    /// this aggregate already produced events of its own.
    fn replay(&mut self, history: &[DomainEventMessage<Self::Event>]) -> Result<(), DomainError> {
        let mut last = self.container().last_sequence_number();
        for event in history {
            let container = self.container();
            if event.aggregate_type() != container.aggregate_type()
                || event.aggregate_id() != container.aggregate_id()
            {
                return Err(DomainError::InvalidHistory(format!(
                    "event {} belongs to {} {}, not {} {}",
                    event.id(),
                    event.aggregate_type(),
                    event.aggregate_id(),
                    container.aggregate_type(),
                    container.aggregate_id()
                )));
            }
            let expected = last.map_or(0, |n| n + 1);
            if event.sequence_number() != expected {
                return Err(DomainError::InvalidHistory(format!(
                    "expected sequence number {expected} for {} {}, found {}",
                    container.aggregate_type(),
                    container.aggregate_id(),
                    event.sequence_number()
                )));
            }
            self.handle(event.message())?;
            last = Some(event.sequence_number());
        }
        if let Some(last) = last {
            self.container_mut().initialize_sequence_number(last)?;
        }
        Ok(())
    }

    /// Events produced since the last commit.
    fn uncommitted_events(&self) -> &[DomainEventMessage<Self::Event>] {
        self.container().events()
    }

    /// Clears uncommitted events once they have been handed off.
    fn commit_events(&mut self) {
        self.container_mut().commit();
    }

    /// Highest sequence number this aggregate has reached.
    fn version(&self) -> Option<i64> {
        self.container().last_sequence_number()
    }
}
