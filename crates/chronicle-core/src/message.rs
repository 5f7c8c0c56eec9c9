//! Event and domain event messages.
//!
//! An [`EventMessage`] wraps a payload with a unique id, a timestamp, and
//! metadata. A [`DomainEventMessage`] additionally records which aggregate
//! produced it and at which position in that aggregate's history. Messages
//! are immutable once built and compare equal only when their ids match.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;

/// Trait that all event payloads implement.
///
/// The payload type tag is persisted next to the encoded payload and handed
/// back to [`Payload::from_tagged`] when the payload is read again, so a
/// closed enum of event kinds can pick its variant from the tag.
pub trait Payload: Serialize + fmt::Debug + Clone + Send + Sync + 'static {
    /// Stable type tag for this payload (e.g. `orders::ItemAddedEvent`).
    fn payload_type(&self) -> &str;

    /// Rebuilds a payload from its persisted type tag and decoded structure.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag is unknown or the structure does not match
    /// the tagged type.
    fn from_tagged(payload_type: &str, data: serde_json::Value) -> Result<Self, serde_json::Error>;
}

/// A payload whose concrete type is unknown to the reader.
///
/// Useful for tooling that follows the whole log without linking every
/// aggregate's event types.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPayload {
    payload_type: String,
    data: serde_json::Value,
}

impl JsonPayload {
    /// Creates a payload from a type tag and its decoded structure.
    #[must_use]
    pub fn new(payload_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            payload_type: payload_type.into(),
            data,
        }
    }

    /// Returns the decoded structure.
    #[must_use]
    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }
}

impl Serialize for JsonPayload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

impl Payload for JsonPayload {
    fn payload_type(&self) -> &str {
        &self.payload_type
    }

    fn from_tagged(payload_type: &str, data: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(Self::new(payload_type, data))
    }
}

/// Ordered string-keyed metadata attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, serde_json::Value>);

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of this metadata with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Looks up a single entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Returns a new map holding both sets of entries; `other` wins on clashes.
    #[must_use]
    pub fn merge(&self, other: &Metadata) -> Metadata {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Metadata(merged)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no entries are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, serde_json::Value)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A single occurrence: payload plus identity, time, and metadata.
#[derive(Debug, Clone)]
pub struct EventMessage<P> {
    id: Uuid,
    timestamp: DateTime<Utc>,
    payload: P,
    metadata: Metadata,
}

impl<P> EventMessage<P> {
    /// Creates a message with a fresh id, stamped by `clock`.
    pub fn new(payload: P, metadata: Metadata, clock: &dyn Clock) -> Self {
        Self::from_parts(Uuid::new_v4(), clock.now(), payload, metadata)
    }

    /// Rebuilds a message from already-known parts.
    ///
    /// The timestamp is truncated to microseconds, the precision the log keeps.
    pub fn from_parts(id: Uuid, timestamp: DateTime<Utc>, payload: P, metadata: Metadata) -> Self {
        Self {
            id,
            timestamp: timestamp.trunc_subsecs(6),
            payload,
            metadata,
        }
    }

    /// Unique event identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Time the event was created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The event payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Metadata attached at creation.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl<P: Payload> EventMessage<P> {
    /// Type tag of the payload.
    pub fn payload_type(&self) -> &str {
        self.payload.payload_type()
    }
}

impl<P> PartialEq for EventMessage<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<P> Eq for EventMessage<P> {}

/// An [`EventMessage`] produced by an aggregate, tagged with its identity and
/// position in that aggregate's history.
#[derive(Debug, Clone)]
pub struct DomainEventMessage<P> {
    aggregate_type: String,
    aggregate_id: String,
    sequence_number: i64,
    message: EventMessage<P>,
}

impl<P> DomainEventMessage<P> {
    /// Tags `message` with aggregate identity and sequence number.
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        sequence_number: i64,
        message: EventMessage<P>,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            sequence_number,
            message,
        }
    }

    /// The aggregate kind that produced the event.
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// The aggregate instance that produced the event.
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// Zero-based position in the aggregate's history.
    pub fn sequence_number(&self) -> i64 {
        self.sequence_number
    }

    /// The untagged message.
    pub fn message(&self) -> &EventMessage<P> {
        &self.message
    }

    /// Unique event identifier.
    pub fn id(&self) -> Uuid {
        self.message.id
    }

    /// Time the event was created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.message.timestamp
    }

    /// The event payload.
    pub fn payload(&self) -> &P {
        &self.message.payload
    }

    /// Metadata attached at creation.
    pub fn metadata(&self) -> &Metadata {
        &self.message.metadata
    }
}

impl<P: Payload> DomainEventMessage<P> {
    /// Type tag of the payload.
    pub fn payload_type(&self) -> &str {
        self.message.payload_type()
    }
}

impl<P> PartialEq for DomainEventMessage<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<P> Eq for DomainEventMessage<P> {}

/// Any message the event log can hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<P> {
    /// An event not tied to an aggregate.
    Event(EventMessage<P>),
    /// An event produced by an aggregate.
    DomainEvent(DomainEventMessage<P>),
}

impl<P> Message<P> {
    /// The underlying event message.
    pub fn event(&self) -> &EventMessage<P> {
        match self {
            Self::Event(message) => message,
            Self::DomainEvent(event) => event.message(),
        }
    }

    /// Returns the domain event when this message carries aggregate fields.
    pub fn as_domain_event(&self) -> Option<&DomainEventMessage<P>> {
        match self {
            Self::Event(_) => None,
            Self::DomainEvent(event) => Some(event),
        }
    }

    /// Unique event identifier.
    pub fn id(&self) -> Uuid {
        self.event().id()
    }

    /// Time the event was created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.event().timestamp()
    }

    /// The event payload.
    pub fn payload(&self) -> &P {
        self.event().payload()
    }

    /// Metadata attached at creation.
    pub fn metadata(&self) -> &Metadata {
        self.event().metadata()
    }
}

impl<P> From<EventMessage<P>> for Message<P> {
    fn from(message: EventMessage<P>) -> Self {
        Self::Event(message)
    }
}

impl<P> From<DomainEventMessage<P>> for Message<P> {
    fn from(event: DomainEventMessage<P>) -> Self {
        Self::DomainEvent(event)
    }
}
