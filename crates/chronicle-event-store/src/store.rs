//! The append-only event store.
//!
//! [`EventStore`] turns messages into [`EventRecord`]s through a pluggable
//! [`EventSerializer`] and hands them to an [`EventTable`]. Reads come back in
//! row order, either one page at a time ([`EventStore::read`]) or as a
//! resumable cursor over the whole log ([`EventStore::iterate`]).

use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Mutex;

use uuid::Uuid;

use chronicle_core::aggregate::EventSourcedAggregate;
use chronicle_core::error::DomainError;
use chronicle_core::message::{DomainEventMessage, EventMessage, Message, Payload};
use chronicle_core::serializer::{EventSerializer, JsonSerializer};
use chronicle_core::table::{EventRecord, EventTable, RowId};

/// Page size used by [`EventStore::read`] when callers have no preference.
pub const DEFAULT_READ_LIMIT: u32 = 10;

/// Number of records [`EventStream`] fetches per round trip.
pub const BATCH_SIZE: u32 = 100;

/// Append-only log of event messages over a storage driver.
#[derive(Debug)]
pub struct EventStore<T, S = JsonSerializer> {
    table: T,
    serializer: S,
    // Most recent cursor resolution: `(event_id, row_id)`.
    cursor_cache: Mutex<Option<(Uuid, RowId)>>,
}

impl<T: EventTable> EventStore<T, JsonSerializer> {
    /// Creates a store encoding payloads as JSON.
    pub fn new(table: T) -> Self {
        Self::with_serializer(table, JsonSerializer)
    }
}

impl<T: EventTable, S: EventSerializer> EventStore<T, S> {
    /// Creates a store with a custom codec.
    pub fn with_serializer(table: T, serializer: S) -> Self {
        Self {
            table,
            serializer,
            cursor_cache: Mutex::new(None),
        }
    }

    /// The storage driver.
    pub fn table(&self) -> &T {
        &self.table
    }

    /// The payload codec.
    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Appends one event message or domain event message to the log.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if a domain event's stream
    /// position is already taken, `DomainError::Serialization` if the payload
    /// or metadata cannot be encoded, and `DomainError::StorageFailure` on
    /// driver failure.
    #[tracing::instrument(skip(self, message), fields(event_id = %message.id()))]
    pub async fn store<P: Payload>(&self, message: &Message<P>) -> Result<RowId, DomainError> {
        let record = match message {
            Message::Event(event) => self.encode_record(event, None)?,
            Message::DomainEvent(event) => self.domain_record(event)?,
        };
        let row_id = self.table.insert(&record).await?;
        tracing::debug!(row_id, payload_type = %record.payload_type, "stored event");
        Ok(row_id)
    }

    /// Appends a batch of domain events atomically: either every event is
    /// stored or none is. Returns the row ids in input order.
    ///
    /// # Errors
    ///
    /// Same as [`store`](Self::store). On error nothing from the batch is
    /// stored.
    #[tracing::instrument(skip(self, events), fields(events_len = events.len()))]
    pub async fn append<P: Payload>(
        &self,
        events: &[DomainEventMessage<P>],
    ) -> Result<Vec<RowId>, DomainError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let records = events
            .iter()
            .map(|event| self.domain_record(event))
            .collect::<Result<Vec<_>, _>>()?;
        let row_ids = self.table.insert_all(&records).await?;
        tracing::debug!(appended = row_ids.len(), "appended events");
        Ok(row_ids)
    }

    /// Returns up to `limit` consecutive records ordered by row id, starting
    /// at `offset`.
    ///
    /// Without an offset the last page is returned, aligned on a `limit`
    /// boundary: `offset = ((max_row_id - 1) / limit) * limit + 1`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageFailure` on driver failure and
    /// `DomainError::Serialization` if a record cannot be decoded.
    #[tracing::instrument(skip(self))]
    pub async fn read<P: Payload>(
        &self,
        offset: Option<RowId>,
        limit: u32,
    ) -> Result<BTreeMap<RowId, Message<P>>, DomainError> {
        if limit == 0 {
            return Ok(BTreeMap::new());
        }
        let first = match offset {
            Some(offset) => offset,
            None => {
                let max = self.table.max_row_id().await?;
                if max < 1 {
                    return Ok(BTreeMap::new());
                }
                last_page_offset(max, limit)
            }
        };
        self.table
            .fetch_from(first, limit)
            .await?
            .into_iter()
            .map(|(row_id, record)| Ok((row_id, self.decode_record(record)?)))
            .collect()
    }

    /// Opens a forward-only cursor over the whole log, in row order.
    ///
    /// With a cursor event id the stream resumes strictly after the row
    /// holding that event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotFound` if the cursor event id is not stored,
    /// and `DomainError::StorageFailure` on driver failure.
    #[tracing::instrument(skip(self))]
    pub async fn iterate<P: Payload>(
        &self,
        cursor: Option<Uuid>,
    ) -> Result<EventStream<'_, T, S, P>, DomainError> {
        let after = match cursor {
            Some(event_id) => self.resolve_cursor(event_id).await?,
            None => 0,
        };
        Ok(EventStream {
            store: self,
            after,
            buffer: VecDeque::new(),
            last_event_id: cursor,
            _payload: PhantomData,
        })
    }

    /// Loads one aggregate stream, ordered by sequence number.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageFailure` on driver failure and
    /// `DomainError::Serialization` if a record cannot be decoded or lacks
    /// aggregate fields.
    #[tracing::instrument(skip(self))]
    pub async fn load_stream<P: Payload>(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Vec<DomainEventMessage<P>>, DomainError> {
        let records = self.table.fetch_stream(aggregate_type, aggregate_id).await?;
        records
            .into_iter()
            .map(|record| match self.decode_record(record)? {
                Message::DomainEvent(event) => Ok(event),
                Message::Event(event) => Err(DomainError::Serialization(format!(
                    "record {} in stream {aggregate_type} {aggregate_id} has no aggregate fields",
                    event.id()
                ))),
            })
            .collect()
    }

    /// Rebuilds `aggregate` from its stored stream. The aggregate must be
    /// freshly constructed with the identity to load.
    ///
    /// # Errors
    ///
    /// Propagates [`load_stream`](Self::load_stream) errors and the
    /// aggregate's replay errors.
    pub async fn load_aggregate<A: EventSourcedAggregate>(
        &self,
        mut aggregate: A,
    ) -> Result<A, DomainError> {
        let history = self
            .load_stream::<A::Event>(A::AGGREGATE_TYPE, aggregate.aggregate_id())
            .await?;
        aggregate.replay(&history)?;
        tracing::debug!(
            aggregate_type = A::AGGREGATE_TYPE,
            aggregate_id = aggregate.aggregate_id(),
            replayed = history.len(),
            "loaded aggregate"
        );
        Ok(aggregate)
    }

    /// Converts an event message to its persisted form.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload or metadata cannot
    /// be encoded.
    pub fn encode_record<P: Payload>(
        &self,
        message: &EventMessage<P>,
        stream: Option<(&str, &str, i64)>,
    ) -> Result<EventRecord, DomainError> {
        let (event_timestamp, event_timestamp_us) = EventRecord::split_timestamp(message.timestamp());
        Ok(EventRecord {
            event_id: message.id(),
            event_timestamp,
            event_timestamp_us,
            aggregate_type: stream.map(|(aggregate_type, _, _)| aggregate_type.to_owned()),
            aggregate_id: stream.map(|(_, aggregate_id, _)| aggregate_id.to_owned()),
            sequence_number: stream.map(|(_, _, sequence_number)| sequence_number),
            payload_type: message.payload_type().to_owned(),
            payload: self.serializer.serialize(message.payload())?,
            metadata: self.serializer.serialize(message.metadata())?,
        })
    }

    /// Rebuilds a message from its persisted form. Records carrying
    /// aggregate fields become domain events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload or metadata cannot
    /// be decoded, or the rebuilt payload reports a different type tag.
    pub fn decode_record<P: Payload>(&self, record: EventRecord) -> Result<Message<P>, DomainError> {
        let timestamp = record.timestamp()?;
        let payload: P = self
            .serializer
            .deserialize(&record.payload, &record.payload_type)?;
        if payload.payload_type() != record.payload_type {
            return Err(DomainError::Serialization(format!(
                "event {} stored as {} decoded as {}",
                record.event_id,
                record.payload_type,
                payload.payload_type()
            )));
        }
        let metadata = self.serializer.deserialize_metadata(&record.metadata)?;
        let message = EventMessage::from_parts(record.event_id, timestamp, payload, metadata);

        match (record.aggregate_type, record.aggregate_id, record.sequence_number) {
            (Some(aggregate_type), Some(aggregate_id), Some(sequence_number)) => Ok(
                DomainEventMessage::new(aggregate_type, aggregate_id, sequence_number, message)
                    .into(),
            ),
            (None, None, None) => Ok(message.into()),
            _ => Err(DomainError::Serialization(format!(
                "event {} has incomplete aggregate fields",
                record.event_id
            ))),
        }
    }

    fn domain_record<P: Payload>(
        &self,
        event: &DomainEventMessage<P>,
    ) -> Result<EventRecord, DomainError> {
        self.encode_record(
            event.message(),
            Some((event.aggregate_type(), event.aggregate_id(), event.sequence_number())),
        )
    }

    async fn resolve_cursor(&self, event_id: Uuid) -> Result<RowId, DomainError> {
        let cached = *self.lock_cache();
        if let Some((_, row_id)) = cached.filter(|(cached_id, _)| *cached_id == event_id) {
            return Ok(row_id);
        }
        let row_id = self
            .table
            .find_row_id(event_id)
            .await?
            .ok_or(DomainError::NotFound(event_id))?;
        *self.lock_cache() = Some((event_id, row_id));
        Ok(row_id)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Option<(Uuid, RowId)>> {
        // The cache holds plain data, so a poisoned lock is still usable.
        self.cursor_cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// First row id of the last `limit`-aligned page ending at `max_row_id`.
fn last_page_offset(max_row_id: RowId, limit: u32) -> RowId {
    let limit = i64::from(limit);
    ((max_row_id - 1) / limit) * limit + 1
}

/// Forward-only cursor over the event log, opened by
/// [`EventStore::iterate`].
///
/// Records are fetched in batches of [`BATCH_SIZE`], each bounded by the row
/// id after the last one seen, so rows appended between batches are neither
/// skipped nor repeated. Reaching the current end of the log yields `None`;
/// calling [`next`](Self::next) again later picks up rows appended since.
#[derive(Debug)]
pub struct EventStream<'a, T, S, P> {
    store: &'a EventStore<T, S>,
    after: RowId,
    buffer: VecDeque<(RowId, EventRecord)>,
    last_event_id: Option<Uuid>,
    _payload: PhantomData<fn() -> P>,
}

impl<T: EventTable, S: EventSerializer, P: Payload> EventStream<'_, T, S, P> {
    /// Returns the next event, or `None` at the current end of the log.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageFailure` on driver failure and
    /// `DomainError::Serialization` if the next record cannot be decoded. A
    /// record that fails to decode is not consumed.
    pub async fn next(&mut self) -> Result<Option<Message<P>>, DomainError> {
        if self.buffer.is_empty() {
            let batch = self.store.table.fetch_after(self.after, BATCH_SIZE).await?;
            tracing::trace!(after = self.after, fetched = batch.len(), "fetched iterate batch");
            self.buffer.extend(batch);
        }
        let Some((row_id, record)) = self.buffer.front() else {
            return Ok(None);
        };
        let row_id = *row_id;
        let message = self.store.decode_record(record.clone())?;
        self.buffer.pop_front();
        self.after = row_id;
        self.last_event_id = Some(message.id());
        Ok(Some(message))
    }

    /// Id of the last event yielded, or the cursor the stream was opened
    /// with. Pass it to [`EventStore::iterate`] to resume.
    #[must_use]
    pub fn last_event_id(&self) -> Option<Uuid> {
        self.last_event_id
    }

    /// Row id of the last event yielded.
    #[must_use]
    pub fn position(&self) -> RowId {
        self.after
    }
}
