//! Storage-driver boundary for the event log.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use uuid::Uuid;

use crate::error::DomainError;

/// Storage-assigned, monotonically increasing position of a record.
///
/// Only used for ordering and cursoring, never as business identity.
pub type RowId = i64;

/// Persisted representation of an event message.
///
/// The timestamp is split into whole seconds and a separate microsecond
/// component so backends without sub-second columns keep full precision.
/// Aggregate fields are all present for domain events and all absent for
/// plain events.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Event creation time, truncated to whole seconds.
    pub event_timestamp: DateTime<Utc>,
    /// Microsecond component of the creation time.
    pub event_timestamp_us: i32,
    /// Aggregate kind, for domain events.
    pub aggregate_type: Option<String>,
    /// Aggregate instance, for domain events.
    pub aggregate_id: Option<String>,
    /// Position within the aggregate stream, for domain events.
    pub sequence_number: Option<i64>,
    /// Payload type tag used to rebuild the payload.
    pub payload_type: String,
    /// Encoded payload.
    pub payload: String,
    /// Encoded metadata.
    pub metadata: String,
}

impl EventRecord {
    /// Splits a timestamp into whole seconds and microseconds.
    #[must_use]
    pub fn split_timestamp(timestamp: DateTime<Utc>) -> (DateTime<Utc>, i32) {
        let micros = i32::try_from(timestamp.timestamp_subsec_micros()).unwrap_or(0);
        (timestamp.trunc_subsecs(0), micros)
    }

    /// Rejoins the stored timestamp parts.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the microsecond component is
    /// out of range.
    pub fn timestamp(&self) -> Result<DateTime<Utc>, DomainError> {
        if !(0..2_000_000).contains(&self.event_timestamp_us) {
            return Err(DomainError::Serialization(format!(
                "event {} has invalid microsecond component {}",
                self.event_id, self.event_timestamp_us
            )));
        }
        Ok(self.event_timestamp.trunc_subsecs(0)
            + TimeDelta::microseconds(i64::from(self.event_timestamp_us)))
    }

    /// The `(aggregate_type, aggregate_id, sequence_number)` key of a domain
    /// event record.
    #[must_use]
    pub fn stream_key(&self) -> Option<(&str, &str, i64)> {
        match (&self.aggregate_type, &self.aggregate_id, self.sequence_number) {
            (Some(aggregate_type), Some(aggregate_id), Some(sequence_number)) => {
                Some((aggregate_type, aggregate_id, sequence_number))
            }
            _ => None,
        }
    }
}

/// An append-only table of event records.
///
/// Implementations must enforce uniqueness of the stream key and report a
/// violation as `DomainError::ConcurrencyConflict`; every other failure is a
/// `DomainError::StorageFailure`.
#[async_trait]
pub trait EventTable: Send + Sync {
    /// Appends one record and returns its row id.
    async fn insert(&self, record: &EventRecord) -> Result<RowId, DomainError>;

    /// Appends all records in one unit of work: either every record is
    /// stored or none is.
    async fn insert_all(&self, records: &[EventRecord]) -> Result<Vec<RowId>, DomainError>;

    /// Highest row id in the table, `0` when empty.
    async fn max_row_id(&self) -> Result<RowId, DomainError>;

    /// Up to `limit` records with row id `>= first`, ordered by row id.
    async fn fetch_from(
        &self,
        first: RowId,
        limit: u32,
    ) -> Result<Vec<(RowId, EventRecord)>, DomainError>;

    /// Up to `limit` records with row id `> after`, ordered by row id.
    async fn fetch_after(
        &self,
        after: RowId,
        limit: u32,
    ) -> Result<Vec<(RowId, EventRecord)>, DomainError>;

    /// All records of one aggregate stream, ordered by sequence number.
    async fn fetch_stream(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Vec<EventRecord>, DomainError>;

    /// Row id of the record holding `event_id`, if any.
    async fn find_row_id(&self, event_id: Uuid) -> Result<Option<RowId>, DomainError>;
}
