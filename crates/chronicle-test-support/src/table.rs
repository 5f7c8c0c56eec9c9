//! Test tables: in-memory `EventTable` implementations for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::table::{EventRecord, EventTable, RowId};
use uuid::Uuid;

/// An event table kept in memory. Enforces the same uniqueness rules as the
/// PostgreSQL table and counts event-id lookups so cursor caching can be
/// observed.
#[derive(Debug, Default)]
pub struct InMemoryEventTable {
    rows: Mutex<Vec<(RowId, EventRecord)>>,
    row_id_lookups: AtomicUsize,
}

impl InMemoryEventTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every stored row.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn rows(&self) -> Vec<(RowId, EventRecord)> {
        self.rows.lock().unwrap().clone()
    }

    /// Number of `find_row_id` calls served so far.
    pub fn row_id_lookups(&self) -> usize {
        self.row_id_lookups.load(Ordering::SeqCst)
    }

    fn check_unique(
        existing: &[(RowId, EventRecord)],
        record: &EventRecord,
    ) -> Result<(), DomainError> {
        for (_, stored) in existing {
            if stored.event_id == record.event_id {
                return Err(DomainError::StorageFailure(format!(
                    "duplicate event id {}",
                    record.event_id
                )));
            }
            if let Some((aggregate_type, aggregate_id, sequence_number)) = record
                .stream_key()
                .filter(|key| stored.stream_key() == Some(*key))
            {
                return Err(DomainError::ConcurrencyConflict {
                    aggregate_type: aggregate_type.to_owned(),
                    aggregate_id: aggregate_id.to_owned(),
                    sequence_number,
                });
            }
        }
        Ok(())
    }

    fn push(rows: &mut Vec<(RowId, EventRecord)>, record: &EventRecord) -> RowId {
        let row_id = rows.last().map_or(1, |(id, _)| id + 1);
        rows.push((row_id, record.clone()));
        row_id
    }
}

#[async_trait]
impl EventTable for InMemoryEventTable {
    async fn insert(&self, record: &EventRecord) -> Result<RowId, DomainError> {
        let mut rows = self.rows.lock().unwrap();
        Self::check_unique(&rows, record)?;
        Ok(Self::push(&mut rows, record))
    }

    async fn insert_all(&self, records: &[EventRecord]) -> Result<Vec<RowId>, DomainError> {
        let mut rows = self.rows.lock().unwrap();
        let mut staged = rows.clone();
        let mut row_ids = Vec::with_capacity(records.len());
        for record in records {
            Self::check_unique(&staged, record)?;
            row_ids.push(Self::push(&mut staged, record));
        }
        *rows = staged;
        Ok(row_ids)
    }

    async fn max_row_id(&self) -> Result<RowId, DomainError> {
        Ok(self.rows.lock().unwrap().last().map_or(0, |(id, _)| *id))
    }

    async fn fetch_from(
        &self,
        first: RowId,
        limit: u32,
    ) -> Result<Vec<(RowId, EventRecord)>, DomainError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|(id, _)| *id >= first)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_after(
        &self,
        after: RowId,
        limit: u32,
    ) -> Result<Vec<(RowId, EventRecord)>, DomainError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|(id, _)| *id > after)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_stream(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let rows = self.rows.lock().unwrap();
        let mut stream: Vec<EventRecord> = rows
            .iter()
            .filter(|(_, record)| {
                record.aggregate_type.as_deref() == Some(aggregate_type)
                    && record.aggregate_id.as_deref() == Some(aggregate_id)
            })
            .map(|(_, record)| record.clone())
            .collect();
        stream.sort_by_key(|record| record.sequence_number);
        Ok(stream)
    }

    async fn find_row_id(&self, event_id: Uuid) -> Result<Option<RowId>, DomainError> {
        self.row_id_lookups.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|(_, record)| record.event_id == event_id)
            .map(|(id, _)| *id))
    }
}

/// An event table whose every operation fails with a storage error. Useful
/// for testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventTable;

fn connection_refused<T>() -> Result<T, DomainError> {
    Err(DomainError::StorageFailure("connection refused".into()))
}

#[async_trait]
impl EventTable for FailingEventTable {
    async fn insert(&self, _record: &EventRecord) -> Result<RowId, DomainError> {
        connection_refused()
    }

    async fn insert_all(&self, _records: &[EventRecord]) -> Result<Vec<RowId>, DomainError> {
        connection_refused()
    }

    async fn max_row_id(&self) -> Result<RowId, DomainError> {
        connection_refused()
    }

    async fn fetch_from(
        &self,
        _first: RowId,
        _limit: u32,
    ) -> Result<Vec<(RowId, EventRecord)>, DomainError> {
        connection_refused()
    }

    async fn fetch_after(
        &self,
        _after: RowId,
        _limit: u32,
    ) -> Result<Vec<(RowId, EventRecord)>, DomainError> {
        connection_refused()
    }

    async fn fetch_stream(
        &self,
        _aggregate_type: &str,
        _aggregate_id: &str,
    ) -> Result<Vec<EventRecord>, DomainError> {
        connection_refused()
    }

    async fn find_row_id(&self, _event_id: Uuid) -> Result<Option<RowId>, DomainError> {
        connection_refused()
    }
}
