//! `PostgreSQL` implementation of the `EventTable` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use chronicle_core::error::DomainError;
use chronicle_core::table::{EventRecord, EventTable, RowId};

use crate::schema;

const COLUMNS: &str = "event_id, event_timestamp, event_timestamp_us, aggregate_type, \
                       aggregate_id, sequence_number, payload_type, payload, metadata";

/// One stored row as read back from the table.
#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    row_id: i64,
    event_id: Uuid,
    event_timestamp: DateTime<Utc>,
    event_timestamp_us: i32,
    aggregate_type: Option<String>,
    aggregate_id: Option<String>,
    sequence_number: Option<i64>,
    payload_type: String,
    payload: String,
    metadata: String,
}

impl EventRow {
    fn into_record(self) -> (RowId, EventRecord) {
        let record = EventRecord {
            event_id: self.event_id,
            event_timestamp: self.event_timestamp,
            event_timestamp_us: self.event_timestamp_us,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            sequence_number: self.sequence_number,
            payload_type: self.payload_type,
            payload: self.payload,
            metadata: self.metadata,
        };
        (self.row_id, record)
    }
}

/// PostgreSQL-backed event table.
#[derive(Debug, Clone)]
pub struct PgEventTable {
    pool: PgPool,
    table: String,
    quoted: String,
}

impl PgEventTable {
    /// Creates a table handle on the default `chronicle_event` table.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_table(pool, schema::DEFAULT_TABLE)
    }

    /// Creates a table handle on a custom table.
    #[must_use]
    pub fn with_table(pool: PgPool, table: impl Into<String>) -> Self {
        let table = table.into();
        let quoted = schema::quote_ident(&table);
        Self {
            pool,
            table,
            quoted,
        }
    }

    /// The unquoted table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// The connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the table and its indexes if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StorageFailure` if any DDL statement fails.
    #[tracing::instrument(skip(self), fields(table = %self.table))]
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        for statement in schema::create_statements(&self.table) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| DomainError::StorageFailure(e.to_string()))?;
        }
        Ok(())
    }

    async fn insert_with<'e, E>(&self, executor: E, record: &EventRecord) -> Result<RowId, DomainError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            "INSERT INTO {} ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING row_id",
            self.quoted
        );
        sqlx::query_scalar::<_, i64>(&sql)
            .bind(record.event_id)
            .bind(record.event_timestamp)
            .bind(record.event_timestamp_us)
            .bind(record.aggregate_type.as_deref())
            .bind(record.aggregate_id.as_deref())
            .bind(record.sequence_number)
            .bind(&record.payload_type)
            .bind(&record.payload)
            .bind(&record.metadata)
            .fetch_one(executor)
            .await
            .map_err(|e| self.insert_error(e, record))
    }

    /// Maps a failed insert: a unique violation on the stream index is a
    /// concurrency conflict, anything else a storage failure.
    fn insert_error(&self, err: sqlx::Error, record: &EventRecord) -> DomainError {
        let stream_index = schema::stream_index_name(&self.table);
        let on_stream_index = err.as_database_error().is_some_and(|db_err| {
            db_err.is_unique_violation() && db_err.constraint() == Some(stream_index.as_str())
        });
        match record.stream_key() {
            Some((aggregate_type, aggregate_id, sequence_number)) if on_stream_index => {
                tracing::warn!(
                    aggregate_type,
                    aggregate_id,
                    sequence_number,
                    "stream position already taken"
                );
                DomainError::ConcurrencyConflict {
                    aggregate_type: aggregate_type.to_owned(),
                    aggregate_id: aggregate_id.to_owned(),
                    sequence_number,
                }
            }
            _ => DomainError::StorageFailure(err.to_string()),
        }
    }

    async fn fetch_rows(
        &self,
        predicate: &str,
        row_id: RowId,
        limit: u32,
    ) -> Result<Vec<(RowId, EventRecord)>, DomainError> {
        let sql = format!(
            "SELECT row_id, {COLUMNS} FROM {} WHERE row_id {predicate} $1 ORDER BY row_id ASC LIMIT $2",
            self.quoted
        );
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(row_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::StorageFailure(e.to_string()))?;
        tracing::debug!(fetched = rows.len(), row_id, predicate, "fetched event batch");
        Ok(rows.into_iter().map(EventRow::into_record).collect())
    }
}

#[async_trait]
impl EventTable for PgEventTable {
    #[tracing::instrument(skip(self, record), fields(table = %self.table, event_id = %record.event_id))]
    async fn insert(&self, record: &EventRecord) -> Result<RowId, DomainError> {
        self.insert_with(&self.pool, record).await
    }

    #[tracing::instrument(skip(self, records), fields(table = %self.table, records_len = records.len()))]
    async fn insert_all(&self, records: &[EventRecord]) -> Result<Vec<RowId>, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DomainError::StorageFailure(e.to_string()))?;

        let mut row_ids = Vec::with_capacity(records.len());
        for record in records {
            // Dropping `tx` on error rolls the whole batch back.
            row_ids.push(self.insert_with(&mut *tx, record).await?);
        }

        tx.commit()
            .await
            .map_err(|e| DomainError::StorageFailure(e.to_string()))?;
        Ok(row_ids)
    }

    async fn max_row_id(&self) -> Result<RowId, DomainError> {
        let sql = format!("SELECT COALESCE(MAX(row_id), 0) FROM {}", self.quoted);
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DomainError::StorageFailure(e.to_string()))
    }

    async fn fetch_from(
        &self,
        first: RowId,
        limit: u32,
    ) -> Result<Vec<(RowId, EventRecord)>, DomainError> {
        self.fetch_rows(">=", first, limit).await
    }

    async fn fetch_after(
        &self,
        after: RowId,
        limit: u32,
    ) -> Result<Vec<(RowId, EventRecord)>, DomainError> {
        self.fetch_rows(">", after, limit).await
    }

    #[tracing::instrument(skip(self), fields(table = %self.table))]
    async fn fetch_stream(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let sql = format!(
            "SELECT row_id, {COLUMNS} FROM {} \
             WHERE aggregate_type = $1 AND aggregate_id = $2 ORDER BY sequence_number ASC",
            self.quoted
        );
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(aggregate_type)
            .bind(aggregate_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::StorageFailure(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_record().1)
            .collect())
    }

    async fn find_row_id(&self, event_id: Uuid) -> Result<Option<RowId>, DomainError> {
        let sql = format!("SELECT row_id FROM {} WHERE event_id = $1", self.quoted);
        sqlx::query_scalar::<_, i64>(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::StorageFailure(e.to_string()))
    }
}
