//! Chronicle event store: append-only event log over pluggable storage.
//!
//! [`EventStore`] encodes messages and reads them back by page or by cursor,
//! [`PgEventTable`] is the PostgreSQL storage driver, and [`UnitOfWork`]
//! persists a transaction's events before publishing them.

pub mod pg_event_table;
pub mod schema;
pub mod store;
pub mod unit_of_work;

pub use pg_event_table::PgEventTable;
pub use store::{BATCH_SIZE, DEFAULT_READ_LIMIT, EventStore, EventStream};
pub use unit_of_work::UnitOfWork;
