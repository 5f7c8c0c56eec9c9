//! Chronicle tail entry point.
//!
//! Follows the event log in row order and prints one JSON line per event on
//! standard output. Progress is logged to standard error; the last printed
//! event id can be fed back through `CURSOR_EVENT_ID` to resume.

use std::io::Write;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use chronicle_core::error::DomainError;
use chronicle_core::message::{JsonPayload, Message, Metadata};
use chronicle_event_store::{EventStore, PgEventTable};

mod config;
mod error;

use config::TailConfig;
use error::AppError;

/// One output line.
#[derive(Debug, Serialize)]
struct TailLine<'a> {
    event_id: Uuid,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aggregate_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aggregate_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_number: Option<i64>,
    payload_type: &'a str,
    payload: &'a serde_json::Value,
    metadata: &'a Metadata,
}

impl<'a> From<&'a Message<JsonPayload>> for TailLine<'a> {
    fn from(message: &'a Message<JsonPayload>) -> Self {
        let domain = message.as_domain_event();
        let event = message.event();
        Self {
            event_id: event.id(),
            timestamp: event.timestamp(),
            aggregate_type: domain.map(|d| d.aggregate_type()),
            aggregate_id: domain.map(|d| d.aggregate_id()),
            sequence_number: domain.map(|d| d.sequence_number()),
            payload_type: event.payload_type(),
            payload: event.payload().data(),
            metadata: event.metadata(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the events.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "chronicle-tail stopped");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run() -> Result<(), AppError> {
    let config = TailConfig::from_env()?;
    tracing::info!(
        table = %config.event_table,
        cursor = ?config.cursor,
        follow = config.follow,
        "Starting chronicle tail"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    let table = PgEventTable::with_table(pool, config.event_table.clone());
    table.ensure_schema().await?;
    let store = EventStore::new(table);

    let mut stream = store.iterate::<JsonPayload>(config.cursor).await?;
    let mut stdout = std::io::stdout().lock();
    let mut printed: u64 = 0;

    loop {
        let next = tokio::select! {
            next = stream.next() => next?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        };
        match next {
            Some(message) => {
                serde_json::to_writer(&mut stdout, &TailLine::from(&message))
                    .map_err(DomainError::from)?;
                writeln!(stdout)?;
                printed += 1;
            }
            None if config.follow => {
                stdout.flush()?;
                tokio::time::sleep(config.poll_interval).await;
            }
            None => break,
        }
    }

    stdout.flush()?;
    tracing::info!(
        printed,
        last_event_id = ?stream.last_event_id(),
        "chronicle tail finished"
    );
    Ok(())
}
