//! Runtime configuration read from the environment.

use std::time::Duration;

use uuid::Uuid;

use chronicle_event_store::schema::DEFAULT_TABLE;

use crate::error::AppError;

/// Settings for one tail session.
#[derive(Debug, Clone, PartialEq)]
pub struct TailConfig {
    /// `PostgreSQL` connection string.
    pub database_url: String,
    /// Event table to follow.
    pub event_table: String,
    /// Resume strictly after this event, if set.
    pub cursor: Option<Uuid>,
    /// Pause between polls once the end of the log is reached.
    pub poll_interval: Duration,
    /// Connection pool size.
    pub max_connections: u32,
    /// Keep polling at the end of the log instead of exiting.
    pub follow: bool,
}

impl TailConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let database_url = lookup("DATABASE_URL").ok_or_else(|| {
            AppError::Config("DATABASE_URL environment variable must be set".into())
        })?;
        let event_table = lookup("EVENT_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string());
        let cursor = lookup("CURSOR_EVENT_ID")
            .filter(|value| !value.is_empty())
            .map(|value| {
                Uuid::parse_str(&value)
                    .map_err(|e| AppError::Config(format!("CURSOR_EVENT_ID must be a UUID: {e}")))
            })
            .transpose()?;
        let poll_interval_ms: u64 = parse_or(&lookup, "POLL_INTERVAL_MS", 1000)?;
        let max_connections: u32 = parse_or(&lookup, "MAX_CONNECTIONS", 5)?;
        let follow: bool = parse_or(&lookup, "FOLLOW", true)?;

        Ok(Self {
            database_url,
            event_table,
            cursor,
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_connections,
            follow,
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => value
            .parse()
            .map_err(|e| AppError::Config(format!("{key} must be a valid value: {e}"))),
        None => Ok(default),
    }
}
