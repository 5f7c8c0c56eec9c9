//! Event log database schema.

/// Table used when no other name is configured.
pub const DEFAULT_TABLE: &str = "chronicle_event";

/// Quotes `name` as a PostgreSQL identifier.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Name of the unique index guarding `(aggregate_type, aggregate_id,
/// sequence_number)` on `table`.
#[must_use]
pub fn stream_index_name(table: &str) -> String {
    format!("{table}_stream_uniq")
}

/// DDL statements creating the event table and its indexes. Every statement
/// is idempotent, so they can run on startup.
#[must_use]
pub fn create_statements(table: &str) -> Vec<String> {
    let quoted = quote_ident(table);
    vec![
        format!(
            r"CREATE TABLE IF NOT EXISTS {quoted} (
    row_id             BIGSERIAL PRIMARY KEY,
    event_id           UUID NOT NULL UNIQUE,
    event_timestamp    TIMESTAMPTZ NOT NULL,
    event_timestamp_us INTEGER NOT NULL,
    aggregate_type     TEXT NULL,
    aggregate_id       TEXT NULL,
    sequence_number    BIGINT NULL CHECK (sequence_number >= 0),
    payload_type       TEXT NOT NULL,
    payload            TEXT NOT NULL,
    metadata           TEXT NOT NULL
)"
        ),
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {quoted} \
             (aggregate_type, aggregate_id, sequence_number)",
            quote_ident(&stream_index_name(table))
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {quoted} (event_timestamp, event_timestamp_us)",
            quote_ident(&format!("{table}_timestamp_idx"))
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_embedded_quotes() {
        assert_eq!(quote_ident("events"), "\"events\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_create_statements_target_the_configured_table() {
        // Act
        let statements = create_statements("audit_log");

        // Assert
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS \"audit_log\""));
        assert!(statements[1].contains("\"audit_log_stream_uniq\" ON \"audit_log\""));
        assert!(statements[2].contains("(event_timestamp, event_timestamp_us)"));
    }

    #[test]
    fn test_default_migration_matches_generated_schema() {
        let migration = include_str!("../../../migrations/20260101000000_create_chronicle_event.sql");

        for statement in create_statements(DEFAULT_TABLE) {
            assert!(
                migration.contains(&statement),
                "migration is missing: {statement}"
            );
        }
    }
}
