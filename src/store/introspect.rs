//! Schema discovery from the live store.

use crate::otel::{db_query_span, record_db_metrics, DbOperation};
use crate::types::{AskError, Result, Schema, TableSchema};
use rusqlite::Connection;

const TABLES_QUERY: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY rowid";

fn connection_error(e: rusqlite::Error) -> AskError {
    AskError::ConnectionError(format!("schema introspection failed: {}", e))
}

/// Read every user table and its columns in declared order.
///
/// Internal `sqlite_*` tables are skipped. An empty store gives an empty
/// schema.
///
/// # Errors
///
/// Returns `AskError::ConnectionError` on any SQLite failure
pub fn introspect(conn: &Connection) -> Result<Schema> {
    let span = db_query_span(DbOperation::Introspect, TABLES_QUERY);
    let _guard = span.enter();

    let mut tables_stmt = conn.prepare(TABLES_QUERY).map_err(connection_error)?;
    let names = tables_stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(connection_error)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(connection_error)?;

    let mut columns_stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(connection_error)?;

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let columns = columns_stmt
            .query_map([&name], |row| row.get::<_, String>(0))
            .map_err(connection_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(connection_error)?;
        tables.push(TableSchema::new(name, columns));
    }

    record_db_metrics(Some(tables.len()), None);
    tracing::debug!(tables = tables.len(), "introspected schema");
    Ok(Schema::new(tables))
}

/// SQLite's schema cookie; changes whenever any table is created, altered or dropped.
pub fn schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("PRAGMA schema_version", [], |row| row.get(0))
        .map_err(connection_error)
}
