//! SQLite store access.
//!
//! The store is a single SQLite file holding the imported price list / stock
//! tables. Everything here is synchronous; a session owns its connection.

pub mod executor;
pub mod ingest;
pub mod introspect;

pub use executor::{QueryExecutor, ReadPolicy};
pub use ingest::{ingest_csv, IngestStatus, DEFAULT_TABLE};
pub use introspect::{introspect, schema_version};

use crate::types::{AskError, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// Open an existing store.
///
/// # Errors
///
/// Returns `AskError::ConnectionError` if the file does not exist or is not a
/// usable SQLite database
pub fn connect(path: &Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    let conn = Connection::open_with_flags(path, flags)
        .map_err(|e| AskError::ConnectionError(format!("{}: {}", path.display(), e)))?;

    // Opening is lazy; touch the schema so a non-database file fails here.
    schema_version(&conn)?;
    tracing::info!(path = %path.display(), "opened store");
    Ok(conn)
}

/// Open a store, creating the file if needed (used by ingestion).
pub fn connect_or_create(path: &Path) -> Result<Connection> {
    Connection::open(path)
        .map_err(|e| AskError::ConnectionError(format!("{}: {}", path.display(), e)))
}

/// Private in-memory store.
pub fn connect_in_memory() -> Result<Connection> {
    Connection::open_in_memory().map_err(|e| AskError::ConnectionError(e.to_string()))
}
