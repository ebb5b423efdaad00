//! Store session.

use crate::store::{self, IngestStatus, QueryExecutor};
use crate::types::{AskError, ExecutionOutcome, Result, Schema};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Exclusive owner of one store connection and its schema snapshot.
///
/// The connection is released by [`Session::close`] or when the session is
/// dropped.
pub struct Session {
    conn: Connection,
    path: Option<PathBuf>,
    schema: Schema,
    schema_version: i64,
}

impl Session {
    /// Open an existing store file.
    ///
    /// # Errors
    ///
    /// Returns `AskError::ConnectionError` if the file is missing, is not a
    /// database, or cannot be introspected
    pub fn open(path: &Path) -> Result<Self> {
        let conn = store::connect(path)?;
        let mut session = Self::from_connection(conn)?;
        session.path = Some(path.to_path_buf());
        Ok(session)
    }

    /// Wrap an already open connection.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        let schema_version = store::schema_version(&conn)?;
        let schema = store::introspect(&conn)?;
        tracing::debug!(tables = schema.tables.len(), schema_version, "session schema loaded");
        Ok(Self {
            conn,
            path: None,
            schema,
            schema_version,
        })
    }

    /// Private in-memory store.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(store::connect_in_memory()?)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current schema, re-introspected if the store's schema changed.
    pub fn schema(&mut self) -> Result<&Schema> {
        let version = store::schema_version(&self.conn)?;
        if version != self.schema_version {
            self.schema = store::introspect(&self.conn)?;
            tracing::debug!(
                from = self.schema_version,
                to = version,
                tables = self.schema.tables.len(),
                "schema changed, snapshot refreshed"
            );
            self.schema_version = version;
        }
        Ok(&self.schema)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run a statement batch on this session's connection.
    pub fn execute(&mut self, executor: &QueryExecutor, text: &str) -> Result<ExecutionOutcome> {
        executor.execute(&mut self.conn, text)
    }

    /// Import a CSV file into `table`.
    pub fn ingest_csv(&mut self, path: &Path, table: &str) -> IngestStatus {
        store::ingest_csv(&mut self.conn, path, table)
    }

    /// Close the connection, reporting any error SQLite raises.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| AskError::ConnectionError(format!("close failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_refreshes_after_change() {
        let mut session = Session::in_memory().unwrap();
        assert!(session.schema().unwrap().is_empty());

        session
            .connection()
            .execute_batch("CREATE TABLE items (name TEXT, price REAL);")
            .unwrap();

        let schema = session.schema().unwrap();
        assert_eq!(schema.table_names().collect::<Vec<_>>(), vec!["items"]);
    }

    #[test]
    fn test_open_missing_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Session::open(&dir.path().join("none.sqlite")).err().unwrap();
        assert!(err.is_fatal_to_session());
    }

    #[test]
    fn test_close() {
        let session = Session::in_memory().unwrap();
        assert!(session.close().is_ok());
    }
}
