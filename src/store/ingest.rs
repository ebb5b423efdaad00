//! Spreadsheet (CSV) import into a single store table.
//!
//! Ingestion reports failure as a status value rather than an error so the
//! caller can show the message next to the upload.

use crate::otel::{db_query_span, record_db_metrics, DbOperation};
use crate::sql::lexer::quote_ident;
use crate::types::{AskError, Result};
use rusqlite::types::Value;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

/// Table name used when the caller does not choose one.
pub const DEFAULT_TABLE: &str = "imported_data";

/// Result of an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestStatus {
    pub success: bool,
    pub message: String,
    /// Rows inserted (0 on failure)
    pub rows: usize,
}

impl IngestStatus {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            rows: 0,
        }
    }
}

/// Column type inferred from every non-empty cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Affinity {
    Integer,
    Real,
    Text,
}

impl Affinity {
    fn infer<'a>(cells: impl Iterator<Item = &'a str>) -> Self {
        let mut affinity = Self::Integer;
        for cell in cells.filter(|c| !c.is_empty()) {
            if affinity == Self::Integer && cell.parse::<i64>().is_ok() {
                continue;
            }
            if cell.parse::<f64>().is_ok_and(f64::is_finite) {
                affinity = Self::Real;
                continue;
            }
            return Self::Text;
        }
        affinity
    }

    fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }

    fn value(&self, cell: &str) -> Value {
        if cell.is_empty() {
            return Value::Null;
        }
        match self {
            Self::Integer => cell.parse().map(Value::Integer).unwrap_or_else(|_| Value::Text(cell.to_string())),
            Self::Real => cell.parse().map(Value::Real).unwrap_or_else(|_| Value::Text(cell.to_string())),
            Self::Text => Value::Text(cell.to_string()),
        }
    }
}

/// Import `path` into `table`, replacing any previous table of that name.
pub fn ingest_csv(conn: &mut Connection, path: &Path, table: &str) -> IngestStatus {
    match try_ingest(conn, path, table) {
        Ok(rows) => {
            tracing::info!(path = %path.display(), table, rows, "imported spreadsheet");
            IngestStatus {
                success: true,
                message: format!("Imported {} rows into '{}'", rows, table),
                rows,
            }
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "spreadsheet import failed");
            IngestStatus::failed(e.to_string())
        }
    }
}

fn try_ingest(conn: &mut Connection, path: &Path, table: &str) -> Result<usize> {
    if table.trim().is_empty() {
        return Err(AskError::IngestError("table name is empty".to_string()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;

    let columns = column_names(reader.headers()?);
    if columns.is_empty() {
        return Err(AskError::IngestError("file has no header row".to_string()));
    }

    let records = reader
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let affinities: Vec<Affinity> = (0..columns.len())
        .map(|i| Affinity::infer(records.iter().map(|r| r.get(i).unwrap_or(""))))
        .collect();

    let quoted = quote_ident(table);
    let definition = columns
        .iter()
        .zip(&affinities)
        .map(|(c, a)| format!("{} {}", quote_ident(c), a.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    let insert = format!("INSERT INTO {} VALUES ({})", quoted, placeholders);

    let span = db_query_span(DbOperation::Ingest, &insert);
    let _guard = span.enter();
    let store_error = |e: rusqlite::Error| AskError::IngestError(e.to_string());

    let tx = conn.transaction().map_err(store_error)?;
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {quoted}; CREATE TABLE {quoted} ({definition});"
    ))
    .map_err(store_error)?;

    {
        let mut stmt = tx.prepare(&insert).map_err(store_error)?;
        for record in &records {
            let values: Vec<Value> = affinities
                .iter()
                .enumerate()
                .map(|(i, a)| a.value(record.get(i).unwrap_or("")))
                .collect();
            stmt.execute(rusqlite::params_from_iter(values))
                .map_err(store_error)?;
        }
    }
    tx.commit().map_err(store_error)?;

    record_db_metrics(None, Some(records.len() as u64));
    Ok(records.len())
}

/// Header names with blanks filled in and duplicates suffixed.
fn column_names(headers: &csv::StringRecord) -> Vec<String> {
    let mut seen = HashSet::new();
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let base = if h.is_empty() {
                format!("column_{}", i + 1)
            } else {
                h.to_string()
            };
            let mut name = base.clone();
            let mut n = 2;
            while !seen.insert(name.to_lowercase()) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}
