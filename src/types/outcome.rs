//! Execution outcome of one statement batch.

use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Single cell of a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    /// Blob contents are not carried, only their size
    Blob(usize),
}

impl From<ValueRef<'_>> for CellValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(n) => Self::Integer(n),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(bytes) => Self::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Self::Blob(bytes.len()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(n) => write!(f, "{}", n),
            Self::Real(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "{}", s),
            Self::Blob(len) => write!(f, "[BLOB {} bytes]", len),
        }
    }
}

/// What a statement batch returned and changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Column names of the captured READ result
    pub columns: Vec<String>,

    /// Rows of the captured READ result; `None` when the batch had no READ
    pub rows: Option<Vec<Vec<CellValue>>>,

    /// Rows changed by WRITE statements
    pub rows_affected: u64,

    /// Whether the batch transaction was committed
    pub committed: bool,

    /// Number of non-empty statements executed
    pub statements: usize,
}

impl ExecutionOutcome {
    /// Number of captured rows (0 when nothing was captured).
    pub fn row_count(&self) -> usize {
        self.rows.as_ref().map_or(0, Vec::len)
    }

    /// `true` when no rows came back and nothing was changed.
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0 && self.rows_affected == 0
    }

    /// Render up to `limit` rows as a plain-text table.
    pub fn render_table(&self, limit: usize) -> String {
        let Some(rows) = &self.rows else {
            return String::new();
        };

        let shown: Vec<Vec<String>> = rows
            .iter()
            .take(limit)
            .map(|row| row.iter().map(ToString::to_string).collect())
            .collect();

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &shown {
            for (i, cell) in row.iter().enumerate() {
                let len = cell.chars().count();
                match widths.get_mut(i) {
                    Some(w) => *w = (*w).max(len),
                    None => widths.push(len),
                }
            }
        }

        let pad = |cells: &[String]| -> String {
            cells
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{:<width$}", c, width = widths.get(i).copied().unwrap_or(0)))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut out = String::new();
        out.push_str(&pad(&self.columns));
        out.push('\n');
        out.push_str(
            &widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        out.push('\n');
        for row in &shown {
            out.push_str(&pad(row));
            out.push('\n');
        }
        if rows.len() > limit {
            out.push_str(&format!("... {} more rows\n", rows.len() - limit));
        }
        out
    }
}
