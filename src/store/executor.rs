//! Statement batch execution.

use crate::otel::{db_query_span, record_db_metrics, DbOperation};
use crate::sql::{lexer, StatementKind};
use crate::types::{AskError, CellValue, ExecutionOutcome, Result};
use rusqlite::{Connection, Statement, Transaction};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What to do when a batch holds several READ statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPolicy {
    /// Keep the result of the last READ statement
    #[default]
    LastRead,
    /// Reject the batch before executing anything
    SingleRead,
}

impl FromStr for ReadPolicy {
    type Err = AskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last" | "last_read" => Ok(Self::LastRead),
            "single" | "single_read" => Ok(Self::SingleRead),
            other => Err(AskError::ConfigError(format!(
                "unknown read policy '{}' (expected 'last' or 'single')",
                other
            ))),
        }
    }
}

/// Captured READ result.
struct Capture {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

/// Query executor for generated statement batches.
#[derive(Debug, Clone, Default)]
pub struct QueryExecutor {
    read_policy: ReadPolicy,
}

impl QueryExecutor {
    /// Create new query executor.
    pub fn new(read_policy: ReadPolicy) -> Self {
        Self { read_policy }
    }

    pub fn read_policy(&self) -> ReadPolicy {
        self.read_policy
    }

    /// Execute a semicolon-separated batch in one transaction.
    ///
    /// WRITE statements add to `rows_affected` (and capture rows when they
    /// carry a `RETURNING` clause), READ statements capture their rows,
    /// anything else runs without capture. Rows changed by a statement that
    /// was not classified as a write still count. The transaction commits only
    /// when at least one row was changed.
    ///
    /// # Errors
    ///
    /// Returns `AskError::StatementError` for the first failing statement (the
    /// whole batch is rolled back), `AskError::AmbiguousBatch` when the read
    /// policy rejects the batch
    pub fn execute(&self, conn: &mut Connection, text: &str) -> Result<ExecutionOutcome> {
        let statements: Vec<(String, StatementKind)> = lexer::split_sql(text)
            .into_iter()
            .map(|s| {
                let kind = StatementKind::of(&s);
                (s, kind)
            })
            .collect();

        let reads = statements
            .iter()
            .filter(|(_, kind)| *kind == StatementKind::Read)
            .count();
        if reads > 1 {
            match self.read_policy {
                ReadPolicy::SingleRead => return Err(AskError::AmbiguousBatch(reads)),
                ReadPolicy::LastRead => {
                    tracing::warn!(reads, "batch has several reads; keeping the last result");
                }
            }
        }

        let tx = conn
            .transaction()
            .map_err(|e| AskError::ConnectionError(format!("cannot begin transaction: {}", e)))?;

        let mut rows_affected: u64 = 0;
        let mut capture: Option<Capture> = None;

        for (statement, kind) in &statements {
            let span = db_query_span(DbOperation::from(*kind), statement);
            let _guard = span.enter();

            match kind {
                StatementKind::Write => {
                    let (changed, returned) = write_rows(&tx, statement)?;
                    record_db_metrics(returned.as_ref().map(|c| c.rows.len()), Some(changed));
                    rows_affected += changed;
                    if returned.is_some() {
                        capture = returned;
                    }
                }
                StatementKind::Read => {
                    let before = total_changes(&tx, statement)?;
                    let captured = read_rows(&tx, statement)?;
                    rows_affected += total_changes(&tx, statement)?.saturating_sub(before);
                    record_db_metrics(Some(captured.rows.len()), None);
                    capture = Some(captured);
                }
                StatementKind::Other => {
                    let before = total_changes(&tx, statement)?;
                    tx.execute_batch(statement)
                        .map_err(|e| AskError::statement(statement.as_str(), e))?;
                    rows_affected += total_changes(&tx, statement)?.saturating_sub(before);
                }
            }
        }

        let committed = if rows_affected > 0 {
            tx.commit()
                .map_err(|e| AskError::statement(text, e))?;
            true
        } else {
            tx.rollback()
                .map_err(|e| AskError::statement(text, e))?;
            false
        };

        tracing::info!(
            statements = statements.len(),
            rows_affected,
            committed,
            "executed batch"
        );

        let (columns, rows) = match capture {
            Some(c) => (c.columns, Some(c.rows)),
            None => (Vec::new(), None),
        };

        Ok(ExecutionOutcome {
            columns,
            rows,
            rows_affected,
            committed,
            statements: statements.len(),
        })
    }
}

/// Run a WRITE statement, returning rows changed and any `RETURNING` rows.
fn write_rows(tx: &Transaction<'_>, statement: &str) -> Result<(u64, Option<Capture>)> {
    let fail = |e| AskError::statement(statement, e);

    let mut stmt = tx.prepare(statement).map_err(fail)?;
    if stmt.column_count() == 0 {
        let changed = stmt.execute([]).map_err(fail)?;
        return Ok((changed as u64, None));
    }

    let captured = capture_rows(&mut stmt, statement)?;
    drop(stmt);
    Ok((tx.changes(), Some(captured)))
}

fn read_rows(tx: &Transaction<'_>, statement: &str) -> Result<Capture> {
    let mut stmt = tx
        .prepare(statement)
        .map_err(|e| AskError::statement(statement, e))?;
    capture_rows(&mut stmt, statement)
}

/// Connection-wide change counter, used to catch writes hidden in other
/// statement kinds.
fn total_changes(tx: &Transaction<'_>, statement: &str) -> Result<u64> {
    tx.query_row("SELECT total_changes()", [], |r| r.get::<_, i64>(0))
        .map(|n| n.max(0) as u64)
        .map_err(|e| AskError::statement(statement, e))
}

fn capture_rows(stmt: &mut Statement<'_>, statement: &str) -> Result<Capture> {
    let fail = |e| AskError::statement(statement, e);

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([]).map_err(fail)?;
    while let Some(row) = cursor.next().map_err(fail)? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(CellValue::from(row.get_ref(i).map_err(fail)?));
        }
        rows.push(values);
    }

    Ok(Capture { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE stock (item TEXT, qty INTEGER);
             INSERT INTO stock VALUES ('Bolt', 5), ('Nut', 12);",
        )
        .unwrap();
        conn
    }

    fn qty(conn: &Connection, item: &str) -> i64 {
        conn.query_row("SELECT qty FROM stock WHERE item = ?1", [item], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_read_captures_rows() {
        let mut conn = stock();
        let outcome = QueryExecutor::default()
            .execute(&mut conn, "SELECT item, qty FROM stock ORDER BY item")
            .unwrap();

        assert_eq!(outcome.columns, vec!["item", "qty"]);
        assert_eq!(outcome.row_count(), 2);
        assert_eq!(outcome.rows.unwrap()[0][0], CellValue::Text("Bolt".into()));
        assert_eq!(outcome.rows_affected, 0);
        assert!(!outcome.committed);
    }

    #[test]
    fn test_update_then_select_commits_once() {
        let mut conn = stock();
        let outcome = QueryExecutor::default()
            .execute(
                &mut conn,
                "UPDATE stock SET qty=qty-1 WHERE item='Bolt'; SELECT * FROM stock;",
            )
            .unwrap();

        assert_eq!(outcome.rows_affected, 1);
        assert!(outcome.committed);
        assert_eq!(outcome.statements, 2);
        assert_eq!(outcome.row_count(), 2);
        assert_eq!(qty(&conn, "Bolt"), 4);
    }

    #[test]
    fn test_failure_rolls_back_whole_batch() {
        let mut conn = stock();
        let err = QueryExecutor::default()
            .execute(
                &mut conn,
                "UPDATE stock SET qty = 0 WHERE item = 'Bolt'; SELECT * FROM missing",
            )
            .unwrap_err();

        assert_eq!(err.statement_text(), Some("SELECT * FROM missing"));
        assert_eq!(qty(&conn, "Bolt"), 5);
    }

    #[test]
    fn test_guarded_decrement_changes_nothing() {
        let mut conn = stock();
        let outcome = QueryExecutor::default()
            .execute(
                &mut conn,
                "UPDATE stock SET qty = qty - 10 WHERE item = 'Bolt' AND qty >= 10",
            )
            .unwrap();

        assert_eq!(outcome.rows_affected, 0);
        assert!(outcome.rows.is_none());
        assert!(!outcome.committed);
        assert_eq!(qty(&conn, "Bolt"), 5);
    }

    #[test]
    fn test_last_read_wins() {
        let mut conn = stock();
        let outcome = QueryExecutor::new(ReadPolicy::LastRead)
            .execute(&mut conn, "SELECT item FROM stock; SELECT qty FROM stock WHERE item = 'Nut'")
            .unwrap();

        assert_eq!(outcome.columns, vec!["qty"]);
        assert_eq!(outcome.rows.unwrap(), vec![vec![CellValue::Integer(12)]]);
    }

    #[test]
    fn test_single_read_policy_rejects_before_running() {
        let mut conn = stock();
        let err = QueryExecutor::new(ReadPolicy::SingleRead)
            .execute(
                &mut conn,
                "UPDATE stock SET qty = 1; SELECT item FROM stock; SELECT qty FROM stock",
            )
            .unwrap_err();

        assert!(matches!(err, AskError::AmbiguousBatch(2)));
        assert_eq!(qty(&conn, "Bolt"), 5);
    }

    #[test]
    fn test_empty_statements_are_skipped() {
        let mut conn = stock();
        let outcome = QueryExecutor::default()
            .execute(&mut conn, ";; SELECT COUNT(*) AS n FROM stock ;")
            .unwrap();
        assert_eq!(outcome.statements, 1);
        assert_eq!(outcome.rows.unwrap(), vec![vec![CellValue::Integer(2)]]);
    }

    #[test]
    fn test_update_returning_counts_and_captures() {
        let mut conn = stock();
        let outcome = QueryExecutor::default()
            .execute(
                &mut conn,
                "UPDATE stock SET qty = qty - 3 WHERE item = 'Bolt' AND qty >= 3 RETURNING qty",
            )
            .unwrap();

        assert_eq!(outcome.rows_affected, 1);
        assert!(outcome.committed);
        assert_eq!(outcome.columns, vec!["qty"]);
        assert_eq!(outcome.rows.unwrap(), vec![vec![CellValue::Integer(2)]]);
        assert_eq!(qty(&conn, "Bolt"), 2);
    }

    #[test]
    fn test_delete_returning_nothing_rolls_back() {
        let mut conn = stock();
        let outcome = QueryExecutor::default()
            .execute(&mut conn, "DELETE FROM stock WHERE item = 'Washer' RETURNING item")
            .unwrap();

        assert_eq!(outcome.rows_affected, 0);
        assert!(!outcome.committed);
        assert_eq!(outcome.rows.unwrap(), Vec::<Vec<CellValue>>::new());
    }

    #[test]
    fn test_cte_prefixed_update_commits() {
        let mut conn = stock();
        let outcome = QueryExecutor::default()
            .execute(
                &mut conn,
                "WITH s AS (SELECT 3 AS n) UPDATE stock SET qty = qty - (SELECT n FROM s) WHERE item = 'Bolt'",
            )
            .unwrap();

        assert_eq!(outcome.rows_affected, 1);
        assert!(outcome.committed);
        assert_eq!(qty(&conn, "Bolt"), 2);
    }

    #[test]
    fn test_read_after_write_does_not_double_count() {
        let mut conn = stock();
        let outcome = QueryExecutor::default()
            .execute(
                &mut conn,
                "UPDATE stock SET qty = qty + 1; SELECT item FROM stock; CREATE TABLE log (line TEXT)",
            )
            .unwrap();

        assert_eq!(outcome.rows_affected, 2);
        assert!(outcome.committed);
        assert_eq!(qty(&conn, "Nut"), 13);
    }

    #[test]
    fn test_read_policy_from_str() {
        assert_eq!("last".parse::<ReadPolicy>().unwrap(), ReadPolicy::LastRead);
        assert_eq!("Single".parse::<ReadPolicy>().unwrap(), ReadPolicy::SingleRead);
        assert!("first".parse::<ReadPolicy>().is_err());
    }
}
