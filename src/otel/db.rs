//! Statement instrumentation.

use crate::sql::{lexer, StatementKind};
use tracing::{span, Level, Span};

/// Database operation types (maps to `db.operation.name`).
#[derive(Debug, Clone, Copy)]
pub enum DbOperation {
    /// Statement returning rows
    Read,
    /// Statement changing rows
    Write,
    /// DDL or other statement
    Other,
    /// Schema discovery
    Introspect,
    /// Spreadsheet import
    Ingest,
}

impl DbOperation {
    /// Get operation name as string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Other => "other",
            Self::Introspect => "introspect",
            Self::Ingest => "ingest",
        }
    }
}

impl From<StatementKind> for DbOperation {
    fn from(kind: StatementKind) -> Self {
        match kind {
            StatementKind::Read => Self::Read,
            StatementKind::Write => Self::Write,
            StatementKind::Other => Self::Other,
        }
    }
}

/// Create a span for one generated statement.
///
/// # Example
///
/// ```rust,ignore
/// let span = db_query_span(DbOperation::Read, "SELECT * FROM items");
/// let _guard = span.enter();
/// ```
pub fn db_query_span(operation: DbOperation, query_text: &str) -> Span {
    let name = span_name(operation, query_text);
    span!(
        Level::INFO,
        "db.query",
        otel.name = %name,
        otel.kind = "client",
        db.system.name = "sqlite",
        db.operation.name = operation.as_str(),
        db.query.text = query_text,
        db.response.returned_rows = tracing::field::Empty,
        db.response.affected_rows = tracing::field::Empty,
    )
}

/// `{db.operation.name} {target}`, or just the operation when no table is named.
pub fn span_name(operation: DbOperation, query_text: &str) -> String {
    match query_target(query_text) {
        Some(target) => format!("{} {}", operation.as_str(), target),
        None => operation.as_str().to_string(),
    }
}

/// First table named at the top level of a statement.
fn query_target(query_text: &str) -> Option<String> {
    let nodes = lexer::parse(query_text).ok()?;
    let mut words = nodes.iter().filter(|n| !n.is_trivia());
    while let Some(node) = words.next() {
        if ["FROM", "INTO", "UPDATE", "TABLE", "JOIN"].iter().any(|kw| node.is_keyword(kw)) {
            let target = words.find(|n| {
                !["IF", "NOT", "EXISTS", "OR", "REPLACE", "IGNORE"]
                    .iter()
                    .any(|kw| n.is_keyword(kw))
            })?;
            return target.word_value().map(str::to_string);
        }
    }
    None
}

/// Record rows returned / affected on the current span.
pub fn record_db_metrics(rows_returned: Option<usize>, rows_affected: Option<u64>) {
    let span = Span::current();
    if let Some(returned) = rows_returned {
        span.record("db.response.returned_rows", returned);
    }
    if let Some(affected) = rows_affected {
        span.record("db.response.affected_rows", affected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_operation_names() {
        assert_eq!(DbOperation::Read.as_str(), "read");
        assert_eq!(DbOperation::from(StatementKind::Write).as_str(), "write");
        assert_eq!(DbOperation::Ingest.as_str(), "ingest");
    }

    #[test]
    fn test_span_name_carries_target() {
        assert_eq!(span_name(DbOperation::Read, "SELECT * FROM items WHERE price > 1"), "read items");
        assert_eq!(span_name(DbOperation::Write, "update stock set qty = 1"), "write stock");
        assert_eq!(
            span_name(DbOperation::Write, "INSERT OR REPLACE INTO \"lista de precios\" VALUES (1)"),
            "write lista de precios"
        );
        assert_eq!(
            span_name(DbOperation::Write, "WITH s AS (SELECT 3 FROM x) UPDATE stock SET qty = 0"),
            "write stock"
        );
        assert_eq!(span_name(DbOperation::Other, "CREATE TABLE IF NOT EXISTS log (a)"), "other log");
        assert_eq!(span_name(DbOperation::Read, "SELECT 1"), "read");
    }
}
