//! Read/write classification of single statements.

use crate::sql::lexer::{self, Node};
use serde::{Deserialize, Serialize};

/// How the executor treats a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    /// Returns rows (SELECT, PRAGMA, EXPLAIN, VALUES, or a CTE ending in SELECT)
    Read,
    /// Changes rows (INSERT, UPDATE, DELETE, REPLACE, with or without a CTE prefix)
    Write,
    /// Anything else; executed without capturing rows
    Other,
}

impl StatementKind {
    /// Classify a statement by its leading keyword.
    pub fn of(statement: &str) -> Self {
        match lexer::parse(statement) {
            Ok(nodes) => Self::of_nodes(&nodes),
            Err(_) => {
                let mut words = statement
                    .split(|c: char| !c.is_ascii_alphabetic())
                    .filter(|w| !w.is_empty())
                    .map(|w| w.to_ascii_uppercase());
                match words.next() {
                    // Groups are unknown here; any write keyword wins.
                    Some(first) if first == "WITH" => {
                        if words.any(|w| Self::from_keyword(&w) == Self::Write) {
                            Self::Write
                        } else {
                            Self::Read
                        }
                    }
                    Some(first) => Self::from_keyword(&first),
                    None => Self::Other,
                }
            }
        }
    }

    pub fn of_nodes(nodes: &[Node]) -> Self {
        match lexer::first_significant(nodes).and_then(Node::keyword) {
            Some(kw) if kw == "WITH" => Self::after_ctes(nodes),
            Some(kw) => Self::from_keyword(&kw),
            None => Self::Other,
        }
    }

    /// CTE bodies are parenthesised groups, so the first top-level statement
    /// keyword after `WITH` is the one that runs.
    fn after_ctes(nodes: &[Node]) -> Self {
        nodes
            .iter()
            .filter_map(Node::keyword)
            .find_map(|kw| match Self::from_keyword(&kw) {
                Self::Other => None,
                kind => Some(kind),
            })
            .unwrap_or(Self::Read)
    }

    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "SELECT" | "PRAGMA" | "EXPLAIN" | "VALUES" => Self::Read,
            "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => Self::Write,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Other => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(StatementKind::of("select * from items"), StatementKind::Read);
        assert_eq!(StatementKind::of("  WITH x AS (SELECT 1) SELECT * FROM x"), StatementKind::Read);
        assert_eq!(StatementKind::of("UPDATE stock SET qty = qty - 1"), StatementKind::Write);
        assert_eq!(StatementKind::of("insert into t values (1)"), StatementKind::Write);
        assert_eq!(StatementKind::of("DELETE FROM t"), StatementKind::Write);
        assert_eq!(StatementKind::of("CREATE TABLE t (a)"), StatementKind::Other);
    }

    #[test]
    fn test_cte_prefixed_statements_use_the_main_keyword() {
        assert_eq!(
            StatementKind::of(
                "WITH s AS (SELECT 3 AS n) UPDATE stock SET qty = qty - (SELECT n FROM s) WHERE item = 'Bolt'"
            ),
            StatementKind::Write
        );
        assert_eq!(
            StatementKind::of("with recursive r(n) as (select 1 union all select n + 1 from r where n < 3) insert into t select n from r"),
            StatementKind::Write
        );
        assert_eq!(
            StatementKind::of("WITH gone AS (SELECT item FROM stock) DELETE FROM stock WHERE item IN gone"),
            StatementKind::Write
        );
        assert_eq!(
            StatementKind::of("WITH cheap AS (SELECT * FROM items WHERE price < 10) SELECT name FROM cheap"),
            StatementKind::Read
        );
    }

    #[test]
    fn test_leading_comment_is_skipped() {
        assert_eq!(
            StatementKind::of("-- find the bolt\nSELECT * FROM stock"),
            StatementKind::Read
        );
    }

    #[test]
    fn test_unlexable_falls_back_to_first_word() {
        assert_eq!(StatementKind::of("SELECT (1"), StatementKind::Read);
        assert_eq!(StatementKind::of(""), StatementKind::Other);
        assert_eq!(
            StatementKind::of("WITH s AS (SELECT 'x) UPDATE stock SET qty = 0"),
            StatementKind::Write
        );
    }
}
