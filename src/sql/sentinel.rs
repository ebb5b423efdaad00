//! Out-of-band markers the completion service emits instead of SQL.

use serde::{Deserialize, Serialize};

/// Emitted when the schema cannot answer the question.
pub const UNANSWERABLE: &str = "cannot be answered";

/// Emitted when a buy/sell intent would drive stock negative.
pub const INSUFFICIENT_STOCK: &str = "insufficient stock";

const UNANSWERABLE_ALIASES: &[&str] = &[UNANSWERABLE, "no se puede responder"];
const INSUFFICIENT_STOCK_ALIASES: &[&str] = &[INSUFFICIENT_STOCK, "stock insuficiente"];

const STATEMENT_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "REPLACE", "VALUES", "PRAGMA", "EXPLAIN",
    "CREATE", "DROP", "ALTER",
];

/// Sanitized completion text, routed by sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum GeneratedQuery {
    Unanswerable,
    InsufficientStock,
    Statements(String),
}

impl GeneratedQuery {
    /// Route sanitized text. The unanswerable marker wins over everything else.
    pub fn classify(sanitized: &str) -> Self {
        if is_unanswerable(sanitized) {
            Self::Unanswerable
        } else if is_insufficient_stock(sanitized) {
            Self::InsufficientStock
        } else {
            Self::Statements(sanitized.to_string())
        }
    }
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    let lower = text.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

pub fn is_unanswerable(text: &str) -> bool {
    contains_any(text, UNANSWERABLE_ALIASES)
}

/// The refusal is a reply of its own; text opening with a statement keyword is
/// SQL that merely mentions it (e.g. in a string literal).
pub fn is_insufficient_stock(text: &str) -> bool {
    !leads_with_statement(text) && contains_any(text, INSUFFICIENT_STOCK_ALIASES)
}

fn leads_with_statement(text: &str) -> bool {
    let first = text
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    STATEMENT_KEYWORDS.contains(&first.as_str())
}

/// Whether the text carries any sentinel.
pub fn contains_sentinel(text: &str) -> bool {
    is_unanswerable(text) || is_insufficient_stock(text)
}
