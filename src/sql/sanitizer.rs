//! Cleanup of raw completion text before execution.
//!
//! Models tend to wrap SQL in markdown fences and to write aggregates where
//! SQLite evaluates them against a single implicit row (`WHERE price =
//! MAX(price)` is a "misuse of aggregate" error). The sanitizer strips the
//! fences and scopes such aggregates into per-table subqueries.
//!
//! Rewrites work on the token tree from [`lexer`], so a literal like
//! `'MAX(1)'` is never touched and an aggregate already inside a subquery is
//! left alone. The latter is what makes sanitizing idempotent.

use crate::sql::lexer::{self, Node};
use crate::sql::sentinel;
use crate::types::{AskError, Result};
use regex::Regex;
use std::sync::OnceLock;

const AGGREGATES: &[&str] = &["MAX", "MIN", "SUM", "AVG", "COUNT", "TOTAL"];

/// Keywords that end a FROM or WHERE clause.
const CLAUSE_KEYWORDS: &[&str] = &[
    "FROM", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "WINDOW", "RETURNING", "SET",
];

const COMPOUND_KEYWORDS: &[&str] = &["UNION", "INTERSECT", "EXCEPT"];

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?m)```[A-Za-z0-9_+\-]*[ \t]*$").expect("fence pattern is valid")
    })
}

/// Remove markdown code fences (with or without an info string).
pub fn strip_fences(text: &str) -> String {
    let mut current = text.trim().to_string();
    while current.contains("```") {
        let stripped = fence_pattern().replace_all(&current, "").replace("```", "");
        current = stripped.trim().to_string();
    }
    current
}

/// Sanitize with default settings.
pub fn sanitize(raw: &str) -> String {
    Sanitizer::default().sanitize(raw)
}

/// Query sanitizer.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    /// Turn a lone `MAX(x)` / `MIN(x)` projection into the full extremum row
    expand_extremum_rows: bool,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            expand_extremum_rows: true,
        }
    }
}

/// Statement shapes the scoping rewrite understands.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Select,
    Update,
    Delete,
}

/// Top-level layout of one statement.
struct Layout {
    shape: Shape,
    table: String,
    /// Node range of the FROM clause body (SELECT only)
    from: Option<(usize, usize)>,
    /// Node range of the WHERE clause body
    filter: Option<(usize, usize)>,
    grouped: bool,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extremum_rows(mut self, enabled: bool) -> Self {
        self.expand_extremum_rows = enabled;
        self
    }

    /// Sanitize raw completion text.
    ///
    /// Steps: trim, strip fences, pass sentinels through, scope aggregates.
    /// Text the rewrite cannot analyse is returned without scoping.
    pub fn sanitize(&self, raw: &str) -> String {
        let text = strip_fences(raw);
        if sentinel::contains_sentinel(&text) {
            return text;
        }

        match self.scope_aggregates(&text) {
            Ok(Some(rewritten)) => {
                tracing::debug!(before = %text, after = %rewritten, "scoped aggregate functions");
                rewritten
            }
            Ok(None) => text,
            Err(e) => {
                tracing::warn!(error = %e, "passing generated text through unmodified");
                text
            }
        }
    }

    /// Rewrite every statement of the batch; `None` when nothing changed.
    ///
    /// # Errors
    ///
    /// Returns `AskError::SanitizationAmbiguity` if the text cannot be lexed
    pub fn scope_aggregates(&self, text: &str) -> Result<Option<String>> {
        // Rewritten text is re-rendered, and a trailing line comment would
        // swallow whatever follows it.
        let nodes = lexer::strip_comments(lexer::parse(text)?);
        let mut changed = false;
        let mut statements = Vec::new();

        for statement in lexer::split_statements(nodes) {
            match self.rewrite_statement(&statement) {
                Some(rewritten) => {
                    changed = true;
                    statements.push(rewritten);
                }
                None => statements.push(lexer::render(&statement).trim().to_string()),
            }
        }

        if !changed {
            return Ok(None);
        }
        Ok(Some(statements.join(";\n")))
    }

    fn rewrite_statement(&self, statement: &[Node]) -> Option<String> {
        let layout = match Layout::locate(statement) {
            Ok(Some(layout)) => layout,
            Ok(None) => return None,
            Err(e) => {
                if contains_unscoped_aggregate(statement) {
                    tracing::warn!(error = %e, "aggregate left unscoped");
                }
                return None;
            }
        };

        let mut nodes = statement.to_vec();
        let mut rewrites = 0;
        let mut filter_range = layout.filter;
        if let Some((start, end)) = layout.filter {
            let mut filter: Vec<Node> = nodes[start..end].to_vec();
            rewrites += scope_in(&mut filter, &layout.table);
            if rewrites > 0 {
                filter_range = Some((start, start + filter.len()));
                nodes.splice(start..end, filter);
            }
        }

        if self.expand_extremum_rows && layout.shape == Shape::Select && !layout.grouped {
            if let Some(row_query) = extremum_row_query(&nodes, layout.from, filter_range) {
                return Some(row_query);
            }
        }

        if rewrites > 0 {
            Some(lexer::render(&nodes).trim().to_string())
        } else {
            None
        }
    }
}

impl Layout {
    /// Find clause positions at the top level of a statement.
    ///
    /// `Ok(None)` means the statement is not a shape we rewrite; `Err` means it
    /// is one but its table cannot be pinned down.
    fn locate(nodes: &[Node]) -> Result<Option<Self>> {
        let sig = lexer::significant_indices(nodes);
        let Some(&first) = sig.first() else {
            return Ok(None);
        };
        let shape = match nodes[first].keyword().as_deref() {
            Some("SELECT") => Shape::Select,
            Some("UPDATE") => Shape::Update,
            Some("DELETE") => Shape::Delete,
            _ => return Ok(None),
        };

        if sig
            .iter()
            .any(|&i| COMPOUND_KEYWORDS.iter().any(|kw| nodes[i].is_keyword(kw)))
        {
            return Err(AskError::SanitizationAmbiguity(
                "compound select".to_string(),
            ));
        }

        let position = |kw: &str| sig.iter().copied().find(|&i| nodes[i].is_keyword(kw));
        let clause_end = |after: usize| {
            sig.iter()
                .copied()
                .find(|&i| i > after && CLAUSE_KEYWORDS.iter().any(|kw| nodes[i].is_keyword(kw)))
                .unwrap_or(nodes.len())
        };

        let from_pos = position("FROM");
        let where_pos = position("WHERE");
        let filter = where_pos.map(|w| (w + 1, clause_end(w)));
        let grouped = position("GROUP").is_some() || position("HAVING").is_some();

        let (table, from) = match shape {
            Shape::Select => {
                let Some(f) = from_pos else {
                    return Ok(None);
                };
                if where_pos.is_some_and(|w| w < f) {
                    return Err(AskError::SanitizationAmbiguity(
                        "WHERE before FROM".to_string(),
                    ));
                }
                let end = clause_end(f);
                (single_table(&nodes[f + 1..end])?, Some((f + 1, end)))
            }
            Shape::Delete => {
                let Some(f) = from_pos else {
                    return Ok(None);
                };
                (single_table(&nodes[f + 1..clause_end(f)])?, None)
            }
            Shape::Update => {
                if from_pos.is_some() {
                    return Err(AskError::SanitizationAmbiguity(
                        "UPDATE ... FROM".to_string(),
                    ));
                }
                let set = position("SET").unwrap_or(nodes.len());
                let target: Vec<Node> = nodes[first + 1..set]
                    .iter()
                    .filter(|n| !n.is_trivia())
                    .cloned()
                    .collect();
                // UPDATE OR REPLACE t ...
                let target = if target.first().map_or(false, |n| n.is_keyword("OR")) {
                    target.get(2..).map(<[Node]>::to_vec).unwrap_or_default()
                } else {
                    target
                };
                (single_table(&target)?, None)
            }
        };

        Ok(Some(Self {
            shape,
            table,
            from,
            filter,
            grouped,
        }))
    }
}

/// Table name of a FROM body holding exactly one table and an optional alias.
fn single_table(body: &[Node]) -> Result<String> {
    let sig: Vec<&Node> = body.iter().filter(|n| !n.is_trivia()).collect();
    let ambiguous = || AskError::SanitizationAmbiguity("FROM clause is not a single table".to_string());

    let name = sig
        .first()
        .and_then(|n| n.word_value())
        .ok_or_else(ambiguous)?;

    let alias_ok = match sig.len() {
        1 => true,
        2 => sig[1].word_value().is_some() && !is_join_word(sig[1]),
        3 => sig[1].is_keyword("AS") && sig[2].word_value().is_some(),
        _ => false,
    };
    if !alias_ok {
        return Err(ambiguous());
    }
    Ok(name.to_string())
}

fn is_join_word(node: &Node) -> bool {
    ["JOIN", "LEFT", "RIGHT", "INNER", "OUTER", "CROSS", "NATURAL", "FULL"]
        .iter()
        .any(|kw| node.is_keyword(kw))
}

/// Upper-cased aggregate name if the node is an aggregate keyword.
fn aggregate_name(node: &Node) -> Option<String> {
    node.keyword().filter(|kw| AGGREGATES.contains(&kw.as_str()))
}

/// A call with more than one argument (`MAX(a, b)`) is SQLite's scalar form.
fn single_argument(args: &[Node]) -> bool {
    lexer::first_significant(args).is_some()
        && !args
            .iter()
            .any(|n| matches!(n, Node::Token(sqlparser::tokenizer::Token::Comma)))
}

/// Index of the call group following an aggregate keyword at `at`.
fn call_group(nodes: &[Node], at: usize) -> Option<usize> {
    let next = (at + 1..nodes.len()).find(|&j| !nodes[j].is_trivia())?;
    match &nodes[next] {
        Node::Group(args) if single_argument(args) => Some(next),
        _ => None,
    }
}

/// Wrap aggregate calls outside subqueries as `(SELECT AGG(x) FROM "table")`.
///
/// Returns how many calls were wrapped.
fn scope_in(nodes: &mut Vec<Node>, table: &str) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i < nodes.len() {
        if let Node::Group(children) = &mut nodes[i] {
            if !lexer::group_is_subquery(children) {
                count += scope_in(children, table);
            }
            i += 1;
            continue;
        }

        if aggregate_name(&nodes[i]).is_some() {
            if let Some(group) = call_group(nodes, i) {
                let call = lexer::render(&nodes[i..=group]);
                let scoped = Node::Text(format!(
                    "(SELECT {} FROM {})",
                    call.trim(),
                    lexer::quote_ident(table)
                ));
                nodes.splice(i..=group, [scoped]);
                count += 1;
            }
        }
        i += 1;
    }
    count
}

fn contains_unscoped_aggregate(nodes: &[Node]) -> bool {
    nodes.iter().enumerate().any(|(i, node)| match node {
        Node::Group(children) => {
            !lexer::group_is_subquery(children) && contains_unscoped_aggregate(children)
        }
        _ => aggregate_name(node).is_some() && call_group(nodes, i).is_some(),
    })
}

/// Rewrite `SELECT MAX(x) FROM t [WHERE w]` into the row holding the extremum.
fn extremum_row_query(
    nodes: &[Node],
    from: Option<(usize, usize)>,
    filter: Option<(usize, usize)>,
) -> Option<String> {
    let (from_start, from_end) = from?;
    let projection = &nodes[..from_start.saturating_sub(1)];
    let sig = lexer::significant_indices(projection);

    // sig[0] is SELECT, then the call, then an optional `[AS] alias`
    let agg_at = *sig.get(1)?;
    let agg = aggregate_name(&projection[agg_at])?;
    if agg != "MAX" && agg != "MIN" {
        return None;
    }
    let group_at = call_group(projection, agg_at)?;
    let trailing = sig.iter().filter(|&&i| i > group_at).count();
    let alias_ok = match trailing {
        0 => true,
        1 => projection[*sig.last()?].word_value().is_some(),
        2 => {
            projection[*sig.get(sig.len() - 2)?].is_keyword("AS")
                && projection[*sig.last()?].word_value().is_some()
        }
        _ => false,
    };
    if !alias_ok {
        return None;
    }

    let Node::Group(args) = &projection[group_at] else {
        return None;
    };
    let column = lexer::render(args).trim().to_string();
    let call = lexer::render(&projection[agg_at..=group_at]).trim().to_string();
    let source = lexer::render(&nodes[from_start..from_end]).trim().to_string();
    let filter = filter
        .map(|(start, end)| lexer::render(&nodes[start..end]).trim().to_string())
        .filter(|w| !w.is_empty());

    Some(match filter {
        Some(w) => format!(
            "SELECT * FROM {source} WHERE ({w}) AND {column} = (SELECT {call} FROM {source} WHERE {w}) LIMIT 1"
        ),
        None => format!(
            "SELECT * FROM {source} WHERE {column} = (SELECT {call} FROM {source}) LIMIT 1"
        ),
    })
}
