//! Minimal expression tree over the sqlparser tokenizer.
//!
//! Generated text is not always valid SQL, so instead of a full parse we lex it
//! and fold parenthesised spans into nested groups. That is enough to tell a
//! subquery from a function call and to keep quoted literals opaque.

use crate::types::{AskError, Result};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use std::fmt::Write;

/// Node of the token tree.
#[derive(Debug, Clone)]
pub enum Node {
    /// Lexed token (never a parenthesis)
    Token(Token),
    /// Contents of a `( ... )` span
    Group(Vec<Node>),
    /// Synthesized fragment inserted by a rewrite
    Text(String),
}

impl Node {
    /// Whitespace and comments.
    pub fn is_trivia(&self) -> bool {
        matches!(self, Node::Token(Token::Whitespace(_)))
    }

    /// Upper-cased value of an unquoted word.
    pub fn keyword(&self) -> Option<String> {
        match self {
            Node::Token(Token::Word(w)) if w.quote_style.is_none() => {
                Some(w.value.to_ascii_uppercase())
            }
            _ => None,
        }
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        match self {
            Node::Token(Token::Word(w)) => {
                w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword)
            }
            _ => false,
        }
    }

    /// Raw value of a word token, quoted or not.
    pub fn word_value(&self) -> Option<&str> {
        match self {
            Node::Token(Token::Word(w)) => Some(w.value.as_str()),
            _ => None,
        }
    }

    /// A group whose first significant node starts a query.
    pub fn is_subquery(&self) -> bool {
        match self {
            Node::Group(children) => group_is_subquery(children),
            _ => false,
        }
    }
}

pub(crate) fn group_is_subquery(children: &[Node]) -> bool {
    first_significant(children)
        .map(|n| n.is_keyword("SELECT") || n.is_keyword("WITH") || n.is_keyword("VALUES"))
        .unwrap_or(false)
}

/// Lex `sql` and fold it into a token tree.
///
/// # Errors
///
/// Returns `AskError::SanitizationAmbiguity` if the text cannot be lexed or its
/// parentheses do not balance
pub fn parse(sql: &str) -> Result<Vec<Node>> {
    let dialect = SQLiteDialect {};
    // Literals stay escaped so rendering reproduces them exactly.
    let tokens = Tokenizer::new(&dialect, sql)
        .with_unescape(false)
        .tokenize()
        .map_err(|e| AskError::SanitizationAmbiguity(format!("tokenize failed: {}", e)))?;

    let mut stack: Vec<Vec<Node>> = vec![Vec::new()];
    for token in tokens {
        match token {
            Token::LParen => stack.push(Vec::new()),
            Token::RParen => {
                if stack.len() < 2 {
                    return Err(AskError::SanitizationAmbiguity(
                        "unbalanced ')'".to_string(),
                    ));
                }
                let Some(group) = stack.pop() else {
                    return Err(AskError::SanitizationAmbiguity(
                        "unbalanced ')'".to_string(),
                    ));
                };
                if let Some(parent) = stack.last_mut() {
                    parent.push(Node::Group(group));
                }
            }
            Token::EOF => {}
            other => {
                if let Some(current) = stack.last_mut() {
                    current.push(Node::Token(other));
                }
            }
        }
    }

    if stack.len() != 1 {
        return Err(AskError::SanitizationAmbiguity(
            "unclosed '('".to_string(),
        ));
    }
    Ok(stack.pop().unwrap_or_default())
}

/// Replace comments with a single space, at every depth.
pub fn strip_comments(nodes: Vec<Node>) -> Vec<Node> {
    nodes
        .into_iter()
        .map(|node| match node {
            Node::Token(Token::Whitespace(
                Whitespace::SingleLineComment { .. } | Whitespace::MultiLineComment(_),
            )) => Node::Token(Token::Whitespace(Whitespace::Space)),
            Node::Group(children) => Node::Group(strip_comments(children)),
            other => other,
        })
        .collect()
}

/// Render nodes back to SQL text.
pub fn render(nodes: &[Node]) -> String {
    let mut out = String::new();
    render_into(nodes, &mut out);
    out
}

fn render_into(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Token(token) => {
                let _ = write!(out, "{}", token);
            }
            Node::Group(children) => {
                out.push('(');
                render_into(children, out);
                out.push(')');
            }
            Node::Text(text) => out.push_str(text),
        }
    }
}

pub fn first_significant(nodes: &[Node]) -> Option<&Node> {
    nodes.iter().find(|n| !n.is_trivia())
}

/// Indices of non-trivia nodes.
pub fn significant_indices(nodes: &[Node]) -> Vec<usize> {
    nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| !n.is_trivia())
        .map(|(i, _)| i)
        .collect()
}

/// Split a tree at top-level semicolons.
///
/// Statements with nothing but whitespace or comments are dropped.
pub fn split_statements(nodes: Vec<Node>) -> Vec<Vec<Node>> {
    let mut statements = Vec::new();
    let mut current = Vec::new();
    for node in nodes {
        if matches!(node, Node::Token(Token::SemiColon)) {
            statements.push(std::mem::take(&mut current));
        } else {
            current.push(node);
        }
    }
    statements.push(current);
    statements.retain(|s| first_significant(s).is_some());
    statements
}

/// Split statement text into individual statements.
///
/// Semicolons inside string literals or quoted identifiers do not split. Text
/// that cannot be lexed is split naively.
pub fn split_sql(text: &str) -> Vec<String> {
    match parse(text) {
        Ok(nodes) => split_statements(nodes)
            .iter()
            .map(|s| render(s).trim().to_string())
            .collect(),
        Err(e) => {
            tracing::debug!(error = %e, "falling back to plain semicolon split");
            text.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        }
    }
}

/// Whether any statement in `text` has the given keyword at its top level.
pub fn has_top_level_keyword(text: &str, keyword: &str) -> bool {
    match parse(text) {
        Ok(nodes) => nodes.iter().any(|n| n.is_keyword(keyword)),
        Err(_) => text.to_ascii_uppercase().contains(&keyword.to_ascii_uppercase()),
    }
}

/// Double-quote an identifier for SQLite.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
