//! Generated SQL handling: lexing, classification and sanitizing.

pub mod classify;
pub mod lexer;
pub mod sanitizer;
pub mod sentinel;

pub use classify::StatementKind;
pub use sanitizer::{sanitize, Sanitizer};
pub use sentinel::{GeneratedQuery, INSUFFICIENT_STOCK, UNANSWERABLE};
