//! catalog-ask - natural-language questions over a SQLite price list
//!
//! Turns a free-text question plus the store's discovered schema into a
//! sanitized SQLite statement batch, runs it in one transaction, and explains
//! the outcome in plain language:
//! - Schema introspection and CSV import (`store`)
//! - Prompt rendering, completion calls with retry, explanations (`llm`)
//! - Fence stripping and aggregate scoping of generated SQL (`sql`)
//! - The per-question state machine (`pipeline`)
//!
//! Can be used as:
//! - Library (`Session` + `Orchestrator` with any `CompletionService`)
//! - CLI (`ask` binary)

pub mod config;
pub mod llm;
pub mod otel;
pub mod pipeline;
pub mod sql;
pub mod store;
pub mod types;

pub use config::AskConfig;
pub use llm::{CompletionService, HttpCompletionClient, RetryPolicy, RetryingCompletion};
pub use pipeline::{Answer, CycleState, Orchestrator, Reply, Route, Session, Warning};
pub use types::{AskError, ExecutionOutcome, Result, Schema};
