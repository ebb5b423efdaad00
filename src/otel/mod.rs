//! Tracing instrumentation for question cycles.
//!
//! Follows OpenTelemetry semantic conventions for database operations:
//! - https://opentelemetry.io/docs/specs/semconv/database/database-spans/
//!
//! **Span naming**: `{db.operation.name} {target}`
//! - Example: `read items`, `write stock`
//!
//! **Required attributes**:
//! - `db.system.name`: Always `"sqlite"`
//!
//! **Recommended**:
//! - `db.query.text`: The generated statement
//! - `db.response.returned_rows` / `db.response.affected_rows`
//!
//! Question cycles get their own span (`cycle`) carrying the cycle id, so
//! every completion call and statement of one question nests under it.

pub mod db;
pub mod init;
pub mod pipeline;

pub use db::{db_query_span, record_db_metrics, DbOperation};
pub use init::init_tracing;
pub use pipeline::{completion_span, cycle_span};
