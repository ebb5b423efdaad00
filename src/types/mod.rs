//! Core data types for question cycles.
//!
//! Defines fundamental types used throughout the pipeline:
//! - `Schema`: Ordered table descriptors discovered from the store
//! - `ExecutionOutcome`: What a statement batch returned or changed
//! - `AskError`: Error types for all operations
//! - `Result`: Convenient result type alias

pub mod error;
pub mod outcome;
pub mod result;
pub mod schema;

pub use error::AskError;
pub use outcome::{CellValue, ExecutionOutcome};
pub use result::Result;
pub use schema::{Schema, TableSchema};
