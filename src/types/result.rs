//! Result type alias for question cycles.

use crate::types::error::AskError;

/// Convenient result type for all fallible operations.
pub type Result<T> = std::result::Result<T, AskError>;
