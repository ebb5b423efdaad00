//! Error types for question cycles.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `From` implementations.

use thiserror::Error;

/// Error type for every stage of a question cycle.
///
/// Variants map onto the failure taxonomy the orchestrator reports to the user:
/// connection failures end the session, completion and statement failures end
/// the current cycle only.
#[derive(Error, Debug)]
pub enum AskError {
    /// Store could not be opened or introspected
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Completion service call failed
    #[error("Completion service error: {message}")]
    CompletionError {
        /// Provider or transport message
        message: String,
        /// Whether an identical request may succeed later (network, 429, 5xx)
        transient: bool,
    },

    /// A generated statement failed to execute
    #[error("Statement failed: {source} (statement: {statement})")]
    StatementError {
        /// The statement text that was attempted
        statement: String,
        /// Underlying SQLite error
        #[source]
        source: rusqlite::Error,
    },

    /// Generated text could not be analysed for aggregate scoping
    #[error("Sanitization ambiguity: {0}")]
    SanitizationAmbiguity(String),

    /// Batch holds more READ statements than the read policy allows
    #[error("Batch contains {0} read statements, expected exactly one")]
    AmbiguousBatch(usize),

    /// Question was empty after trimming
    #[error("Question is empty")]
    EmptyQuestion,

    /// Completion service returned nothing usable
    #[error("Completion service returned no statement")]
    EmptyCompletion,

    /// Spreadsheet import failed
    #[error("Ingest failed: {0}")]
    IngestError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML config parse error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// CSV read error
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// HTTP client error (completion APIs)
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl AskError {
    /// Create a completion error that is worth retrying.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::CompletionError {
            message: msg.into(),
            transient: true,
        }
    }

    /// Create a completion error that retrying will not fix.
    pub fn completion(msg: impl Into<String>) -> Self {
        Self::CompletionError {
            message: msg.into(),
            transient: false,
        }
    }

    /// Create a statement error carrying the offending statement.
    pub fn statement(statement: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::StatementError {
            statement: statement.into(),
            source,
        }
    }

    /// Check if error is recoverable.
    ///
    /// # Returns
    ///
    /// `true` if resubmitting the same request may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::CompletionError { transient, .. } => *transient,
            Self::HttpError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether the session itself is unusable after this error.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, Self::ConnectionError(_))
    }

    /// The statement text attached to the error, if any.
    pub fn statement_text(&self) -> Option<&str> {
        match self {
            Self::StatementError { statement, .. } => Some(statement),
            _ => None,
        }
    }

    /// Message shown to the person asking.
    pub fn user_message(&self) -> String {
        match self {
            Self::ConnectionError(msg) => {
                format!("Could not use the database: {}. Please provide a valid database file.", msg)
            }
            Self::CompletionError { message, .. } => {
                format!("The language model could not answer right now ({}). Try asking again.", message)
            }
            Self::StatementError { statement, source } => {
                format!("The generated query failed: {}\nQuery: {}", source, statement)
            }
            Self::AmbiguousBatch(n) => {
                format!("The generated query contained {} separate lookups; please ask one thing at a time.", n)
            }
            Self::EmptyQuestion => "Please type a question first.".to_string(),
            Self::EmptyCompletion => "I could not generate a query for this question.".to_string(),
            other => other.to_string(),
        }
    }
}
