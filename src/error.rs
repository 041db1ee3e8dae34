//! Error types for querywatch.
//!
//! Statement-local failures (a parse error, an unsupported EXPLAIN, a
//! cardinality query that ran out of time) are absorbed close to where they
//! happen; everything else propagates through [`Result`].

use thiserror::Error;

/// The primary error type for querywatch operations.
#[derive(Error, Debug)]
pub enum QueryWatchError {
    /// SQL parsing error
    #[error("SQL parse error: {message}")]
    Parse { message: String },

    /// One or more tables referenced by a captured query no longer exist
    #[error("Missing tables: {}", tables.join(", "))]
    MissingTable { tables: Vec<String> },

    /// Table statistics could not be fetched
    #[error("Statistics error: {message}")]
    Stats { message: String },

    /// A bounded operation exceeded its time budget
    #[error("Timed out: {message}")]
    Timeout { message: String },

    /// EXPLAIN could not be produced for a statement
    #[error("Explain error: {message}")]
    Explain { message: String },

    /// JSON (de)serialization error
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// No session is stored under the given id
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl QueryWatchError {
    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a missing-table error from the table names that could not be described.
    pub fn missing_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::MissingTable {
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a statistics error.
    pub fn stats(message: impl Into<String>) -> Self {
        Self::Stats {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create an explain error.
    pub fn explain(message: impl Into<String>) -> Self {
        Self::Explain {
            message: message.into(),
        }
    }

    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error is local to a single statement, table or column and
    /// should not abort a whole analysis run.
    pub fn is_statement_local(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. }
                | Self::MissingTable { .. }
                | Self::Stats { .. }
                | Self::Timeout { .. }
                | Self::Explain { .. }
        )
    }
}

impl From<sqlparser::parser::ParserError> for QueryWatchError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        Self::Parse {
            message: err.to_string(),
        }
    }
}

impl From<regex::Error> for QueryWatchError {
    fn from(err: regex::Error) -> Self {
        Self::InvalidArgument {
            message: err.to_string(),
        }
    }
}

/// Result type alias for querywatch operations.
pub type Result<T> = std::result::Result<T, QueryWatchError>;
