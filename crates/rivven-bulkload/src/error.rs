//! Error types for rivven-bulkload
//!
//! Every failure a load can hit is classified so callers can decide what to
//! report. Nothing in this crate retries on its own:
//! - Fatal load errors (encoding, schema, flush acknowledgement)
//! - Transport errors (connection, timeout, I/O)
//! - Internal invariant signals (buffer full)

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for rivven-bulkload operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A row value could not be rendered for the wire
    Encoding,
    /// Internal buffer backpressure signal
    Backpressure,
    /// DDL (drop/create/truncate) rejected by the remote
    Schema,
    /// A batch flush failed
    Load,
    /// Connection-related errors
    Connection,
    /// The remote reported an error for a statement
    Protocol,
    /// Timeout errors
    Timeout,
    /// Configuration error
    Configuration,
    /// Broken internal invariant
    Internal,
}

impl ErrorCategory {
    /// Whether the caller could reasonably retry the whole load.
    ///
    /// A flush is never retried in place: a partially acknowledged batch
    /// would be duplicated.
    #[inline]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

/// Main error type for rivven-bulkload
///
/// Cloneable so a load report can carry the same error the caller saw.
#[derive(Error, Debug, Clone)]
#[allow(missing_docs)]
pub enum Error {
    /// A value cannot be converted to its declared wire representation
    #[error("encoding error in column '{column}': {message}")]
    Encoding { column: String, message: String },

    /// The row buffer is at capacity; resolved internally by a flush
    #[error("row buffer full (capacity {capacity})")]
    BufferFull { capacity: usize },

    /// DDL rejected by the remote engine
    #[error("schema error: {message}")]
    Schema {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<Error>>,
    },

    /// A batch flush failed; the rows of that batch are lost
    #[error("load error: {rows_lost} rows lost: {source}")]
    Load {
        rows_lost: u64,
        #[source]
        source: Box<Error>,
    },

    /// Connection failed or was dropped
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// The remote reported an error line while waiting for a prompt
    #[error("server error: {message}")]
    Protocol { message: String },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Internal invariant violated
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Encoding { .. } => ErrorCategory::Encoding,
            Self::BufferFull { .. } => ErrorCategory::Backpressure,
            Self::Schema { .. } => ErrorCategory::Schema,
            Self::Load { .. } => ErrorCategory::Load,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Whether this error is transient
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.category().is_transient()
    }

    /// The message reported by the remote engine, if this error (or the
    /// error it wraps) originated from one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Protocol { message } => Some(message),
            Self::Load { source, .. } => source.server_message(),
            Self::Schema {
                source: Some(source),
                ..
            } => source.server_message(),
            _ => None,
        }
    }

    /// Create an encoding error
    pub fn encoding(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encoding {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a schema error for a rejected statement
    pub fn schema_rejected(sql: impl Into<String>, source: Error) -> Self {
        Self::Schema {
            message: source.to_string(),
            sql: Some(sql.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap a flush failure
    pub fn load(rows_lost: u64, source: Error) -> Self {
        Self::Load {
            rows_lost,
            source: Box::new(source),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Create a protocol error carrying the remote message verbatim
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoding => write!(f, "encoding"),
            Self::Backpressure => write!(f, "backpressure"),
            Self::Schema => write!(f, "schema"),
            Self::Load => write!(f, "load"),
            Self::Connection => write!(f, "connection"),
            Self::Protocol => write!(f, "protocol"),
            Self::Timeout => write!(f, "timeout"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
