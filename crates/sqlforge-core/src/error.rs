//! Error types shared across the query compiler and migration engine.

use thiserror::Error;

/// Core error type for sqlforge operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid identifier {name:?} in {context}")]
    InvalidIdentifier { name: String, context: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("cancelled")]
    Cancelled,

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code for execution-layer errors.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Timeout(_) => "EBQBTIMEOUT",
            Error::Aborted(_) => "EBQBABORT",
            Error::Cancelled => "EBQBCANCELLED",
            Error::Connection(_) => "EBQBCONNECTION",
            Error::Driver(_) => "EBQBDRIVER",
            Error::Configuration(_) => "EBQBCONFIG",
            Error::InvalidIdentifier { .. } => "EBQBIDENTIFIER",
            Error::NotImplemented(_) => "EBQBNOTIMPLEMENTED",
            Error::NotSupported(_) => "EBQBNOTSUPPORTED",
            Error::NotFound(_) => "EBQBNOTFOUND",
            Error::Io(_) => "EBQBIO",
            Error::Serialization(_) => "EBQBSERIALIZATION",
            Error::Other(_) => "EBQBOTHER",
        }
    }

    /// Whether a driver error message matches one of the known retriable
    /// conditions: deadlock, serialization failure, lock-wait timeout,
    /// SQLite BUSY, or "database is locked".
    pub fn is_retriable_message(message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        const PATTERNS: &[&str] = &[
            "deadlock",
            "serialization failure",
            "could not serialize access",
            "lock wait timeout",
            "database is locked",
            "database table is locked",
            "busy",
        ];
        PATTERNS.iter().any(|p| lower.contains(p))
    }

    /// Whether a driver/connection error message indicates the connection
    /// was closed out from under the caller, the trigger for the
    /// fresh-connection wrapper.
    pub fn is_connection_closed_message(message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        const PATTERNS: &[&str] = &[
            "connection closed",
            "connection already closed",
            "connection reset",
            "broken pipe",
            "socket closed",
            "server closed the connection",
        ];
        PATTERNS.iter().any(|p| lower.contains(p))
    }
}

/// Result type alias for sqlforge operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_abort_have_stable_codes() {
        assert_eq!(Error::Timeout("slow".into()).code(), "EBQBTIMEOUT");
        assert_eq!(Error::Aborted("stop".into()).code(), "EBQBABORT");
    }

    #[test]
    fn retriable_message_detection() {
        assert!(Error::is_retriable_message("deadlock detected"));
        assert!(Error::is_retriable_message(
            "ERROR: could not serialize access due to concurrent update"
        ));
        assert!(Error::is_retriable_message("SQLITE_BUSY: database is locked"));
        assert!(!Error::is_retriable_message("syntax error near SELECT"));
    }

    #[test]
    fn connection_closed_detection() {
        assert!(Error::is_connection_closed_message("the connection was closed"));
        assert!(Error::is_connection_closed_message("write: broken pipe"));
        assert!(!Error::is_connection_closed_message("deadlock detected"));
    }
}
