//! Error type for CQL driver operations.

use std::time::Duration;

/// Error type for CQL driver operations.
#[derive(Debug)]
pub enum CqlError {
    /// Connection error
    Connection(String),
    /// Wire protocol error
    Protocol(String),
    /// Authentication error
    Auth(String),
    /// TLS configuration or handshake error
    Tls(String),
    /// Server rejected the query
    Query { code: i32, message: String },
    /// Request did not complete within the configured timeout
    Timeout(Duration),
    /// Cluster did not reach schema agreement within the deadline
    SchemaAgreement(Duration),
    /// I/O error
    Io(std::io::Error),
}

impl std::fmt::Display for CqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CqlError::Connection(e) => write!(f, "connection error: {}", e),
            CqlError::Protocol(e) => write!(f, "protocol error: {}", e),
            CqlError::Auth(e) => write!(f, "authentication error: {}", e),
            CqlError::Tls(e) => write!(f, "TLS error: {}", e),
            CqlError::Query { code, message } => {
                write!(f, "query error (code 0x{:04X}): {}", code, message)
            }
            CqlError::Timeout(d) => write!(f, "request timed out after {:?}", d),
            CqlError::SchemaAgreement(d) => {
                write!(f, "schema agreement not reached within {:?}", d)
            }
            CqlError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for CqlError {}

impl From<std::io::Error> for CqlError {
    fn from(e: std::io::Error) -> Self {
        CqlError::Io(e)
    }
}

/// Result type for CQL driver operations.
pub type CqlResult<T> = Result<T, CqlError>;
