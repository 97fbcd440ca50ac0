//! Error types for the client library.

use thiserror::Error;

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The request never got a response
    #[error("connection error: {0}")]
    Connection(#[source] reqwest::Error),

    /// The response body could not be read
    #[error("protocol error: {0}")]
    Protocol(#[source] reqwest::Error),

    /// The server refused the statement
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl ClientError {
    /// Returns true if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ClientError::Connection(_))
    }

    /// Returns true if this is a protocol error.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, ClientError::Protocol(_))
    }

    /// Returns true if the server answered with an error status.
    pub fn is_rejected(&self) -> bool {
        matches!(self, ClientError::Rejected { .. })
    }

    /// HTTP status of a rejection.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-provided message of a rejection.
    pub fn message(&self) -> Option<&str> {
        match self {
            ClientError::Rejected { message, .. } => Some(message),
            _ => None,
        }
    }
}
