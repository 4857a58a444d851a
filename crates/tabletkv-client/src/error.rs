//! Error types for the tabletkv client runtime.

use thiserror::Error;

use crate::mutator::MutationFailures;
use crate::protocol::StatusCode;

/// Errors surfaced by the channel pool, retry layer, dispatcher and mutator.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A required identity field of the configuration was empty.
    #[error("{field} must not be empty")]
    MissingConfig {
        /// Name of the missing field.
        field: &'static str,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Human readable reason.
        reason: String,
    },

    /// Channel creation or another local I/O operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The server (or the transport on its behalf) answered with a non-OK status.
    #[error("rpc failed with status {code:?}: {message}")]
    Status {
        /// Status code of the failed call.
        code: StatusCode,
        /// Server supplied detail.
        message: String,
    },

    /// A header interceptor refused to decorate an outbound call.
    #[error("header interceptor failed: {reason}")]
    HeaderInterceptor {
        /// Why the interceptor failed.
        reason: String,
    },

    /// The request was rejected before it was sent.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// Why the request is invalid.
        reason: String,
    },

    /// The channel answered with a response of the wrong kind for the method.
    #[error("unexpected response for {method}")]
    UnexpectedResponse {
        /// Full method name of the call.
        method: &'static str,
    },

    /// The mutator or dispatcher was already closed.
    #[error("buffered mutator is closed")]
    Closed,

    /// Admission was not granted within the requested timeout.
    #[error("admission not granted after {waited_ms}ms")]
    AdmissionTimeout {
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The operation was dropped before it produced a result.
    #[error("operation cancelled")]
    Cancelled,

    /// Aggregated asynchronous mutation failures.
    #[error(transparent)]
    MutationsFailed(#[from] MutationFailures),
}

impl ClientError {
    /// Builds a [`ClientError::Status`] error.
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        ClientError::Status {
            code,
            message: message.into(),
        }
    }

    /// Returns the RPC status code carried by this error, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
