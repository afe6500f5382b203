//! Error types for trackpoint.
//!
//! This module defines all error types used throughout the trackpoint crate.
//! Per-request errors are turned into textual replies by the protocol
//! handler; everything else surfaces to the binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for trackpoint operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Transport Errors ===
    /// The listening endpoint could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address we tried to listen on.
        address: String,
        /// The underlying error.
        #[source]
        source: zmq::Error,
    },

    /// Failed to set up a connection to a server.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// Address of the server.
        address: String,
        /// The underlying error.
        #[source]
        source: zmq::Error,
    },

    /// No reply arrived before the client timeout.
    #[error("no reply from {address} before the timeout")]
    Timeout {
        /// Endpoint of the server.
        address: String,
    },

    /// A socket operation failed.
    #[error("transport error: {0}")]
    Transport(#[from] zmq::Error),

    // === Protocol Errors ===
    /// The request body is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    InvalidPayload(String),

    /// The payload is valid JSON but lacks the identifying fields.
    #[error("missing required fields")]
    MissingFields,

    /// A field was present but had an unusable value.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted collection could not be written.
    #[error("failed to write {path}: {source}")]
    PersistWrite {
        /// File being written.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for trackpoint operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an invalid field error.
    #[must_use]
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Create a bind error for the given address.
    #[must_use]
    pub fn bind(address: SocketAddr, source: zmq::Error) -> Self {
        Self::Bind {
            address: address.to_string(),
            source,
        }
    }

    /// Check if this error was caused by the client's request rather than
    /// by the server.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPayload(_) | Self::MissingFields | Self::InvalidField { .. }
        )
    }

    /// Check if this error came from the messaging layer.
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Bind { .. } | Self::Connect { .. } | Self::Timeout { .. } | Self::Transport(_)
        )
    }
}
