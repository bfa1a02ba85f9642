//! Error types for sqlbridge-session

use thiserror::Error;

/// Result type for sqlbridge-session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sqlbridge-session
#[derive(Error, Debug)]
pub enum Error {
    /// Authentication handshake failure: unsupported challenge method, bad
    /// credentials. Fatal; the session does not join.
    #[error("authentication error: {message}")]
    Authentication {
        /// Human-readable description
        message: String,
    },

    /// Bridge misconfiguration, raised before any procedure is registered
    #[error("configuration error: {message}")]
    Configuration {
        /// Human-readable description
        message: String,
    },

    /// Failure reported by the RPC session (register, publish, call)
    #[error("rpc error: {message}")]
    Rpc {
        /// Human-readable description
        message: String,
    },

    /// Error surfaced by the database driver layer
    #[error(transparent)]
    Driver(#[from] sqlbridge_rdbc::Error),
}

impl Error {
    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an RPC error
    pub fn rpc(message: impl Into<String>) -> Self {
        Self::Rpc {
            message: message.into(),
        }
    }
}
