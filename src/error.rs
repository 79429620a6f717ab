//! Error types for container lifecycle management.

use std::time::Duration;

use thiserror::Error;

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Errors that can occur while managing a container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The operation needs a created container but there is none.
    #[error("Container has not been created")]
    NotCreated,

    /// The container was disposed and accepts no further lifecycle calls.
    #[error("Container has been disposed")]
    Disposed,

    /// The backend endpoint uses a transport this crate cannot resolve.
    #[error("Docker endpoint scheme '{scheme}' is not supported")]
    UnsupportedEndpoint {
        /// Scheme of the rejected endpoint.
        scheme: String,
    },

    /// A private port has no public mapping on the host.
    #[error("Exposed port {port} is not mapped")]
    PortNotMapped {
        /// Private port as the caller asked for it.
        port: String,
    },

    /// The container configuration is incomplete or inconsistent.
    #[error("Container configuration error: {reason}")]
    Config {
        /// Reason for error.
        reason: String,
    },

    /// Error reported by the Docker engine.
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Error reported by a non-Docker backend.
    #[error("Backend {operation} failed: {reason}")]
    Backend {
        /// Backend operation that failed.
        operation: &'static str,
        /// Reason for failure.
        reason: String,
    },

    /// The caller's cancellation token fired.
    #[error("Operation was cancelled")]
    Cancelled,

    /// A wait strategy did not succeed in time.
    #[error("Wait strategy timed out after {0:?}")]
    Timeout(Duration),

    /// A wait strategy gave up.
    #[error("Wait strategy '{strategy}' failed: {reason}")]
    WaitStrategy {
        /// Strategy name.
        strategy: &'static str,
        /// Reason for failure.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    /// Whether this error comes from the caller's cancellation token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors raised while resolving settings from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {key} is not valid unicode")]
    NotUnicode { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
