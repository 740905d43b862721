//! Server error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors starting the HTTP surface.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `listen` was already called on this server.
    #[error("server is already listening")]
    AlreadyListening,
}
