//! Error types for the pkpassmake-server crate.

use thiserror::Error;

/// Errors that can occur in the signing endpoint.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Server bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing or invalid authorization")]
    Unauthorized,

    #[error("Signer setup failed: {0}")]
    Signer(#[from] pkpassmake::PassError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
