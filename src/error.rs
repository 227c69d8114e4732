//! WolfServe Error Types

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for WolfServe operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfServe error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Startup errors
    #[error("listen tcp {addr}: bind: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create state directory {path:?}: {source}")]
    StateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Overlay provider error: {0}")]
    Provider(String),

    // Request-time errors
    #[error("Identity lookup failed: {0}")]
    Identity(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("TLS error: {0}")]
    Tls(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Status decode error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error leaves the gateway unable to accept any traffic
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse(_)
                | Error::Bind { .. }
                | Error::StateDir { .. }
                | Error::Provider(_)
        )
    }
}
