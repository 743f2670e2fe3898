//! Error types for `Backchannel` core library.

use thiserror::Error;

/// Result type alias using `Backchannel` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `Backchannel` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid setting. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
