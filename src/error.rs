//! Error types for the Ratewindow service.

use thiserror::Error;

/// Main error type for Ratewindow operations.
#[derive(Error, Debug)]
pub enum RatewindowError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors after the listener is bound
    #[error("HTTP server error: {0}")]
    Server(#[source] std::io::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Ratewindow operations.
pub type Result<T> = std::result::Result<T, RatewindowError>;
