//! Error types for the relay

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {

    // =============================
    // Relay Errors
    // =============================

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Telegram API error: {0}")]
    TelegramError(String),

    #[error("File download error: {0}")]
    DownloadError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}
