//! Error types for the Hearth gateway

use thiserror::Error;

/// Result type alias for Hearth operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Hearth gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio capture/playback error
    #[error("audio error: {0}")]
    Audio(String),

    /// Live session transport error
    #[error("session error: {0}")]
    Session(String),

    /// Decode error (malformed base64 or PCM payload)
    #[error("decode error: {0}")]
    Decode(String),

    /// Action command error
    #[error("command error: {0}")]
    Command(String),

    /// Key-value store error
    #[error("store error: {0}")]
    Store(String),

    /// Chat endpoint error
    #[error("chat error: {0}")]
    Chat(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
