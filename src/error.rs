//! Error types for the s2s link client

use thiserror::Error;

/// Result type alias for s2s link operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the s2s link client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device, encoder or decoder error
    #[error("audio error: {0}")]
    Audio(String),

    /// Transport (connection) error
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed protocol frame
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Base64 payload could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Endpoint URL error
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
}
