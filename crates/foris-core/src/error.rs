//! Error types for foris-controller core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Message does not match the base shape or its module sub-schema
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A schema could not be compiled
    #[error("invalid schema for '{name}': {message}")]
    InvalidSchema { name: String, message: String },

    /// A registered module has no schema
    #[error("missing schema for module '{0}'")]
    MissingSchema(String),

    /// Frame length prefix exceeds the configured maximum
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Payload could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Payload could not be encoded
    #[error("encode error: {0}")]
    Encode(String),

    /// Controller id is not 16 uppercase hex digits
    #[error("invalid controller id: {0:?}")]
    InvalidControllerId(String),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Failure reported by a concrete transport
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}
