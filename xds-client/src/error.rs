//! Error types for the xDS client.

use thiserror::Error;

/// Error type for the xDS client.
#[derive(Debug, Error)]
pub enum Error {
    /// The management server connection could not be established.
    #[error("connection error: {0}")]
    Connection(String),

    /// The bidirectional stream to the management server failed.
    #[error("stream error: {0}")]
    Stream(#[from] tonic::Status),

    /// The stream closed while a request was being sent.
    #[error("stream closed")]
    StreamClosed,

    /// A response could not be decoded from the wire format.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// A resource failed validation after being decoded.
    #[error("validation error: {0}")]
    Validation(String),

    /// A configuration value was invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for xDS client operations.
pub type Result<T> = std::result::Result<T, Error>;
