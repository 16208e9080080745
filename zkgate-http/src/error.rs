//! Error types for the HTTP transport layer.

use zkgate::encoding::EnvelopeError;

/// Errors that can occur during HTTP header encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Base64 decoding failed.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl From<EnvelopeError> for HttpError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::Base64(e) => Self::Base64(e),
            EnvelopeError::Json(e) => Self::Serialize(e),
        }
    }
}
