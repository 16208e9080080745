//! Base64 JSON envelopes used by the payment headers.
//!
//! Payment proofs, settlement responses, and mirrored challenges all travel as
//! base64-encoded JSON objects. [`Base64Bytes`] owns that transformation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;

/// Base64 text held as bytes, as it arrives in a header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes(pub Vec<u8>);

/// Failure to open a base64 JSON envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The outer layer is not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes are not the expected JSON object.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Base64Bytes {
    /// The raw bytes behind the base64 text. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns the decoder error for anything that is not standard base64.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(self.0.trim_ascii())
    }

    /// Base64 text for `input`.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Self {
        let encoded = b64.encode(input.as_ref());
        Self(encoded.into_bytes())
    }

    /// Serializes `value` to JSON and wraps it in base64.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn encode_json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_vec(value)?;
        Ok(Self::encode(json))
    }

    /// Unwraps base64 and deserializes the JSON inside.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] if either layer is malformed.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        let bytes = self.decode()?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Returns the encoded form as a string slice.
    ///
    /// Base64 output is always ASCII, so this only yields an empty string for
    /// bytes that were never produced by [`Base64Bytes::encode`].
    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl AsRef<[u8]> for Base64Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Base64Bytes {
    fn from(slice: &[u8]) -> Self {
        Self(slice.to_vec())
    }
}

impl From<&str> for Base64Bytes {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl Display for Base64Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}
