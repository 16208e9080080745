//! HTTP header encoding and decoding for protocol messages.
//!
//! Handles the base64 JSON payloads of the `X-PAYMENT`, `PAYMENT-REQUIRED`,
//! and `X-PAYMENT-RESPONSE` headers. Clients use the encoders to attach a
//! proof; servers use the decoders to read one.

use zkgate::encoding::Base64Bytes;
use zkgate::proto::{PaymentProof, PaymentRequired, PaymentResponse};

use crate::error::HttpError;

/// Encodes a [`PaymentProof`] for the `X-PAYMENT` header.
///
/// # Errors
///
/// Returns [`HttpError::Serialize`] if JSON serialization fails.
pub fn encode_payment_proof(proof: &PaymentProof) -> Result<String, HttpError> {
    Ok(Base64Bytes::encode_json(proof)?.to_string())
}

/// Decodes an `X-PAYMENT` header value.
///
/// Surrounding whitespace is tolerated.
///
/// # Errors
///
/// Returns [`HttpError`] on base64 or JSON decode failure.
pub fn decode_payment_proof(header_value: &[u8]) -> Result<PaymentProof, HttpError> {
    Ok(Base64Bytes::from(header_value).decode_json()?)
}

/// Encodes a [`PaymentRequired`] challenge for the `PAYMENT-REQUIRED` header.
///
/// # Errors
///
/// Returns [`HttpError::Serialize`] if JSON serialization fails.
pub fn encode_payment_required(required: &PaymentRequired) -> Result<String, HttpError> {
    Ok(Base64Bytes::encode_json(required)?.to_string())
}

/// Decodes a `PAYMENT-REQUIRED` header value.
///
/// # Errors
///
/// Returns [`HttpError`] on base64 or JSON decode failure.
pub fn decode_payment_required(header_value: &[u8]) -> Result<PaymentRequired, HttpError> {
    Ok(Base64Bytes::from(header_value).decode_json()?)
}

/// Encodes a [`PaymentResponse`] for the `X-PAYMENT-RESPONSE` header.
///
/// # Errors
///
/// Returns [`HttpError::Serialize`] if JSON serialization fails.
pub fn encode_payment_response(response: &PaymentResponse) -> Result<String, HttpError> {
    Ok(Base64Bytes::encode_json(response)?.to_string())
}

/// Decodes an `X-PAYMENT-RESPONSE` header value.
///
/// # Errors
///
/// Returns [`HttpError`] on base64 or JSON decode failure.
pub fn decode_payment_response(header_value: &[u8]) -> Result<PaymentResponse, HttpError> {
    Ok(Base64Bytes::from(header_value).decode_json()?)
}
