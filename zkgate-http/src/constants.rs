//! HTTP-specific constants for the payment-challenge protocol.

/// HTTP header mirroring the 402 challenge, base64 JSON (server → client).
pub const PAYMENT_REQUIRED_HEADER: &str = "PAYMENT-REQUIRED";

/// HTTP header carrying the payment proof, base64 JSON (client → server).
pub const X_PAYMENT_HEADER: &str = "X-PAYMENT";

/// HTTP header carrying the verified settlement, base64 JSON (server → client).
pub const X_PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// CORS header name for exposing custom headers.
pub const ACCESS_CONTROL_EXPOSE_HEADERS: &str = "Access-Control-Expose-Headers";

/// HTTP 402 Payment Required status code.
pub const HTTP_STATUS_PAYMENT_REQUIRED: u16 = 402;
