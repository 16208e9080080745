//! Error types for the payment gate middleware.

use zkgate::payment::{PaymentRejection, VerifierError};
use zkgate::proto::PaymentRequired;

/// Reasons a request does not reach the protected service.
#[derive(Debug, thiserror::Error)]
pub enum PaygateError {
    /// No proof was presented.
    #[error("payment required")]
    PaymentRequired(Box<PaymentRequired>),
    /// A proof was presented and refused.
    #[error("payment rejected: {rejection}")]
    Rejected {
        /// Fresh challenge carrying the rejection reason.
        challenge: Box<PaymentRequired>,
        /// Why the proof was refused.
        rejection: PaymentRejection,
    },
    /// Verification could not reach a decision.
    #[error(transparent)]
    Verifier(#[from] VerifierError),
    /// A response header could not be encoded.
    #[error("failed to encode {0} header")]
    Header(&'static str),
}
