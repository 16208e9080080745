//! Authorization and signing error taxonomy.
//!
//! Payment-layer rejections live in [`crate::payment`]. This module holds
//! everything on the commitment side: codec shape errors, signer
//! configuration errors, and the authorization gate's rejections.

use alloy_primitives::{Address, B256, U256};

use crate::commitment::{CommitmentShape, Decision};
use crate::proto::{AsProblem, ErrorReason, Problem};
use crate::timestamp::UnixTimestamp;

/// A commitment does not fit the configured shape.
///
/// Raised by the codec, propagated by the signer, and treated as a startup
/// error by services.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaMismatch {
    /// A field the shape requires is absent.
    #[error("{shape} commitment is missing required field `{field}`")]
    MissingField {
        /// Configured shape.
        shape: CommitmentShape,
        /// Wire name of the missing field.
        field: &'static str,
    },
    /// A field the shape does not carry is present.
    #[error("{shape} commitment cannot carry field `{field}`")]
    UnexpectedField {
        /// Configured shape.
        shape: CommitmentShape,
        /// Wire name of the unexpected field.
        field: &'static str,
    },
    /// A field value is outside the range the shape allows.
    #[error("commitment field `{field}` is out of range: {value}")]
    OutOfRange {
        /// Wire name of the field.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Errors raised while producing a signed commitment.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// No signing key is configured.
    #[error("no signing key configured")]
    MissingSigningKey,
    /// The configured signing key cannot be parsed.
    #[error("invalid signing key: {0}")]
    InvalidSigningKey(String),
    /// The oracle output cannot be mapped into the configured shape.
    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatch),
    /// The underlying signer failed.
    #[error("signing failed: {0}")]
    Signing(String),
    /// An attestor is configured and the authorization carries no valid
    /// attestation of its proof.
    #[error("proof {proof_hash} is not attested by {attestor}")]
    UnattestedProof {
        /// Proof the authorization rests on.
        proof_hash: B256,
        /// Configured attestor.
        attestor: Address,
    },
}

/// Rejections raised by the authorization gate.
///
/// Every variant leaves gate state untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizationError {
    /// The nonce was already consumed for this signer.
    #[error("nonce {nonce} has already been used")]
    NonceReplay {
        /// The replayed nonce.
        nonce: U256,
    },
    /// The commitment does not carry the authorized decision.
    #[error("decision {decision} is not an authorization")]
    NotAuthorized {
        /// The decision that was presented.
        decision: Decision,
    },
    /// The commitment is older than the freshness window.
    #[error("commitment issued at {timestamp} expired before {now}")]
    CommitmentExpired {
        /// Commitment timestamp.
        timestamp: UnixTimestamp,
        /// Time of evaluation.
        now: UnixTimestamp,
    },
    /// The signature does not recover to the registered signer.
    #[error("signature does not recover to the authorized signer")]
    InvalidSignature,
    /// Transfer arguments differ from the values bound in an extended commitment.
    #[error("`{field}` differs from the value bound in the commitment")]
    BindingMismatch {
        /// Wire name of the mismatching field.
        field: &'static str,
    },
    /// An owner-only operation was attempted by someone else.
    #[error("{caller} is not the gate owner")]
    NotOwner {
        /// The caller.
        caller: Address,
    },
    /// The custody balance cannot cover a debit.
    #[error("custody balance {available} cannot cover {requested}")]
    InsufficientCustody {
        /// Current custody balance.
        available: U256,
        /// Requested debit.
        requested: U256,
    },
    /// The commitment does not fit the gate's shape.
    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatch),
}

impl AsProblem for AuthorizationError {
    fn as_problem(&self) -> Problem {
        let reason = match self {
            Self::NonceReplay { .. } => ErrorReason::NonceReplay,
            Self::NotAuthorized { .. } => ErrorReason::NotAuthorized,
            Self::CommitmentExpired { .. } => ErrorReason::CommitmentExpired,
            Self::InvalidSignature => ErrorReason::InvalidSignature,
            Self::BindingMismatch { .. } => ErrorReason::BindingMismatch,
            Self::NotOwner { .. } => ErrorReason::NotOwner,
            Self::InsufficientCustody { .. } => ErrorReason::InsufficientCustody,
            Self::SchemaMismatch(_) => ErrorReason::SchemaMismatch,
        };
        Problem::new(reason, self.to_string())
    }
}

impl AsProblem for SchemaMismatch {
    fn as_problem(&self) -> Problem {
        Problem::new(ErrorReason::SchemaMismatch, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_problem_reasons() {
        let problem = AuthorizationError::NonceReplay {
            nonce: U256::from(42),
        }
        .as_problem();
        assert_eq!(problem.reason(), ErrorReason::NonceReplay);
        assert_eq!(problem.details(), "nonce 42 has already been used");

        let problem = AuthorizationError::from(SchemaMismatch::MissingField {
            shape: CommitmentShape::Extended,
            field: "recipient",
        })
        .as_problem();
        assert_eq!(problem.reason(), ErrorReason::SchemaMismatch);
        assert_eq!(
            problem.details(),
            "extended commitment is missing required field `recipient`"
        );
    }
}
