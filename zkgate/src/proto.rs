//! Wire format types for the payment challenge/response protocol.
//!
//! A protected resource answers an unpaid request with a [`PaymentRequired`]
//! challenge. The caller pays on-ledger and retries with a base64-encoded
//! [`PaymentProof`]; a successful retry carries a base64-encoded
//! [`PaymentResponse`] echoing the [`Settlement`].
//!
//! # Wire Format
//!
//! All types serialize to JSON using camelCase field names. Token amounts are
//! decimal strings and timestamps are stringified seconds.
//!
//! ```json
//! {
//!   "version": 1,
//!   "accepts": [{
//!     "scheme": "exact",
//!     "network": "eip155:5042002",
//!     "maxAmountRequired": "3000",
//!     "resource": "/commitments",
//!     "payTo": "0x...",
//!     "asset": "0x3600000000000000000000000000000000000000",
//!     "description": "Signed authorization commitment",
//!     "metadata": { "requestId": "9f2c...", "timestamp": "1760000000" }
//!   }]
//! }
//! ```

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, VecSkipError, serde_as};

use crate::chain::ChainId;
use crate::timestamp::UnixTimestamp;

/// The protocol version emitted and accepted by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// The only payment scheme supported: pay exactly (at least) the quoted amount.
pub const EXACT_SCHEME: &str = "exact";

/// Correlation data attached to a single challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementMetadata {
    /// Opaque identifier correlating a challenge with the caller's retry.
    pub request_id: String,
    /// When the challenge was issued.
    pub timestamp: UnixTimestamp,
}

/// Terms a caller must satisfy to access a protected resource.
///
/// Created when the resource is first requested without proof of payment.
/// Immutable once issued.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    /// Payment scheme, always [`EXACT_SCHEME`].
    pub scheme: String,
    /// Network the payment must settle on.
    pub network: ChainId,
    /// Amount due, in the asset's smallest unit.
    #[serde(rename = "maxAmountRequired")]
    #[serde_as(as = "DisplayFromStr")]
    pub amount: U256,
    /// The resource being paid for.
    pub resource: String,
    /// Address that must receive the payment.
    #[serde(rename = "payTo")]
    pub recipient: Address,
    /// Token contract the payment must be made in.
    pub asset: Address,
    /// Human-readable description of what is being sold.
    #[serde(default)]
    pub description: String,
    /// Correlation data.
    pub metadata: RequirementMetadata,
}

impl PaymentRequirement {
    /// Returns the correlation id of this challenge.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.metadata.request_id
    }

    /// Returns when this challenge was issued.
    #[must_use]
    pub const fn issued_at(&self) -> UnixTimestamp {
        self.metadata.timestamp
    }
}

/// Body of an HTTP 402 response.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version.
    pub version: u8,
    /// Acceptable ways to pay. Entries this implementation cannot parse are skipped.
    #[serde_as(as = "VecSkipError<_>")]
    pub accepts: Vec<PaymentRequirement>,
    /// Why a previous proof was rejected, if one was presented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable counterpart of `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorReason>,
}

impl PaymentRequired {
    /// A fresh challenge for a single requirement.
    #[must_use]
    pub fn new(requirement: PaymentRequirement) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            accepts: vec![requirement],
            error: None,
            reason: None,
        }
    }

    /// Attaches the reason a presented proof was rejected.
    #[must_use]
    pub fn with_problem(mut self, problem: &Problem) -> Self {
        self.error = Some(problem.details().to_owned());
        self.reason = Some(problem.reason());
        self
    }
}

/// On-ledger evidence of payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofPayload {
    /// Hash of the payment transaction.
    pub tx_hash: B256,
    /// Address that paid.
    #[serde(rename = "from")]
    pub payer: Address,
    /// When the caller submitted the payment, as claimed by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<UnixTimestamp>,
}

/// Proof of payment sent by the caller in the `X-PAYMENT` header.
///
/// Version and scheme are kept as raw values so an unsupported combination is
/// reported as a verification failure rather than a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    /// Protocol version the caller speaks.
    pub version: u8,
    /// Payment scheme the caller used.
    pub scheme: String,
    /// Network the payment was made on.
    pub network: ChainId,
    /// Transaction reference.
    pub payload: ProofPayload,
}

impl PaymentProof {
    /// Builds a current-version `exact` proof for a transaction.
    #[must_use]
    pub fn exact(network: ChainId, tx_hash: B256, payer: Address) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            scheme: EXACT_SCHEME.to_owned(),
            network,
            payload: ProofPayload {
                tx_hash,
                payer,
                timestamp: Some(UnixTimestamp::now()),
            },
        }
    }
}

/// Compact record of a verified payment.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    /// Network the payment settled on.
    pub network: ChainId,
    /// Hash of the payment transaction.
    pub tx_hash: B256,
    /// Address the ledger reports as the payer.
    pub payer: Address,
    /// Amount credited to the recipient, in atomic units.
    #[serde_as(as = "DisplayFromStr")]
    pub amount: U256,
    /// Token contract that was paid.
    pub asset: Address,
    /// When verification completed.
    pub timestamp: UnixTimestamp,
}

/// Body of the `X-PAYMENT-RESPONSE` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResponse {
    /// Protocol version.
    pub version: u8,
    /// The verified settlement.
    pub settlement: Settlement,
}

impl From<Settlement> for PaymentResponse {
    fn from(settlement: Settlement) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            settlement,
        }
    }
}

/// Machine-readable reason codes for every rejection in the protocol.
///
/// The reason determines the caller's retry strategy, so rejections are never
/// collapsed into a generic error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorReason {
    /// The proof could not be decoded.
    InvalidFormat,
    /// Protocol version or payment scheme not supported.
    UnsupportedScheme,
    /// Proof names a different network than required.
    NetworkMismatch,
    /// The referenced transaction does not exist.
    TxNotFound,
    /// The referenced transaction reverted.
    TxFailed,
    /// No transfer to the required recipient in the required asset.
    WrongRecipient,
    /// Less than the required amount was transferred.
    InsufficientAmount,
    /// More than the required amount was transferred under an exact-amount policy.
    AmountMismatch,
    /// The proof was already used to unlock a call.
    ProofAlreadyConsumed,
    /// Commitment nonce already consumed.
    NonceReplay,
    /// Commitment decision is not the authorized code.
    NotAuthorized,
    /// Commitment timestamp is outside the freshness window.
    CommitmentExpired,
    /// Signature does not recover to the registered signer.
    InvalidSignature,
    /// Transfer arguments differ from the values bound in the commitment.
    BindingMismatch,
    /// Caller is not the gate owner.
    NotOwner,
    /// Custody balance cannot cover the debit.
    InsufficientCustody,
    /// Commitment does not fit the configured shape.
    SchemaMismatch,
    /// An authorization lacks a valid attestation of its proof.
    UnattestedProof,
    /// An unexpected error occurred.
    UnexpectedError,
}

/// Conversion of a typed rejection into a wire [`Problem`].
pub trait AsProblem {
    /// Converts this rejection into a [`Problem`].
    fn as_problem(&self) -> Problem;
}

/// A structured rejection with reason code and details.
///
/// Serializes as `{"error": details, "reason": code}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "error")]
    details: String,
    reason: ErrorReason,
}

impl Problem {
    /// Creates a new problem with the given reason and details.
    #[must_use]
    pub const fn new(reason: ErrorReason, details: String) -> Self {
        Self { details, reason }
    }

    /// Returns the reason code.
    #[must_use]
    pub const fn reason(&self) -> ErrorReason {
        self.reason
    }

    /// Returns the human-readable details.
    #[must_use]
    pub fn details(&self) -> &str {
        &self.details
    }
}
