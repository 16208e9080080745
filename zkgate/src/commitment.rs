//! Commitment records.
//!
//! A [`Commitment`] binds an oracle decision to a proof digest, a timestamp,
//! and a nonce. It is created by the signer, immutable once signed, and only
//! ever referenced by the authorization gate.
//!
//! Two shapes exist. The [`CommitmentShape::Simple`] shape carries the four core
//! fields. The [`CommitmentShape::Extended`] shape additionally binds the model,
//! input, confidence, and the exact value transfer (token, recipient, amount,
//! chain, agent, attestor) the commitment authorizes.

use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::fmt;
use std::str::FromStr;

use crate::timestamp::UnixTimestamp;

/// An oracle decision code.
///
/// Only [`Decision::AUTHORIZED`] releases funds. Every other code, including
/// [`Decision::DENIED`], is rejected by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Decision(u8);

impl Decision {
    /// The single positive decision.
    pub const AUTHORIZED: Self = Self(1);
    /// The explicit negative decision.
    pub const DENIED: Self = Self(0);

    /// Wraps a raw decision code.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        Self(code)
    }

    /// Returns the raw decision code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self.0
    }

    /// Returns `true` only for [`Decision::AUTHORIZED`].
    #[must_use]
    pub const fn is_authorized(self) -> bool {
        self.0 == Self::AUTHORIZED.0
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which commitment layout a deployment signs and verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentShape {
    /// `{proofHash, decision, timestamp, nonce}`.
    #[default]
    Simple,
    /// The thirteen-field layout binding a value transfer.
    Extended,
}

impl fmt::Display for CommitmentShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => f.write_str("simple"),
            Self::Extended => f.write_str("extended"),
        }
    }
}

/// Error returned when parsing an unknown commitment shape name.
#[derive(Debug, thiserror::Error)]
#[error("unknown commitment shape {0:?}, expected \"simple\" or \"extended\"")]
pub struct UnknownShape(String);

impl FromStr for CommitmentShape {
    type Err = UnknownShape;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Self::Simple),
            "extended" => Ok(Self::Extended),
            other => Err(UnknownShape(other.to_owned())),
        }
    }
}

/// A decision bound to a proof digest, a timestamp, and a nonce.
///
/// The optional fields are required by [`CommitmentShape::Extended`] and must be
/// absent for [`CommitmentShape::Simple`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    /// Digest of the off-chain proof artifact.
    pub proof_hash: B256,
    /// Oracle decision.
    pub decision: Decision,
    /// Anchor of the freshness window.
    pub timestamp: UnixTimestamp,
    /// Unique per signer.
    #[serde_as(as = "DisplayFromStr")]
    pub nonce: U256,
    /// Digest of the model that produced the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hash: Option<B256>,
    /// Digest of the model input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hash: Option<B256>,
    /// Oracle confidence, `0..=100`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    /// Token the bound transfer pays out in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Address>,
    /// Recipient of the bound transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Address>,
    /// Amount of the bound transfer.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub amount: Option<U256>,
    /// Chain the bound transfer executes on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Agent acting on the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Address>,
    /// Party attesting to the proof.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestor: Option<Address>,
}

impl Commitment {
    /// A simple-shape commitment.
    #[must_use]
    pub const fn new(
        proof_hash: B256,
        decision: Decision,
        timestamp: UnixTimestamp,
        nonce: U256,
    ) -> Self {
        Self {
            proof_hash,
            decision,
            timestamp,
            nonce,
            model_hash: None,
            input_hash: None,
            confidence: None,
            token: None,
            recipient: None,
            amount: None,
            chain_id: None,
            agent: None,
            attestor: None,
        }
    }

    /// Copies every binding present in `binding` onto this commitment.
    #[must_use]
    pub fn with_binding(mut self, binding: &TransferBinding) -> Self {
        self.model_hash = binding.model_hash.or(self.model_hash);
        self.input_hash = binding.input_hash.or(self.input_hash);
        self.token = binding.token.or(self.token);
        self.recipient = binding.recipient.or(self.recipient);
        self.amount = binding.amount.or(self.amount);
        self.chain_id = binding.chain_id.or(self.chain_id);
        self.agent = binding.agent.or(self.agent);
        self.attestor = binding.attestor.or(self.attestor);
        self
    }

    /// Names of the extended-only fields, paired with whether each is set,
    /// in declaration order.
    #[must_use]
    pub const fn extended_fields(&self) -> [(&'static str, bool); 9] {
        [
            ("modelHash", self.model_hash.is_some()),
            ("inputHash", self.input_hash.is_some()),
            ("confidence", self.confidence.is_some()),
            ("token", self.token.is_some()),
            ("recipient", self.recipient.is_some()),
            ("amount", self.amount.is_some()),
            ("chainId", self.chain_id.is_some()),
            ("agent", self.agent.is_some()),
            ("attestor", self.attestor.is_some()),
        ]
    }
}

/// Extended-shape values supplied by the caller of the signer.
///
/// Confidence is not part of the binding: it always comes from the oracle.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBinding {
    /// Digest of the model that produced the decision.
    #[serde(default)]
    pub model_hash: Option<B256>,
    /// Digest of the model input.
    #[serde(default)]
    pub input_hash: Option<B256>,
    /// Token the transfer pays out in.
    #[serde(default)]
    pub token: Option<Address>,
    /// Recipient of the transfer.
    #[serde(default)]
    pub recipient: Option<Address>,
    /// Amount of the transfer.
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub amount: Option<U256>,
    /// Chain the transfer executes on.
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Agent acting on the decision.
    #[serde(default)]
    pub agent: Option<Address>,
    /// Party attesting to the proof.
    #[serde(default)]
    pub attestor: Option<Address>,
}

/// A commitment together with its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedCommitment {
    /// The signed commitment.
    pub commitment: Commitment,
    /// 65-byte `r || s || v` signature over the commitment's signing digest.
    pub signature: Bytes,
    /// The signing digest, doubling as the commitment's identifier.
    pub commit_id: B256,
}

/// Append-only audit entry written atomically with a gate transfer or store.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRecord {
    /// Who received funds. Zero for store-only records.
    pub recipient: Address,
    /// How much was transferred. Zero for store-only records.
    #[serde_as(as = "DisplayFromStr")]
    pub amount: U256,
    /// Proof digest of the commitment.
    pub proof_hash: B256,
    /// Decision of the commitment.
    pub decision: Decision,
    /// Nonce of the commitment.
    #[serde_as(as = "DisplayFromStr")]
    pub nonce: U256,
    /// Timestamp of the commitment.
    pub timestamp: UnixTimestamp,
}

impl AuthorizationRecord {
    /// Record for a transfer of `amount` to `recipient` under `commitment`.
    #[must_use]
    pub const fn for_transfer(commitment: &Commitment, recipient: Address, amount: U256) -> Self {
        Self {
            recipient,
            amount,
            proof_hash: commitment.proof_hash,
            decision: commitment.decision,
            nonce: commitment.nonce,
            timestamp: commitment.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_decision_codes() {
        assert!(Decision::AUTHORIZED.is_authorized());
        assert!(!Decision::DENIED.is_authorized());
        assert!(!Decision::from_code(2).is_authorized());
        assert_eq!(serde_json::to_string(&Decision::AUTHORIZED).unwrap(), "1");
    }

    #[test]
    fn test_simple_commitment_omits_extended_fields() {
        let commitment = Commitment::new(
            B256::repeat_byte(0xab),
            Decision::AUTHORIZED,
            UnixTimestamp::from_secs(1_760_000_000),
            U256::from(42),
        );
        let json = serde_json::to_value(&commitment).unwrap();
        assert_eq!(json["nonce"], "42");
        assert_eq!(json["timestamp"], "1760000000");
        assert_eq!(json["decision"], 1);
        assert!(json.get("recipient").is_none());
        assert!(commitment.extended_fields().iter().all(|(_, set)| !set));
    }

    #[test]
    fn test_with_binding() {
        let recipient = address!("0x00000000000000000000000000000000000000aa");
        let binding = TransferBinding {
            recipient: Some(recipient),
            amount: Some(U256::from(500)),
            ..TransferBinding::default()
        };
        let commitment = Commitment::new(
            B256::ZERO,
            Decision::AUTHORIZED,
            UnixTimestamp::from_secs(1),
            U256::from(1),
        )
        .with_binding(&binding);
        assert_eq!(commitment.recipient, Some(recipient));
        assert_eq!(commitment.amount, Some(U256::from(500)));
        let set: Vec<_> = commitment
            .extended_fields()
            .into_iter()
            .filter_map(|(name, set)| set.then_some(name))
            .collect();
        assert_eq!(set, ["recipient", "amount"]);
    }

    #[test]
    fn test_shape_parse() {
        assert_eq!("extended".parse::<CommitmentShape>().unwrap(), CommitmentShape::Extended);
        assert!("full".parse::<CommitmentShape>().is_err());
    }
}
