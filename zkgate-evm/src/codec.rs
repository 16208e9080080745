//! EIP-712 commitment codec.
//!
//! [`encode`] produces `0x19 0x01 || domainSeparator || hashStruct(commitment)`
//! and its `keccak256` digest. The same function runs on the signing side and
//! inside the authorization gate, so a signature made over one digest always
//! verifies against the other.
//!
//! The same shape checks produce the [`abi`] structs a deployed gate takes as
//! call arguments.

use alloy_primitives::{Address, B256, U256, keccak256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain};
use serde::{Deserialize, Serialize};
use zkgate::commitment::{Commitment, CommitmentShape};
use zkgate::error::SchemaMismatch;

use crate::abi;

/// Default EIP-712 domain name.
pub const DEFAULT_DOMAIN_NAME: &str = "ZkAuthorizationGate";

/// Default EIP-712 domain version.
pub const DEFAULT_DOMAIN_VERSION: &str = "1";

/// Highest confidence an extended commitment may carry.
pub const MAX_CONFIDENCE: u8 = 100;

/// The EIP-712 domain of one authorization gate instance.
///
/// Binding the chain id and the gate address into every signature prevents a
/// commitment signed for one gate from being replayed at another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentDomain {
    /// Domain name.
    pub name: String,
    /// Domain version.
    pub version: String,
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Address of the gate that will verify the commitment.
    pub verifying_contract: Address,
}

impl CommitmentDomain {
    /// Domain with the default name and version.
    #[must_use]
    pub fn new(chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            name: DEFAULT_DOMAIN_NAME.to_owned(),
            version: DEFAULT_DOMAIN_VERSION.to_owned(),
            chain_id,
            verifying_contract,
        }
    }

    /// Overrides the domain name and version.
    #[must_use]
    pub fn with_name_version(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.name = name.into();
        self.version = version.into();
        self
    }

    /// The `alloy` representation of this domain.
    #[must_use]
    pub fn eip712(&self) -> Eip712Domain {
        eip712_domain! {
            name: self.name.clone(),
            version: self.version.clone(),
            chain_id: self.chain_id,
            verifying_contract: self.verifying_contract,
        }
    }
}

/// The signed bytes of a commitment and their digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCommitment {
    /// `0x1901 || domainSeparator || hashStruct`, 66 bytes.
    pub bytes: Vec<u8>,
    /// `keccak256(bytes)`. Doubles as the commitment id.
    pub digest: B256,
}

/// Encodes `commitment` for signing under `domain`.
///
/// # Errors
///
/// Returns [`SchemaMismatch`] if the commitment does not fit `shape`: a
/// simple commitment carrying extended fields, an extended commitment missing
/// one, or a confidence above [`MAX_CONFIDENCE`].
pub fn encode(
    commitment: &Commitment,
    domain: &CommitmentDomain,
    shape: CommitmentShape,
) -> Result<EncodedCommitment, SchemaMismatch> {
    let domain = domain.eip712();
    let struct_hash = match shape {
        CommitmentShape::Simple => to_simple(commitment)?.eip712_hash_struct(),
        CommitmentShape::Extended => to_extended(commitment)?.eip712_hash_struct(),
    };
    let mut bytes = Vec::with_capacity(66);
    bytes.extend_from_slice(&[0x19, 0x01]);
    bytes.extend_from_slice(domain.separator().as_slice());
    bytes.extend_from_slice(struct_hash.as_slice());
    let digest = keccak256(&bytes);
    Ok(EncodedCommitment { bytes, digest })
}

/// The simple-shape call argument for `commitment`.
///
/// # Errors
///
/// Returns [`SchemaMismatch::UnexpectedField`] if an extended field is set.
pub fn to_simple(commitment: &Commitment) -> Result<abi::Commitment, SchemaMismatch> {
    if let Some((field, _)) = commitment.extended_fields().into_iter().find(|(_, set)| *set) {
        return Err(SchemaMismatch::UnexpectedField {
            shape: CommitmentShape::Simple,
            field,
        });
    }
    Ok(abi::Commitment {
        proofHash: commitment.proof_hash,
        decision: commitment.decision.code(),
        timestamp: U256::from(commitment.timestamp.as_secs()),
        nonce: commitment.nonce,
    })
}

/// The extended-shape call argument for `commitment`.
///
/// # Errors
///
/// Returns [`SchemaMismatch`] if a field is missing or confidence is out of range.
pub fn to_extended(commitment: &Commitment) -> Result<abi::ExtendedCommitment, SchemaMismatch> {
    // Evaluated in declaration order so the first missing field is reported.
    let model_hash = required(commitment.model_hash, "modelHash")?;
    let input_hash = required(commitment.input_hash, "inputHash")?;
    let confidence = required(commitment.confidence, "confidence")?;
    let token = required(commitment.token, "token")?;
    let recipient = required(commitment.recipient, "recipient")?;
    let amount = required(commitment.amount, "amount")?;
    let chain_id = required(commitment.chain_id, "chainId")?;
    let agent = required(commitment.agent, "agent")?;
    let attestor = required(commitment.attestor, "attestor")?;
    if confidence > MAX_CONFIDENCE {
        return Err(out_of_range("confidence", confidence));
    }
    Ok(abi::ExtendedCommitment {
        proofHash: commitment.proof_hash,
        modelHash: model_hash,
        inputHash: input_hash,
        decision: commitment.decision.code(),
        confidence,
        token,
        recipient,
        amount,
        chainId: U256::from(chain_id),
        agent,
        attestor,
        timestamp: U256::from(commitment.timestamp.as_secs()),
        nonce: commitment.nonce,
    })
}

const fn required<T: Copy>(value: Option<T>, field: &'static str) -> Result<T, SchemaMismatch> {
    match value {
        Some(value) => Ok(value),
        None => Err(SchemaMismatch::MissingField {
            shape: CommitmentShape::Extended,
            field,
        }),
    }
}

fn out_of_range(field: &'static str, value: impl ToString) -> SchemaMismatch {
    SchemaMismatch::OutOfRange {
        field,
        value: value.to_string(),
    }
}
