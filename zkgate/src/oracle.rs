//! Decision oracle boundary.
//!
//! The oracle (an inference model plus an external prover) is opaque. All this
//! crate consumes from it is `{decision, confidence, proofHash}`, plus an
//! optional attestor `signature` over the proof digest. Provers emit
//! that in several layouts: a bare JSON object on stdout, JSON between
//! `===PROOF_START===` and `===PROOF_END===` markers inside log output, or a
//! JSON side file. [`decode_oracle_output`] accepts any of them and returns a
//! tagged [`OracleOutcome`], so the signer never sees format variability.
//!
//! Output that cannot be decoded is [`OracleOutcome::Unparseable`]. Callers
//! recover from it locally with [`OracleOutcome::into_output_or_deny`], which
//! falls back to a denied decision instead of failing the request.

use alloy_primitives::{B256, Bytes};
use async_trait::async_trait;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

use crate::commitment::Decision;

/// Start marker of a delimited proof block.
pub const PROOF_START_MARKER: &str = "===PROOF_START===";
/// End marker of a delimited proof block.
pub const PROOF_END_MARKER: &str = "===PROOF_END===";

static DELIMITED_PROOF: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        "(?s){}(.*?){}",
        regex::escape(PROOF_START_MARKER),
        regex::escape(PROOF_END_MARKER)
    );
    Regex::new(&pattern).expect("static regex is valid")
});

/// The oracle output consumed by the signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleOutput {
    /// `0` (denied) or `1` (authorized).
    pub decision: Decision,
    /// `0..=100`.
    pub confidence: u8,
    /// Digest of the proof artifact.
    pub proof_hash: B256,
}

impl OracleOutput {
    /// The conservative default used when the oracle is unavailable.
    pub const DENY: Self = Self {
        decision: Decision::DENIED,
        confidence: 0,
        proof_hash: B256::ZERO,
    };

    /// Validates and builds an output.
    ///
    /// Returns `None` if `decision` is not `0` or `1`, or `confidence` exceeds `100`.
    #[must_use]
    pub fn new(decision: u8, confidence: u8, proof_hash: B256) -> Option<Self> {
        (decision <= 1 && confidence <= 100).then_some(Self {
            decision: Decision::from_code(decision),
            confidence,
            proof_hash,
        })
    }
}

/// Extra facts a prover reported alongside its decision.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofMetadata {
    /// `0` or `1`.
    pub decision: u8,
    /// `0..=100`.
    pub confidence: u8,
    /// Risk score, `100 - confidence` unless the prover reported one.
    pub risk_score: u8,
    /// Digest of the model, if reported.
    pub model_hash: Option<B256>,
    /// Digest of the model input, if reported.
    pub input_hash: Option<B256>,
    /// Attestor's EIP-191 signature over the proof digest, if reported.
    pub attestation: Option<Bytes>,
}

/// Decoded oracle output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleOutcome {
    /// A well-formed proof.
    Proof {
        /// Proof digest.
        hash: B256,
        /// Everything else the prover reported.
        metadata: ProofMetadata,
    },
    /// The output did not match any accepted layout.
    Unparseable(Vec<u8>),
}

/// The oracle produced nothing usable.
#[derive(Debug, thiserror::Error)]
#[error("upstream oracle unavailable: {0}")]
pub struct UpstreamOracleUnavailable(pub String);

impl OracleOutcome {
    /// The attestation reported with the proof, if any.
    #[must_use]
    pub fn attestation(&self) -> Option<&Bytes> {
        match self {
            Self::Proof { metadata, .. } => metadata.attestation.as_ref(),
            Self::Unparseable(_) => None,
        }
    }

    /// Returns the decoded output, or the reason it could not be decoded.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamOracleUnavailable`] for [`OracleOutcome::Unparseable`].
    pub fn into_output(self) -> Result<OracleOutput, UpstreamOracleUnavailable> {
        match self {
            Self::Proof { hash, metadata } => Ok(OracleOutput {
                decision: Decision::from_code(metadata.decision),
                confidence: metadata.confidence,
                proof_hash: hash,
            }),
            Self::Unparseable(raw) => Err(UpstreamOracleUnavailable(format!(
                "{} bytes of unrecognized output",
                raw.len()
            ))),
        }
    }

    /// Returns the decoded output, or [`OracleOutput::DENY`] if there is none.
    #[must_use]
    pub fn into_output_or_deny(self) -> OracleOutput {
        self.into_output().unwrap_or_else(|_e| {
            #[cfg(feature = "telemetry")]
            tracing::warn!(error = %_e, "oracle output unusable, falling back to deny");
            OracleOutput::DENY
        })
    }
}

#[derive(Deserialize)]
struct RawProof {
    decision: Option<u8>,
    confidence: Option<u8>,
    risk_score: Option<u8>,
    #[serde(alias = "proofHash")]
    proof_hash: Option<B256>,
    proof_bytes: Option<Vec<u8>>,
    #[serde(alias = "modelHash")]
    model_hash: Option<B256>,
    #[serde(alias = "inputHash")]
    input_hash: Option<B256>,
    #[serde(alias = "attestation")]
    signature: Option<Bytes>,
}

/// Decodes raw prover output.
///
/// The proof digest is taken from, in order of preference: the SHA-256 of a
/// `proof_bytes` array, an explicit `proof_hash`/`proofHash`, or the SHA-256 of
/// the JSON payload itself. `decision` and `confidence` are required and range
/// checked.
#[must_use]
pub fn decode_oracle_output(raw: &[u8]) -> OracleOutcome {
    let payload = locate_payload(raw);
    let Some(parsed) = payload.and_then(|p| serde_json::from_slice::<RawProof>(p).ok()) else {
        return OracleOutcome::Unparseable(raw.to_vec());
    };
    let (Some(decision), Some(confidence)) = (parsed.decision, parsed.confidence) else {
        return OracleOutcome::Unparseable(raw.to_vec());
    };
    if decision > 1 || confidence > 100 {
        return OracleOutcome::Unparseable(raw.to_vec());
    }
    let hash = match (parsed.proof_bytes, parsed.proof_hash) {
        (Some(bytes), _) => sha256(&bytes),
        (None, Some(hash)) => hash,
        (None, None) => sha256(payload.unwrap_or_default()),
    };
    OracleOutcome::Proof {
        hash,
        metadata: ProofMetadata {
            decision,
            confidence,
            risk_score: parsed.risk_score.unwrap_or(100 - confidence),
            model_hash: parsed.model_hash,
            input_hash: parsed.input_hash,
            attestation: parsed.signature,
        },
    }
}

fn sha256(bytes: &[u8]) -> B256 {
    B256::from_slice(Sha256::digest(bytes).as_slice())
}

fn locate_payload(raw: &[u8]) -> Option<&[u8]> {
    let trimmed = raw.trim_ascii();
    if trimmed.starts_with(b"{") {
        return Some(trimmed);
    }
    DELIMITED_PROOF
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_bytes().trim_ascii())
}

/// Source of decisions.
///
/// Implementations run the model and prover. Failures are not errors: an
/// unusable run yields [`OracleOutcome::Unparseable`].
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Evaluates `features` and returns the decoded prover output.
    async fn decide(&self, features: &serde_json::Value) -> OracleOutcome;
}
