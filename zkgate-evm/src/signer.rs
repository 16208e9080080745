//! Commitment signer.
//!
//! Turns oracle output into a [`SignedCommitment`]: it stamps the current
//! time and a fresh nonce, applies any transfer bindings, encodes the result
//! with the [`codec`](crate::codec) under the target gate's domain, and signs
//! the digest. The signer keeps no persistent state; nonce uniqueness comes
//! from the [`NonceStrategy`].
//!
//! With an attestor configured, an authorized decision is only signed if it
//! comes with the attestor's signature over its proof digest.

use alloy_primitives::{Address, Bytes, FixedBytes, Signature, U256};
use alloy_signer_local::PrivateKeySigner;
use rand::{RngExt, rng};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use zkgate::commitment::{Commitment, CommitmentShape, SignedCommitment, TransferBinding};
use zkgate::error::{SchemaMismatch, SignerError};
use zkgate::oracle::OracleOutput;
use zkgate::timestamp::UnixTimestamp;

use crate::codec::{CommitmentDomain, encode};
use crate::signature::verify_attestation;

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// A trait that abstracts signing operations, allowing both owned signers and
/// `Arc`-wrapped signers.
pub trait SignerLike: Send + Sync {
    /// Returns the address of the signer.
    fn address(&self) -> Address;

    /// Signs the given hash.
    fn sign_hash(
        &self,
        hash: &FixedBytes<32>,
    ) -> impl Future<Output = Result<Signature, alloy_signer::Error>> + Send;
}

impl SignerLike for PrivateKeySigner {
    fn address(&self) -> Address {
        Self::address(self)
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        alloy_signer::Signer::sign_hash(self, hash).await
    }
}

impl<T: SignerLike + Send + Sync> SignerLike for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        (**self).sign_hash(hash).await
    }
}

/// How the signer picks nonces.
#[derive(Debug, Default)]
pub enum NonceStrategy {
    /// Uniformly random 256-bit nonces. Unique across restarts and replicas.
    #[default]
    Random,
    /// A monotonically increasing counter. Unique only within one process.
    Sequential(AtomicU64),
}

impl NonceStrategy {
    /// A counter starting at `start`.
    #[must_use]
    pub const fn sequential(start: u64) -> Self {
        Self::Sequential(AtomicU64::new(start))
    }

    /// Draws the next nonce.
    pub fn next_nonce(&self) -> U256 {
        match self {
            Self::Random => {
                let bytes: [u8; 32] = rng().random();
                U256::from_be_bytes(bytes)
            }
            Self::Sequential(counter) => U256::from(counter.fetch_add(1, Ordering::Relaxed)),
        }
    }
}

/// Signs commitments for one authorization gate.
#[derive(Debug)]
pub struct CommitmentSigner<S = PrivateKeySigner> {
    signer: S,
    domain: CommitmentDomain,
    shape: CommitmentShape,
    nonces: NonceStrategy,
    defaults: TransferBinding,
    attestor: Option<Address>,
}

impl CommitmentSigner<PrivateKeySigner> {
    /// Builds a signer from a hex-encoded private key.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::MissingSigningKey`] if `key` is absent or blank,
    /// and [`SignerError::InvalidSigningKey`] if it cannot be parsed.
    pub fn from_private_key(
        key: Option<&str>,
        domain: CommitmentDomain,
        shape: CommitmentShape,
    ) -> Result<Self, SignerError> {
        let key = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(SignerError::MissingSigningKey)?;
        let signer = key
            .parse::<PrivateKeySigner>()
            .map_err(|e| SignerError::InvalidSigningKey(e.to_string()))?;
        Ok(Self::new(signer, domain, shape))
    }
}

impl<S: SignerLike> CommitmentSigner<S> {
    /// Signs `shape` commitments under `domain` with random nonces.
    pub fn new(signer: S, domain: CommitmentDomain, shape: CommitmentShape) -> Self {
        Self {
            signer,
            domain,
            shape,
            nonces: NonceStrategy::default(),
            defaults: TransferBinding::default(),
            attestor: None,
        }
    }

    /// Overrides the nonce strategy.
    #[must_use]
    pub fn with_nonces(mut self, nonces: NonceStrategy) -> Self {
        self.nonces = nonces;
        self
    }

    /// Bindings applied to every commitment unless the request overrides them.
    #[must_use]
    pub fn with_defaults(mut self, defaults: TransferBinding) -> Self {
        self.defaults = defaults;
        self
    }

    /// Requires authorizations to carry `attestor`'s signature over the proof.
    #[must_use]
    pub const fn with_attestor(mut self, attestor: Address) -> Self {
        self.attestor = Some(attestor);
        self
    }

    /// The configured attestor, if any.
    pub const fn attestor(&self) -> Option<Address> {
        self.attestor
    }

    /// The underlying key.
    pub const fn inner(&self) -> &S {
        &self.signer
    }

    /// Address commitments are signed by.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Domain commitments are bound to.
    pub const fn domain(&self) -> &CommitmentDomain {
        &self.domain
    }

    /// Shape of the produced commitments.
    pub const fn shape(&self) -> CommitmentShape {
        self.shape
    }

    /// Checks that the configured defaults complete the shape.
    ///
    /// Run at startup: a signer that cannot map any oracle output into its
    /// shape is a configuration error, not a per-request failure.
    ///
    /// # Errors
    ///
    /// Returns the [`SchemaMismatch`] the codec would raise on every request.
    pub fn preflight(&self) -> Result<(), SchemaMismatch> {
        let sample = self.commitment_for(&OracleOutput::DENY, &TransferBinding::default());
        encode(&sample, &self.domain, self.shape).map(|_| ())
    }

    /// Builds the unsigned commitment for `output`.
    ///
    /// Bindings in `binding` take precedence over the configured defaults. For
    /// the extended shape, confidence comes from the oracle, and chain id and
    /// agent default to the domain chain and the signer address.
    pub fn commitment_for(&self, output: &OracleOutput, binding: &TransferBinding) -> Commitment {
        let mut commitment = Commitment::new(
            output.proof_hash,
            output.decision,
            UnixTimestamp::now(),
            self.nonces.next_nonce(),
        )
        .with_binding(&self.defaults)
        .with_binding(binding);
        if self.shape == CommitmentShape::Extended {
            commitment.confidence = Some(output.confidence);
            commitment.chain_id = commitment.chain_id.or(Some(self.domain.chain_id));
            commitment.agent = commitment.agent.or_else(|| Some(self.signer.address()));
        }
        commitment
    }

    /// Signs a fresh commitment for an unattested `output`.
    ///
    /// # Errors
    ///
    /// Same as [`CommitmentSigner::sign_attested`].
    pub async fn sign(
        &self,
        output: &OracleOutput,
        binding: &TransferBinding,
    ) -> Result<SignedCommitment, SignerError> {
        self.sign_attested(output, None, binding).await
    }

    /// Signs a fresh commitment for `output`, checking `attestation` first.
    ///
    /// Denials never need an attestation.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::UnattestedProof`] if an attestor is configured,
    /// the output authorizes, and `attestation` is absent or not the
    /// attestor's signature over the proof digest. Returns
    /// [`SignerError::SchemaMismatch`] if the output and bindings do not fit
    /// the shape, or [`SignerError::Signing`] if the key failed to sign.
    pub async fn sign_attested(
        &self,
        output: &OracleOutput,
        attestation: Option<&[u8]>,
        binding: &TransferBinding,
    ) -> Result<SignedCommitment, SignerError> {
        self.check_attestation(output, attestation)?;
        let commitment = self.commitment_for(output, binding);
        self.sign_commitment(commitment).await
    }

    fn check_attestation(
        &self,
        output: &OracleOutput,
        attestation: Option<&[u8]>,
    ) -> Result<(), SignerError> {
        let Some(attestor) = self.attestor else {
            return Ok(());
        };
        if !output.decision.is_authorized() {
            return Ok(());
        }
        match attestation {
            Some(sig) if verify_attestation(&output.proof_hash, sig, attestor) => Ok(()),
            _ => Err(SignerError::UnattestedProof {
                proof_hash: output.proof_hash,
                attestor,
            }),
        }
    }

    /// Signs a caller-built commitment, keeping its nonce and timestamp.
    ///
    /// # Errors
    ///
    /// Same as [`CommitmentSigner::sign`].
    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "zkgate.signer.sign",
            skip_all,
            err,
            fields(nonce = %commitment.nonce, decision = %commitment.decision, shape = %self.shape)
        )
    )]
    pub async fn sign_commitment(
        &self,
        commitment: Commitment,
    ) -> Result<SignedCommitment, SignerError> {
        let encoded = encode(&commitment, &self.domain, self.shape)?;
        let signature = self
            .signer
            .sign_hash(&encoded.digest)
            .await
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        Ok(SignedCommitment {
            commitment,
            signature: Bytes::copy_from_slice(&signature.as_bytes()),
            commit_id: encoded.digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::is_signed_by;
    use alloy_primitives::{B256, address};
    use alloy_signer::SignerSync;
    use zkgate::commitment::Decision;

    fn domain() -> CommitmentDomain {
        CommitmentDomain::new(5_042_002, address!("0x00000000000000000000000000000000000000c0"))
    }

    fn output() -> OracleOutput {
        OracleOutput::new(1, 87, B256::repeat_byte(0x11)).unwrap()
    }

    #[tokio::test]
    async fn test_signature_recovers_to_signer() {
        let signer =
            CommitmentSigner::new(PrivateKeySigner::random(), domain(), CommitmentShape::Simple);
        let signed = signer.sign(&output(), &TransferBinding::default()).await.unwrap();
        assert_eq!(signed.commitment.decision, Decision::AUTHORIZED);
        assert_eq!(signed.commitment.proof_hash, B256::repeat_byte(0x11));
        assert_eq!(signed.signature.len(), 65);
        assert!(is_signed_by(&signed.signature, &signed.commit_id, signer.address()));
        let reencoded = encode(&signed.commitment, &domain(), CommitmentShape::Simple).unwrap();
        assert_eq!(reencoded.digest, signed.commit_id);
    }

    #[test]
    fn test_missing_and_invalid_keys() {
        for key in [None, Some(""), Some("   ")] {
            let err = CommitmentSigner::from_private_key(key, domain(), CommitmentShape::Simple)
                .unwrap_err();
            assert!(matches!(err, SignerError::MissingSigningKey));
        }
        let err =
            CommitmentSigner::from_private_key(Some("0xnothex"), domain(), CommitmentShape::Simple)
                .unwrap_err();
        assert!(matches!(err, SignerError::InvalidSigningKey(_)));
        let ok = CommitmentSigner::from_private_key(
            Some("0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"),
            domain(),
            CommitmentShape::Simple,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_sequential_nonces_are_unique() {
        let nonces = NonceStrategy::sequential(42);
        assert_eq!(nonces.next_nonce(), U256::from(42));
        assert_eq!(nonces.next_nonce(), U256::from(43));
        let random = NonceStrategy::Random;
        assert_ne!(random.next_nonce(), random.next_nonce());
    }

    #[tokio::test]
    async fn test_simple_shape_refuses_bindings() {
        let signer =
            CommitmentSigner::new(PrivateKeySigner::random(), domain(), CommitmentShape::Simple);
        let binding = TransferBinding {
            recipient: Some(Address::repeat_byte(0xaa)),
            ..TransferBinding::default()
        };
        let err = signer.sign(&output(), &binding).await.unwrap_err();
        assert!(matches!(
            err,
            SignerError::SchemaMismatch(SchemaMismatch::UnexpectedField { field: "recipient", .. })
        ));
        assert!(signer.preflight().is_ok());
    }

    #[tokio::test]
    async fn test_extended_shape_fills_oracle_and_domain_fields() {
        let key = PrivateKeySigner::random();
        let agent = key.address();
        let defaults = TransferBinding {
            model_hash: Some(B256::repeat_byte(2)),
            input_hash: Some(B256::repeat_byte(3)),
            token: Some(address!("0x3600000000000000000000000000000000000000")),
            recipient: Some(Address::repeat_byte(0xaa)),
            amount: Some(U256::from(3000)),
            attestor: Some(Address::repeat_byte(0xcc)),
            ..TransferBinding::default()
        };
        let signer = CommitmentSigner::new(key, domain(), CommitmentShape::Extended)
            .with_defaults(defaults)
            .with_nonces(NonceStrategy::sequential(7));
        assert!(signer.preflight().is_ok());

        let request = TransferBinding {
            amount: Some(U256::from(5000)),
            ..TransferBinding::default()
        };
        let signed = signer.sign(&output(), &request).await.unwrap();
        let commitment = &signed.commitment;
        assert_eq!(commitment.confidence, Some(87));
        assert_eq!(commitment.chain_id, Some(5_042_002));
        assert_eq!(commitment.agent, Some(agent));
        assert_eq!(commitment.amount, Some(U256::from(5000)));
        assert_eq!(commitment.recipient, Some(Address::repeat_byte(0xaa)));
        assert_eq!(commitment.nonce, U256::from(8));
        assert!(is_signed_by(&signed.signature, &signed.commit_id, agent));
    }

    #[test]
    fn test_extended_preflight_names_missing_default() {
        let signer =
            CommitmentSigner::new(PrivateKeySigner::random(), domain(), CommitmentShape::Extended);
        assert_eq!(
            signer.preflight().unwrap_err(),
            SchemaMismatch::MissingField {
                shape: CommitmentShape::Extended,
                field: "modelHash"
            }
        );
    }

    #[tokio::test]
    async fn test_attestor_gates_authorizations() {
        let attestor = PrivateKeySigner::random();
        let signer =
            CommitmentSigner::new(PrivateKeySigner::random(), domain(), CommitmentShape::Simple)
                .with_attestor(attestor.address());
        let binding = TransferBinding::default();
        let output = output();

        let good = attestor
            .sign_message_sync(output.proof_hash.as_slice())
            .unwrap()
            .as_bytes();
        let signed = signer
            .sign_attested(&output, Some(&good[..]), &binding)
            .await
            .unwrap();
        assert_eq!(signed.commitment.decision, Decision::AUTHORIZED);

        let stranger = PrivateKeySigner::random()
            .sign_message_sync(output.proof_hash.as_slice())
            .unwrap()
            .as_bytes();
        for attestation in [None, Some(&stranger[..]), Some(&good[..10])] {
            let err = signer
                .sign_attested(&output, attestation, &binding)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                SignerError::UnattestedProof { proof_hash, attestor: a }
                    if proof_hash == output.proof_hash && a == attestor.address()
            ));
        }

        let denial = signer.sign(&OracleOutput::DENY, &binding).await.unwrap();
        assert_eq!(denial.commitment.decision, Decision::DENIED);
    }
}
