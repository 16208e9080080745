//! Payment challenge gate.
//!
//! Each protected call moves through `NoProof -> Challenged -> ProofSubmitted ->
//! {Verified | Rejected}`. [`PaymentGate::evaluate`] drives one step of that
//! machine: without a proof it issues a [`PaymentRequired`] challenge, with a
//! proof it verifies the payment and either lets the call proceed with a
//! [`Settlement`] or re-challenges with the rejection reason attached.
//!
//! Verification is delegated to a [`PaymentVerifier`]. Two interchangeable
//! implementations exist: [`LedgerVerifier`](crate::ledger::LedgerVerifier)
//! queries the ledger directly, and `zkgate-http` ships a delegated verifier
//! that calls a remote verification service. After a proof verifies, the gate
//! consumes it in a [`ProofRegistry`]: one payment unlocks exactly one call.

use alloy_primitives::{Address, B256, U256, hex};
use async_trait::async_trait;
use rand::RngExt;
use rand::rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::chain::ChainId;
use crate::ledger::LedgerError;
use crate::proto::{
    AsProblem, EXACT_SCHEME, ErrorReason, PROTOCOL_VERSION, PaymentProof, PaymentRequired,
    PaymentRequirement, Problem, RequirementMetadata, Settlement,
};
use crate::registry::{Consumption, ProofRegistry, RegistryError};
use crate::timestamp::UnixTimestamp;

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// Reasons a submitted payment proof is refused.
///
/// Every rejection carries enough detail for the caller to decide whether a
/// retry can succeed: [`PaymentRejection::InsufficientAmount`] is retryable
/// with a larger payment, [`PaymentRejection::ProofAlreadyConsumed`] never is.
///
/// On the wire a rejection is `{"reason": <code>, "details": ...}`, which is how
/// a delegated verification service reports one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "reason", content = "details", rename_all = "snake_case")]
pub enum PaymentRejection {
    /// The proof header could not be decoded.
    #[error("invalid payment proof: {0}")]
    InvalidFormat(String),
    /// Protocol version or scheme not supported.
    #[error("unsupported protocol version {version} or scheme {scheme:?}")]
    UnsupportedScheme {
        /// Version presented.
        version: u8,
        /// Scheme presented.
        scheme: String,
    },
    /// The proof names a different network.
    #[error("payment on {actual} does not match required network {expected}")]
    NetworkMismatch {
        /// Required network.
        expected: ChainId,
        /// Network named by the proof.
        actual: ChainId,
    },
    /// The transaction does not exist on the ledger.
    #[error("transaction {0} not found")]
    TxNotFound(B256),
    /// The transaction reverted.
    #[error("transaction {0} failed")]
    TxFailed(B256),
    /// No transfer of the required asset reached the required recipient.
    #[error("transaction does not pay {expected}")]
    WrongRecipient {
        /// Required recipient.
        expected: Address,
    },
    /// Less than the required amount was transferred.
    #[error("paid {paid}, required {required}")]
    InsufficientAmount {
        /// Amount transferred.
        paid: U256,
        /// Amount required.
        required: U256,
    },
    /// More than the required amount was transferred under [`AmountPolicy::Exact`].
    #[error("paid {paid}, expected exactly {required}")]
    AmountMismatch {
        /// Amount transferred.
        paid: U256,
        /// Amount required.
        required: U256,
    },
    /// The proof already unlocked a call.
    #[error("payment {tx_hash} was already used for {resource}")]
    ProofAlreadyConsumed {
        /// The reused transaction.
        tx_hash: B256,
        /// Resource the proof was first spent on.
        resource: String,
    },
}

impl AsProblem for PaymentRejection {
    fn as_problem(&self) -> Problem {
        let reason = match self {
            Self::InvalidFormat(_) => ErrorReason::InvalidFormat,
            Self::UnsupportedScheme { .. } => ErrorReason::UnsupportedScheme,
            Self::NetworkMismatch { .. } => ErrorReason::NetworkMismatch,
            Self::TxNotFound(_) => ErrorReason::TxNotFound,
            Self::TxFailed(_) => ErrorReason::TxFailed,
            Self::WrongRecipient { .. } => ErrorReason::WrongRecipient,
            Self::InsufficientAmount { .. } => ErrorReason::InsufficientAmount,
            Self::AmountMismatch { .. } => ErrorReason::AmountMismatch,
            Self::ProofAlreadyConsumed { .. } => ErrorReason::ProofAlreadyConsumed,
        };
        Problem::new(reason, self.to_string())
    }
}

/// Failures that prevent a verification decision from being reached.
///
/// These are not rejections: the proof may still be valid, and the caller may
/// retry once the dependency recovers.
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    /// The ledger could not be queried.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The consumed-proof registry could not be updated.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A delegated verification service failed.
    #[error("verification service error: {0}")]
    Upstream(String),
}

/// Outcome of verifying one proof against one requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// All checks passed.
    Verified(Settlement),
    /// A check failed.
    Rejected(PaymentRejection),
}

impl Verification {
    /// Returns `true` if the payment verified.
    #[must_use]
    pub const fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }
}

/// How the transferred amount is compared against the required amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountPolicy {
    /// `paid >= required`.
    #[default]
    AtLeast,
    /// `paid == required`.
    Exact,
}

impl AmountPolicy {
    /// Applies the policy.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentRejection::InsufficientAmount`] when `paid < required`
    /// under either policy, and [`PaymentRejection::AmountMismatch`] when
    /// `paid > required` under [`AmountPolicy::Exact`].
    pub fn check(self, paid: U256, required: U256) -> Result<(), PaymentRejection> {
        if paid < required {
            return Err(PaymentRejection::InsufficientAmount { paid, required });
        }
        if self == Self::Exact && paid != required {
            return Err(PaymentRejection::AmountMismatch { paid, required });
        }
        Ok(())
    }
}

/// Checks one and two of verification: protocol/scheme, then network.
///
/// Every [`PaymentVerifier`] runs these before touching the ledger.
///
/// # Errors
///
/// Returns [`PaymentRejection::UnsupportedScheme`] or
/// [`PaymentRejection::NetworkMismatch`].
pub fn check_scheme_and_network(
    proof: &PaymentProof,
    requirement: &PaymentRequirement,
) -> Result<(), PaymentRejection> {
    if proof.version != PROTOCOL_VERSION
        || proof.scheme != EXACT_SCHEME
        || proof.scheme != requirement.scheme
    {
        return Err(PaymentRejection::UnsupportedScheme {
            version: proof.version,
            scheme: proof.scheme.clone(),
        });
    }
    if proof.network != requirement.network {
        return Err(PaymentRejection::NetworkMismatch {
            expected: requirement.network.clone(),
            actual: proof.network.clone(),
        });
    }
    Ok(())
}

/// Verifies a payment proof against a requirement.
///
/// Implementations must check, in order: protocol/scheme, network,
/// transaction existence and success, then recipient and amount. Transport
/// failures are reported as [`VerifierError`], never as a rejection.
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    /// Verifies `proof` against `requirement`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifierError`] if a dependency could not be reached.
    async fn verify(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<Verification, VerifierError>;
}

#[async_trait]
impl<T: PaymentVerifier + ?Sized> PaymentVerifier for Arc<T> {
    async fn verify(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<Verification, VerifierError> {
        (**self).verify(proof, requirement).await
    }
}

/// What a protected resource charges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTerms {
    /// Network payments must settle on.
    pub network: ChainId,
    /// Price in the asset's smallest unit.
    pub amount: U256,
    /// Who gets paid.
    pub recipient: Address,
    /// Token contract to pay in.
    pub asset: Address,
    /// Human-readable description.
    pub description: String,
}

impl PaymentTerms {
    /// Issues a fresh requirement for `resource` with a random request id.
    #[must_use]
    pub fn requirement(&self, resource: &str) -> PaymentRequirement {
        let request_id: [u8; 16] = rng().random();
        PaymentRequirement {
            scheme: EXACT_SCHEME.to_owned(),
            network: self.network.clone(),
            amount: self.amount,
            resource: resource.to_owned(),
            recipient: self.recipient,
            asset: self.asset,
            description: self.description.clone(),
            metadata: RequirementMetadata {
                request_id: hex::encode(request_id),
                timestamp: UnixTimestamp::now(),
            },
        }
    }
}

/// Result of [`PaymentGate::evaluate`].
#[derive(Debug, Clone)]
pub enum Evaluation {
    /// No proof was presented: the caller must pay.
    Challenge(PaymentRequired),
    /// The proof verified and was consumed: the call may proceed.
    Proceed(Settlement),
    /// The proof was refused. `challenge` carries the reason and fresh terms.
    Rejected {
        /// Re-issued challenge with the reason attached.
        challenge: PaymentRequired,
        /// Why the proof was refused.
        rejection: PaymentRejection,
    },
}

/// Gates access to paid resources behind on-ledger payment.
#[derive(Clone)]
pub struct PaymentGate {
    terms: PaymentTerms,
    verifier: Arc<dyn PaymentVerifier>,
    registry: Arc<dyn ProofRegistry>,
}

impl std::fmt::Debug for PaymentGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGate")
            .field("terms", &self.terms)
            .finish_non_exhaustive()
    }
}

impl PaymentGate {
    /// Creates a gate charging `terms`, verifying with `verifier`, and
    /// consuming proofs in `registry`.
    pub fn new(
        terms: PaymentTerms,
        verifier: Arc<dyn PaymentVerifier>,
        registry: Arc<dyn ProofRegistry>,
    ) -> Self {
        Self {
            terms,
            verifier,
            registry,
        }
    }

    /// Returns the configured terms.
    #[must_use]
    pub const fn terms(&self) -> &PaymentTerms {
        &self.terms
    }

    /// Issues a challenge for `resource`.
    #[must_use]
    pub fn challenge(&self, resource: &str) -> PaymentRequired {
        PaymentRequired::new(self.terms.requirement(resource))
    }

    /// Evaluates one request for `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifierError`] if verification could not reach a decision.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "zkgate.payment.evaluate", skip_all, err, fields(resource = %resource))
    )]
    pub async fn evaluate(
        &self,
        resource: &str,
        proof: Option<&PaymentProof>,
    ) -> Result<Evaluation, VerifierError> {
        let requirement = self.terms.requirement(resource);
        let Some(proof) = proof else {
            return Ok(Evaluation::Challenge(PaymentRequired::new(requirement)));
        };
        match self.verify_payment(proof, &requirement).await? {
            Verification::Verified(settlement) => Ok(Evaluation::Proceed(settlement)),
            Verification::Rejected(rejection) => Ok(Self::reject(requirement, rejection)),
        }
    }

    /// Re-issues a challenge for a request whose proof could not be decoded.
    #[must_use]
    pub fn reject_malformed(&self, resource: &str, details: String) -> Evaluation {
        Self::reject(
            self.terms.requirement(resource),
            PaymentRejection::InvalidFormat(details),
        )
    }

    /// Verifies `proof` against `requirement` and, on success, consumes it.
    ///
    /// A proof is consumed once verification passes. If the protected call
    /// then fails, hand it back with [`PaymentGate::release`].
    ///
    /// # Errors
    ///
    /// Returns [`VerifierError`] if the verifier or registry failed.
    pub async fn verify_payment(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<Verification, VerifierError> {
        let settlement = match self.verifier.verify(proof, requirement).await? {
            Verification::Verified(settlement) => settlement,
            rejected @ Verification::Rejected(_) => return Ok(rejected),
        };
        match self
            .registry
            .consume(settlement.tx_hash, &requirement.resource)
            .await?
        {
            Consumption::Fresh => {
                #[cfg(feature = "telemetry")]
                tracing::info!(
                    tx_hash = %settlement.tx_hash,
                    payer = %settlement.payer,
                    amount = %settlement.amount,
                    "payment verified"
                );
                Ok(Verification::Verified(settlement))
            }
            Consumption::AlreadyConsumed { resource } => Ok(Verification::Rejected(
                PaymentRejection::ProofAlreadyConsumed {
                    tx_hash: settlement.tx_hash,
                    resource,
                },
            )),
        }
    }

    /// Returns a consumed proof to the payer after the call it unlocked failed.
    ///
    /// # Errors
    ///
    /// Returns [`VerifierError::Registry`] if the registry could not be updated.
    pub async fn release(&self, settlement: &Settlement) -> Result<(), VerifierError> {
        self.registry.release(settlement.tx_hash).await?;
        #[cfg(feature = "telemetry")]
        tracing::info!(tx_hash = %settlement.tx_hash, "payment released after failed call");
        Ok(())
    }

    fn reject(requirement: PaymentRequirement, rejection: PaymentRejection) -> Evaluation {
        #[cfg(feature = "telemetry")]
        tracing::info!(reason = %rejection, resource = %requirement.resource, "payment rejected");
        let challenge = PaymentRequired::new(requirement).with_problem(&rejection.as_problem());
        Evaluation::Rejected {
            challenge,
            rejection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerTransaction, LedgerVerifier, PaymentLedger, TokenTransfer, TxLookup};
    use crate::registry::MemoryProofRegistry;
    use alloy_primitives::address;
    use std::collections::HashMap;

    const RECIPIENT: Address = address!("0x00000000000000000000000000000000000000a1");
    const PAYER: Address = address!("0x00000000000000000000000000000000000000b2");
    const USDC: Address = address!("0x3600000000000000000000000000000000000000");

    struct FixedLedger(HashMap<B256, TxLookup>);

    #[async_trait]
    impl PaymentLedger for FixedLedger {
        async fn lookup(&self, tx_hash: B256) -> Result<TxLookup, LedgerError> {
            Ok(self.0.get(&tx_hash).cloned().unwrap_or(TxLookup::NotFound))
        }
    }

    fn network() -> ChainId {
        ChainId::new("arc-testnet", "5042002")
    }

    fn confirmed(tx_hash: B256, to: Address, amount: u64) -> (B256, TxLookup) {
        let tx = LedgerTransaction {
            tx_hash,
            from: PAYER,
            transfers: vec![TokenTransfer {
                asset: USDC,
                from: PAYER,
                to,
                amount: U256::from(amount),
            }],
        };
        (tx_hash, TxLookup::Confirmed(tx))
    }

    fn gate(entries: Vec<(B256, TxLookup)>) -> PaymentGate {
        let ledger = FixedLedger(entries.into_iter().collect());
        PaymentGate::new(
            PaymentTerms {
                network: network(),
                amount: U256::from(3000),
                recipient: RECIPIENT,
                asset: USDC,
                description: "inference".to_owned(),
            },
            Arc::new(LedgerVerifier::new(ledger)),
            Arc::new(MemoryProofRegistry::new()),
        )
    }

    fn proof(tx_hash: B256) -> PaymentProof {
        PaymentProof::exact(network(), tx_hash, PAYER)
    }

    #[tokio::test]
    async fn test_no_proof_is_challenged() {
        let gate = gate(vec![]);
        let Evaluation::Challenge(challenge) = gate.evaluate("/infer", None).await.unwrap() else {
            panic!("expected challenge");
        };
        let requirement = &challenge.accepts[0];
        assert_eq!(requirement.amount, U256::from(3000));
        assert_eq!(requirement.recipient, RECIPIENT);
        assert_eq!(requirement.resource, "/infer");
        assert_eq!(requirement.request_id().len(), 32);
        assert!(challenge.error.is_none());
    }

    #[tokio::test]
    async fn test_exact_payment_proceeds() {
        let tx = B256::repeat_byte(1);
        let gate = gate(vec![confirmed(tx, RECIPIENT, 3000)]);
        let Evaluation::Proceed(settlement) =
            gate.evaluate("/infer", Some(&proof(tx))).await.unwrap()
        else {
            panic!("expected proceed");
        };
        assert_eq!(settlement.tx_hash, tx);
        assert_eq!(settlement.payer, PAYER);
        assert_eq!(settlement.amount, U256::from(3000));
        assert_eq!(settlement.network, network());
    }

    #[tokio::test]
    async fn test_underpayment_is_rechallenged_with_reason() {
        let tx = B256::repeat_byte(2);
        let gate = gate(vec![confirmed(tx, RECIPIENT, 1000)]);
        let Evaluation::Rejected {
            challenge,
            rejection,
        } = gate.evaluate("/infer", Some(&proof(tx))).await.unwrap()
        else {
            panic!("expected rejection");
        };
        assert_eq!(
            rejection,
            PaymentRejection::InsufficientAmount {
                paid: U256::from(1000),
                required: U256::from(3000),
            }
        );
        assert_eq!(challenge.reason, Some(ErrorReason::InsufficientAmount));
        assert_eq!(challenge.accepts.len(), 1);
    }

    #[tokio::test]
    async fn test_proof_unlocks_exactly_one_call() {
        let tx = B256::repeat_byte(3);
        let gate = gate(vec![confirmed(tx, RECIPIENT, 5000)]);
        assert!(matches!(
            gate.evaluate("/infer", Some(&proof(tx))).await.unwrap(),
            Evaluation::Proceed(_)
        ));
        let second = gate.evaluate("/other", Some(&proof(tx))).await.unwrap();
        let Evaluation::Rejected { rejection, .. } = second else {
            panic!("expected rejection");
        };
        assert_eq!(
            rejection,
            PaymentRejection::ProofAlreadyConsumed {
                tx_hash: tx,
                resource: "/infer".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_proof_is_not_consumed() {
        let tx = B256::repeat_byte(4);
        let gate = gate(vec![confirmed(tx, RECIPIENT, 3000)]);
        let mut wrong = proof(tx);
        wrong.network = ChainId::eip155(1);
        assert!(matches!(
            gate.evaluate("/infer", Some(&wrong)).await.unwrap(),
            Evaluation::Rejected {
                rejection: PaymentRejection::NetworkMismatch { .. },
                ..
            }
        ));
        assert!(matches!(
            gate.evaluate("/infer", Some(&proof(tx))).await.unwrap(),
            Evaluation::Proceed(_)
        ));
    }

    #[tokio::test]
    async fn test_released_proof_unlocks_another_call() {
        let tx = B256::repeat_byte(5);
        let gate = gate(vec![confirmed(tx, RECIPIENT, 3000)]);
        let Evaluation::Proceed(settlement) =
            gate.evaluate("/infer", Some(&proof(tx))).await.unwrap()
        else {
            panic!("expected proceed");
        };
        gate.release(&settlement).await.unwrap();
        assert!(matches!(
            gate.evaluate("/infer", Some(&proof(tx))).await.unwrap(),
            Evaluation::Proceed(_)
        ));
    }

    #[test]
    fn test_amount_policy() {
        let required = U256::from(3000);
        assert!(AmountPolicy::AtLeast.check(U256::from(3000), required).is_ok());
        assert!(AmountPolicy::AtLeast.check(U256::from(9000), required).is_ok());
        assert!(AmountPolicy::Exact.check(U256::from(3000), required).is_ok());
        assert!(matches!(
            AmountPolicy::Exact.check(U256::from(3001), required),
            Err(PaymentRejection::AmountMismatch { .. })
        ));
        assert!(matches!(
            AmountPolicy::Exact.check(U256::from(2999), required),
            Err(PaymentRejection::InsufficientAmount { .. })
        ));
    }

    #[test]
    fn test_scheme_checked_before_network() {
        let gate = gate(vec![]);
        let requirement = gate.terms().requirement("/infer");
        let mut bad = proof(B256::ZERO);
        bad.version = 2;
        bad.network = ChainId::eip155(1);
        assert!(matches!(
            check_scheme_and_network(&bad, &requirement),
            Err(PaymentRejection::UnsupportedScheme { version: 2, .. })
        ));
    }
}
