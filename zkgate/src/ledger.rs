//! Ledger lookups backing direct payment verification.
//!
//! A [`PaymentLedger`] answers one question: what happened in transaction `x`?
//! [`LedgerVerifier`] turns that answer into a verification decision, and
//! [`CachedLedger`] memoizes confirmed answers in front of a slow ledger.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::payment::{
    AmountPolicy, PaymentRejection, PaymentVerifier, Verification, VerifierError,
    check_scheme_and_network,
};
use crate::proto::{PaymentProof, PaymentRequirement, Settlement};
use crate::timestamp::UnixTimestamp;

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// A single token movement inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    /// Token contract.
    pub asset: Address,
    /// Sender.
    pub from: Address,
    /// Receiver.
    pub to: Address,
    /// Amount in atomic units.
    pub amount: U256,
}

/// A transaction that executed successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    /// Transaction hash.
    pub tx_hash: B256,
    /// Transaction sender.
    pub from: Address,
    /// Token transfers emitted by the transaction.
    pub transfers: Vec<TokenTransfer>,
}

impl LedgerTransaction {
    /// Sum of `asset` transferred to `recipient`, or `None` if nothing was.
    #[must_use]
    pub fn paid_to(&self, recipient: Address, asset: Address) -> Option<U256> {
        self.transfers
            .iter()
            .filter(|t| t.to == recipient && t.asset == asset)
            .map(|t| t.amount)
            .reduce(U256::saturating_add)
    }
}

/// What the ledger knows about a transaction hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxLookup {
    /// No such transaction, or it has no receipt yet.
    NotFound,
    /// The transaction executed and reverted.
    Failed,
    /// The transaction executed successfully.
    Confirmed(LedgerTransaction),
}

/// The ledger could not be queried. Never a rejection: the caller may retry.
#[derive(Debug, thiserror::Error)]
#[error("ledger unavailable: {0}")]
pub struct LedgerError(String);

impl LedgerError {
    /// Wraps a transport failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Read access to transaction outcomes.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Looks up a transaction by hash.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the ledger could not be reached.
    async fn lookup(&self, tx_hash: B256) -> Result<TxLookup, LedgerError>;
}

#[async_trait]
impl<T: PaymentLedger + ?Sized> PaymentLedger for Arc<T> {
    async fn lookup(&self, tx_hash: B256) -> Result<TxLookup, LedgerError> {
        (**self).lookup(tx_hash).await
    }
}

/// Verifies payments by querying the ledger directly.
#[derive(Debug)]
pub struct LedgerVerifier<L> {
    ledger: L,
    policy: AmountPolicy,
}

impl<L> LedgerVerifier<L> {
    /// Verifies against `ledger` with the default [`AmountPolicy::AtLeast`].
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            policy: AmountPolicy::default(),
        }
    }

    /// Overrides the amount policy.
    #[must_use]
    pub fn with_policy(mut self, policy: AmountPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl<L: PaymentLedger> PaymentVerifier for LedgerVerifier<L> {
    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "zkgate.ledger.verify",
            skip_all,
            err,
            fields(tx_hash = %proof.payload.tx_hash, network = %proof.network)
        )
    )]
    async fn verify(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<Verification, VerifierError> {
        if let Err(rejection) = check_scheme_and_network(proof, requirement) {
            return Ok(Verification::Rejected(rejection));
        }
        let tx_hash = proof.payload.tx_hash;
        let tx = match self.ledger.lookup(tx_hash).await? {
            TxLookup::NotFound => {
                return Ok(Verification::Rejected(PaymentRejection::TxNotFound(tx_hash)));
            }
            TxLookup::Failed => {
                return Ok(Verification::Rejected(PaymentRejection::TxFailed(tx_hash)));
            }
            TxLookup::Confirmed(tx) => tx,
        };
        let Some(paid) = tx.paid_to(requirement.recipient, requirement.asset) else {
            return Ok(Verification::Rejected(PaymentRejection::WrongRecipient {
                expected: requirement.recipient,
            }));
        };
        if let Err(rejection) = self.policy.check(paid, requirement.amount) {
            return Ok(Verification::Rejected(rejection));
        }
        Ok(Verification::Verified(Settlement {
            network: requirement.network.clone(),
            tx_hash,
            payer: tx.from,
            amount: paid,
            asset: requirement.asset,
            timestamp: UnixTimestamp::now(),
        }))
    }
}

/// Read-through cache of confirmed transactions.
///
/// Only [`TxLookup::Confirmed`] answers are cached: a successful transaction is
/// an immutable ledger fact, while "not found" may change on the next block.
/// The cache never decides whether a proof was already used; that is the job
/// of a [`ProofRegistry`](crate::registry::ProofRegistry).
#[derive(Debug)]
pub struct CachedLedger<L> {
    inner: L,
    confirmed: DashMap<B256, LedgerTransaction>,
}

impl<L> CachedLedger<L> {
    /// Wraps `inner` with an empty cache.
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            confirmed: DashMap::new(),
        }
    }

    /// Number of cached transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.confirmed.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty()
    }
}

#[async_trait]
impl<L: PaymentLedger> PaymentLedger for CachedLedger<L> {
    async fn lookup(&self, tx_hash: B256) -> Result<TxLookup, LedgerError> {
        if let Some(tx) = self.confirmed.get(&tx_hash) {
            return Ok(TxLookup::Confirmed(tx.clone()));
        }
        let lookup = self.inner.lookup(tx_hash).await?;
        if let TxLookup::Confirmed(tx) = &lookup {
            self.confirmed.insert(tx_hash, tx.clone());
        }
        Ok(lookup)
    }
}
