//! Authorization gate.
//!
//! The gate releases custody funds only for a commitment that is unreplayed,
//! authorized, fresh, and signed by the registered signer. Checks run in that
//! order; the first failure rejects the call:
//!
//! 1. the nonce has not been consumed ([`AuthorizationError::NonceReplay`])
//! 2. the decision is [`Decision::AUTHORIZED`](zkgate::commitment::Decision::AUTHORIZED)
//!    ([`AuthorizationError::NotAuthorized`])
//! 3. `now <= timestamp + freshness` ([`AuthorizationError::CommitmentExpired`]).
//!    Only the lower bound is enforced: a commitment stamped in the future,
//!    however far, passes. The nonce is what stops it from being reused.
//! 4. the signature over the codec digest recovers to the registered signer
//!    ([`AuthorizationError::InvalidSignature`])
//!
//! Extended commitments must also match the transfer arguments
//! ([`AuthorizationError::BindingMismatch`]), and custody must cover the amount
//! ([`AuthorizationError::InsufficientCustody`]).
//!
//! [`AuthorizationGate::apply`] is a pure transition over [`GateState`]. It may
//! leave the state partially modified when it fails, so it must run inside a
//! ledger transaction that discards the draft on error. [`GateLedger`] is that
//! ledger seen from the outside.

mod ledger;

pub use ledger::{GateError, GateLedger, InMemoryLedger};

use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use zkgate::commitment::{AuthorizationRecord, Commitment, CommitmentShape, Decision};
use zkgate::error::AuthorizationError;
use zkgate::timestamp::UnixTimestamp;

use crate::codec::{CommitmentDomain, encode};
use crate::signature::is_signed_by;

/// Default freshness window: one hour.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(60 * 60);

/// Everything a gate instance owns on its ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateState {
    /// May deposit and withdraw.
    pub owner: Address,
    /// The single identity whose commitments release funds.
    pub signer: Address,
    /// Funds held by the gate.
    pub custody: U256,
    /// Consumed nonces of `signer`. Only grows.
    pub nonces: HashSet<U256>,
    /// Audit trail. Append-only.
    pub records: Vec<AuthorizationRecord>,
    /// Balances credited by transfers and withdrawals.
    pub balances: HashMap<Address, U256>,
    /// Emitted events, in order.
    pub events: Vec<GateEvent>,
}

impl GateState {
    /// A gate with empty custody.
    #[must_use]
    pub fn new(owner: Address, signer: Address) -> Self {
        Self {
            owner,
            signer,
            custody: U256::ZERO,
            nonces: HashSet::new(),
            records: Vec::new(),
            balances: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// The first record written for `proof_hash`.
    #[must_use]
    pub fn verification(&self, proof_hash: &B256) -> Option<&AuthorizationRecord> {
        self.records.iter().find(|r| &r.proof_hash == proof_hash)
    }

    /// Balance credited to `account`.
    #[must_use]
    pub fn balance_of(&self, account: &Address) -> U256 {
        self.balances.get(account).copied().unwrap_or_default()
    }

    fn credit(&mut self, account: Address, amount: U256) {
        let balance = self.balances.entry(account).or_default();
        *balance = balance.saturating_add(amount);
    }

    fn debit_custody(&mut self, amount: U256) -> Result<(), AuthorizationError> {
        self.custody = self
            .custody
            .checked_sub(amount)
            .ok_or(AuthorizationError::InsufficientCustody {
                available: self.custody,
                requested: amount,
            })?;
        Ok(())
    }
}

/// A state-changing call on the gate.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "camelCase")]
pub enum GateCall {
    /// Validate a commitment and release `amount` to `recipient`.
    #[serde(rename_all = "camelCase")]
    ExecuteTransfer {
        /// Who receives the funds.
        recipient: Address,
        /// How much is released.
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
        /// The authorizing commitment.
        commitment: Commitment,
        /// Signature over the commitment digest.
        signature: Bytes,
    },
    /// Validate and record a commitment without moving funds.
    #[serde(rename_all = "camelCase")]
    Store {
        /// The commitment to record.
        commitment: Commitment,
        /// Signature over the commitment digest.
        signature: Bytes,
    },
    /// Owner adds funds to custody.
    Deposit {
        /// Amount added.
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
    },
    /// Owner takes funds out of custody.
    Withdraw {
        /// Amount removed.
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
    },
}

/// An event emitted by a successful call.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum GateEvent {
    /// Funds were released under a commitment.
    TransferExecuted(AuthorizationRecord),
    /// A commitment was recorded.
    #[serde(rename_all = "camelCase")]
    CommitmentStored {
        /// The commitment's signing digest.
        commit_id: B256,
        /// Proof digest.
        proof_hash: B256,
        /// Decision.
        decision: Decision,
        /// Nonce.
        #[serde_as(as = "DisplayFromStr")]
        nonce: U256,
        /// Timestamp.
        timestamp: UnixTimestamp,
    },
    /// The owner deposited funds.
    FundsDeposited {
        /// Depositor.
        from: Address,
        /// Amount.
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
    },
    /// The owner withdrew funds.
    FundsWithdrawn {
        /// Receiver.
        to: Address,
        /// Amount.
        #[serde_as(as = "DisplayFromStr")]
        amount: U256,
    },
}

/// Validation rules of one gate instance.
#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    domain: CommitmentDomain,
    shape: CommitmentShape,
    freshness: Duration,
}

impl AuthorizationGate {
    /// A gate verifying `shape` commitments signed under `domain`.
    #[must_use]
    pub const fn new(domain: CommitmentDomain, shape: CommitmentShape) -> Self {
        Self {
            domain,
            shape,
            freshness: DEFAULT_FRESHNESS,
        }
    }

    /// Overrides the freshness window.
    #[must_use]
    pub const fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    /// The domain commitments must be signed under.
    #[must_use]
    pub const fn domain(&self) -> &CommitmentDomain {
        &self.domain
    }

    /// The commitment shape.
    #[must_use]
    pub const fn shape(&self) -> CommitmentShape {
        self.shape
    }

    /// The freshness window.
    #[must_use]
    pub const fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Applies `call` by `caller` at time `now` to `state`.
    ///
    /// # Errors
    ///
    /// Returns the first [`AuthorizationError`] raised by validation. `state`
    /// may then hold partial effects and must be discarded.
    pub fn apply(
        &self,
        state: &mut GateState,
        caller: Address,
        call: GateCall,
        now: UnixTimestamp,
    ) -> Result<GateEvent, AuthorizationError> {
        let event = match call {
            GateCall::ExecuteTransfer {
                recipient,
                amount,
                commitment,
                signature,
            } => {
                self.authorize(state, &commitment, &signature, now)?;
                self.check_binding(&commitment, recipient, amount)?;
                state.nonces.insert(commitment.nonce);
                state.debit_custody(amount)?;
                state.credit(recipient, amount);
                let record = AuthorizationRecord::for_transfer(&commitment, recipient, amount);
                state.records.push(record.clone());
                GateEvent::TransferExecuted(record)
            }
            GateCall::Store {
                commitment,
                signature,
            } => {
                check_nonce(state, &commitment)?;
                let commit_id = self.check_signature(state, &commitment, &signature)?;
                state.nonces.insert(commitment.nonce);
                state.records.push(AuthorizationRecord::for_transfer(
                    &commitment,
                    Address::ZERO,
                    U256::ZERO,
                ));
                GateEvent::CommitmentStored {
                    commit_id,
                    proof_hash: commitment.proof_hash,
                    decision: commitment.decision,
                    nonce: commitment.nonce,
                    timestamp: commitment.timestamp,
                }
            }
            GateCall::Deposit { amount } => {
                check_owner(state, caller)?;
                state.custody = state.custody.saturating_add(amount);
                GateEvent::FundsDeposited {
                    from: caller,
                    amount,
                }
            }
            GateCall::Withdraw { amount } => {
                check_owner(state, caller)?;
                state.debit_custody(amount)?;
                state.credit(caller, amount);
                GateEvent::FundsWithdrawn { to: caller, amount }
            }
        };
        state.events.push(event.clone());
        Ok(event)
    }

    fn authorize(
        &self,
        state: &GateState,
        commitment: &Commitment,
        signature: &[u8],
        now: UnixTimestamp,
    ) -> Result<B256, AuthorizationError> {
        check_nonce(state, commitment)?;
        if !commitment.decision.is_authorized() {
            return Err(AuthorizationError::NotAuthorized {
                decision: commitment.decision,
            });
        }
        if !commitment.timestamp.is_fresh_at(now, self.freshness) {
            return Err(AuthorizationError::CommitmentExpired {
                timestamp: commitment.timestamp,
                now,
            });
        }
        self.check_signature(state, commitment, signature)
    }

    fn check_signature(
        &self,
        state: &GateState,
        commitment: &Commitment,
        signature: &[u8],
    ) -> Result<B256, AuthorizationError> {
        let encoded = encode(commitment, &self.domain, self.shape)?;
        if is_signed_by(signature, &encoded.digest, state.signer) {
            Ok(encoded.digest)
        } else {
            Err(AuthorizationError::InvalidSignature)
        }
    }

    fn check_binding(
        &self,
        commitment: &Commitment,
        recipient: Address,
        amount: U256,
    ) -> Result<(), AuthorizationError> {
        if self.shape == CommitmentShape::Simple {
            return Ok(());
        }
        if commitment.recipient != Some(recipient) {
            return Err(AuthorizationError::BindingMismatch { field: "recipient" });
        }
        if commitment.amount != Some(amount) {
            return Err(AuthorizationError::BindingMismatch { field: "amount" });
        }
        if commitment.chain_id != Some(self.domain.chain_id) {
            return Err(AuthorizationError::BindingMismatch { field: "chainId" });
        }
        Ok(())
    }
}

fn check_nonce(state: &GateState, commitment: &Commitment) -> Result<(), AuthorizationError> {
    if state.nonces.contains(&commitment.nonce) {
        return Err(AuthorizationError::NonceReplay {
            nonce: commitment.nonce,
        });
    }
    Ok(())
}

fn check_owner(state: &GateState, caller: Address) -> Result<(), AuthorizationError> {
    if caller == state.owner {
        Ok(())
    } else {
        Err(AuthorizationError::NotOwner { caller })
    }
}
