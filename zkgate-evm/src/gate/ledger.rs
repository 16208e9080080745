use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use zkgate::commitment::{AuthorizationRecord, Commitment};
use zkgate::error::AuthorizationError;
use zkgate::ledger::LedgerError;
use zkgate::proto::{AsProblem, ErrorReason, Problem};
use zkgate::timestamp::UnixTimestamp;

use super::{AuthorizationGate, GateCall, GateEvent, GateState};

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// Failure of a gate call.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The gate rejected the call. Nothing changed.
    #[error(transparent)]
    Rejected(#[from] AuthorizationError),
    /// The ledger could not be reached or returned something unexpected.
    #[error(transparent)]
    Unavailable(#[from] LedgerError),
}

impl AsProblem for GateError {
    fn as_problem(&self) -> Problem {
        match self {
            Self::Rejected(e) => e.as_problem(),
            Self::Unavailable(e) => Problem::new(ErrorReason::UnexpectedError, e.to_string()),
        }
    }
}

/// A deployed authorization gate.
///
/// Every call is one atomic ledger transaction: it either applies all of its
/// effects (nonce, transfer, record, event) or none of them. Calls are
/// serialized by the ledger, so of two calls racing on one nonce exactly one
/// succeeds.
#[async_trait]
pub trait GateLedger: Send + Sync {
    /// Submits `call` on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Rejected`] if validation failed.
    async fn submit(&self, caller: Address, call: GateCall) -> Result<GateEvent, GateError>;

    /// The first audit record written for `proof_hash`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Unavailable`] if the ledger cannot be read.
    async fn verification(&self, proof_hash: B256)
    -> Result<Option<AuthorizationRecord>, GateError>;

    /// Funds held by the gate.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Unavailable`] if the ledger cannot be read.
    async fn custody(&self) -> Result<U256, GateError>;

    /// Token balance of `account`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Unavailable`] if the ledger cannot be read.
    async fn balance_of(&self, account: Address) -> Result<U256, GateError>;

    /// Validates a commitment and releases `amount` to `recipient`.
    ///
    /// # Errors
    ///
    /// See [`GateLedger::submit`].
    async fn execute_transfer(
        &self,
        caller: Address,
        recipient: Address,
        amount: U256,
        commitment: Commitment,
        signature: Bytes,
    ) -> Result<AuthorizationRecord, GateError> {
        let call = GateCall::ExecuteTransfer {
            recipient,
            amount,
            commitment,
            signature,
        };
        match self.submit(caller, call).await? {
            GateEvent::TransferExecuted(record) => Ok(record),
            other => Err(unexpected(&other)),
        }
    }

    /// Records a commitment without moving funds and returns its id.
    ///
    /// # Errors
    ///
    /// See [`GateLedger::submit`].
    async fn store(
        &self,
        caller: Address,
        commitment: Commitment,
        signature: Bytes,
    ) -> Result<B256, GateError> {
        let call = GateCall::Store {
            commitment,
            signature,
        };
        match self.submit(caller, call).await? {
            GateEvent::CommitmentStored { commit_id, .. } => Ok(commit_id),
            other => Err(unexpected(&other)),
        }
    }

    /// Owner-only deposit into custody.
    ///
    /// # Errors
    ///
    /// See [`GateLedger::submit`].
    async fn deposit(&self, caller: Address, amount: U256) -> Result<GateEvent, GateError> {
        self.submit(caller, GateCall::Deposit { amount }).await
    }

    /// Owner-only withdrawal from custody.
    ///
    /// # Errors
    ///
    /// See [`GateLedger::submit`].
    async fn withdraw(&self, caller: Address, amount: U256) -> Result<GateEvent, GateError> {
        self.submit(caller, GateCall::Withdraw { amount }).await
    }
}

fn unexpected(event: &GateEvent) -> GateError {
    GateError::Unavailable(LedgerError::new(format!("unexpected gate event {event:?}")))
}

#[async_trait]
impl<T: GateLedger + ?Sized> GateLedger for Arc<T> {
    async fn submit(&self, caller: Address, call: GateCall) -> Result<GateEvent, GateError> {
        (**self).submit(caller, call).await
    }

    async fn verification(
        &self,
        proof_hash: B256,
    ) -> Result<Option<AuthorizationRecord>, GateError> {
        (**self).verification(proof_hash).await
    }

    async fn custody(&self) -> Result<U256, GateError> {
        (**self).custody().await
    }

    async fn balance_of(&self, account: Address) -> Result<U256, GateError> {
        (**self).balance_of(account).await
    }
}

/// In-process ledger hosting a single gate.
///
/// Each call runs against a copy of the state that replaces the committed
/// state only if the call succeeds. The mutex models the ledger's
/// transaction ordering.
#[derive(Debug)]
pub struct InMemoryLedger {
    gate: AuthorizationGate,
    state: Mutex<GateState>,
    clock: fn() -> UnixTimestamp,
}

impl InMemoryLedger {
    /// Deploys `gate` with `owner` and registered `signer`.
    #[must_use]
    pub fn new(gate: AuthorizationGate, owner: Address, signer: Address) -> Self {
        Self {
            gate,
            state: Mutex::new(GateState::new(owner, signer)),
            clock: UnixTimestamp::now,
        }
    }

    /// Replaces the clock used as the block timestamp.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> UnixTimestamp) -> Self {
        self.clock = clock;
        self
    }

    /// The hosted gate's rules.
    #[must_use]
    pub const fn gate(&self) -> &AuthorizationGate {
        &self.gate
    }

    /// Runs `f` as one atomic transaction.
    ///
    /// # Errors
    ///
    /// Propagates the error of `f`, in which case no effect persists.
    pub async fn transact<T, F>(&self, f: F) -> Result<T, AuthorizationError>
    where
        F: FnOnce(&mut GateState) -> Result<T, AuthorizationError> + Send,
    {
        let mut committed = self.state.lock().await;
        let mut draft = committed.clone();
        let out = f(&mut draft)?;
        *committed = draft;
        Ok(out)
    }

    /// A copy of the committed state.
    pub async fn snapshot(&self) -> GateState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl GateLedger for InMemoryLedger {
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "zkgate.gate.submit", skip_all, err, fields(caller = %caller))
    )]
    async fn submit(&self, caller: Address, call: GateCall) -> Result<GateEvent, GateError> {
        let now = (self.clock)();
        let event = self
            .transact(|state| self.gate.apply(state, caller, call, now))
            .await?;
        #[cfg(feature = "telemetry")]
        tracing::info!(event = ?event, "gate call committed");
        Ok(event)
    }

    async fn verification(
        &self,
        proof_hash: B256,
    ) -> Result<Option<AuthorizationRecord>, GateError> {
        Ok(self.state.lock().await.verification(&proof_hash).cloned())
    }

    async fn custody(&self) -> Result<U256, GateError> {
        Ok(self.state.lock().await.custody)
    }

    async fn balance_of(&self, account: Address) -> Result<U256, GateError> {
        Ok(self.state.lock().await.balance_of(&account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CommitmentDomain;
    use crate::signer::CommitmentSigner;
    use alloy_primitives::address;
    use alloy_signer_local::PrivateKeySigner;
    use std::time::Duration;
    use zkgate::commitment::{CommitmentShape, Decision};

    const OWNER: Address = address!("0x00000000000000000000000000000000000000f0");
    const RECIPIENT: Address = address!("0x00000000000000000000000000000000000000aa");

    fn deploy() -> (Arc<InMemoryLedger>, CommitmentSigner) {
        let domain =
            CommitmentDomain::new(5_042_002, address!("0x00000000000000000000000000000000000000c0"));
        let signer = CommitmentSigner::new(PrivateKeySigner::random(), domain.clone(), CommitmentShape::Simple);
        let gate = AuthorizationGate::new(domain, CommitmentShape::Simple)
            .with_freshness(Duration::from_secs(3600));
        let ledger = InMemoryLedger::new(gate, OWNER, signer.address());
        (Arc::new(ledger), signer)
    }

    async fn commitment(signer: &CommitmentSigner, nonce: u64, age: u64) -> (Commitment, Bytes) {
        let commitment = Commitment::new(
            B256::repeat_byte(0x11),
            Decision::AUTHORIZED,
            UnixTimestamp::from_secs(UnixTimestamp::now().as_secs() - age),
            U256::from(nonce),
        );
        let signed = signer.sign_commitment(commitment).await.unwrap();
        (signed.commitment, signed.signature)
    }

    #[tokio::test]
    async fn test_replay_after_successful_transfer() {
        let (ledger, signer) = deploy();
        ledger.deposit(OWNER, U256::from(10_000)).await.unwrap();
        let (c, sig) = commitment(&signer, 42, 0).await;

        let record = ledger
            .execute_transfer(RECIPIENT, RECIPIENT, U256::from(3000), c.clone(), sig.clone())
            .await
            .unwrap();
        assert_eq!(record.nonce, U256::from(42));
        let err = ledger
            .execute_transfer(RECIPIENT, RECIPIENT, U256::from(3000), c, sig)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::Rejected(AuthorizationError::NonceReplay { .. })
        ));
        assert_eq!(ledger.custody().await.unwrap(), U256::from(7000));
        assert_eq!(ledger.balance_of(RECIPIENT).await.unwrap(), U256::from(3000));
        let events = ledger.snapshot().await.events;
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_transfer_rolls_back_nonce() {
        let (ledger, signer) = deploy();
        ledger.deposit(OWNER, U256::from(100)).await.unwrap();
        let (c, sig) = commitment(&signer, 7, 0).await;
        let before = ledger.snapshot().await;

        let err = ledger
            .execute_transfer(RECIPIENT, RECIPIENT, U256::from(101), c.clone(), sig.clone())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::Rejected(AuthorizationError::InsufficientCustody { .. })
        ));
        assert_eq!(ledger.snapshot().await, before);

        ledger
            .execute_transfer(RECIPIENT, RECIPIENT, U256::from(100), c, sig)
            .await
            .unwrap();
        assert_eq!(ledger.custody().await.unwrap(), U256::ZERO);
    }

    #[tokio::test]
    async fn test_expired_and_foreign_commitments_leave_state_untouched() {
        let (ledger, signer) = deploy();
        ledger.deposit(OWNER, U256::from(1000)).await.unwrap();
        let before = ledger.snapshot().await;

        let (c, sig) = commitment(&signer, 1, 2 * 3600).await;
        let err = ledger
            .execute_transfer(RECIPIENT, RECIPIENT, U256::from(10), c, sig)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::Rejected(AuthorizationError::CommitmentExpired { .. })
        ));

        let intruder = CommitmentSigner::new(
            PrivateKeySigner::random(),
            signer.domain().clone(),
            CommitmentShape::Simple,
        );
        let (c, sig) = commitment(&intruder, 2, 0).await;
        let err = ledger
            .execute_transfer(RECIPIENT, RECIPIENT, U256::from(10), c, sig)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::Rejected(AuthorizationError::InvalidSignature)
        ));
        assert_eq!(ledger.snapshot().await, before);
        assert_eq!(ledger.balance_of(RECIPIENT).await.unwrap(), U256::ZERO);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_share_one_nonce() {
        let (ledger, signer) = deploy();
        ledger.deposit(OWNER, U256::from(1_000_000)).await.unwrap();
        let (c, sig) = commitment(&signer, 99, 0).await;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let (c, sig) = (c.clone(), sig.clone());
                tokio::spawn(async move {
                    ledger
                        .execute_transfer(RECIPIENT, RECIPIENT, U256::from(1), c, sig)
                        .await
                })
            })
            .collect();
        let mut executed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => executed += 1,
                Err(e) => assert!(matches!(
                    e,
                    GateError::Rejected(AuthorizationError::NonceReplay { .. })
                )),
            }
        }
        assert_eq!(executed, 1);
    }

    #[tokio::test]
    async fn test_store_and_audit_query() {
        let (ledger, signer) = deploy();
        let (c, sig) = commitment(&signer, 5, 0).await;
        let commit_id = ledger.store(OWNER, c.clone(), sig).await.unwrap();
        assert_ne!(commit_id, B256::ZERO);
        let record = ledger.verification(c.proof_hash).await.unwrap().unwrap();
        assert_eq!(record.nonce, U256::from(5));
        assert_eq!(record.amount, U256::ZERO);
        assert!(ledger.verification(B256::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fixed_clock_drives_freshness() {
        let (ledger, signer) = deploy();
        let ledger = Arc::try_unwrap(ledger)
            .unwrap()
            .with_clock(|| UnixTimestamp::from_secs(u64::MAX / 2));
        ledger.deposit(OWNER, U256::from(10)).await.unwrap();
        let (c, sig) = commitment(&signer, 1, 0).await;
        let err = ledger
            .execute_transfer(RECIPIENT, RECIPIENT, U256::from(1), c, sig)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GateError::Rejected(AuthorizationError::CommitmentExpired { .. })
        ));
    }
}
