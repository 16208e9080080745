//! Client for a deployed authorization gate contract.
//!
//! The contract runs the same checks as [`AuthorizationGate`](crate::gate::AuthorizationGate)
//! and reports rejections as custom errors, which [`GateContract`] decodes
//! back into [`AuthorizationError`]. Atomicity and nonce serialization come
//! from the chain.

use alloy_contract::Error as ContractError;
use alloy_network::ReceiptResponse;
use alloy_primitives::{Address, B256, U256};
use alloy_provider::{PendingTransactionBuilder, Provider};
use async_trait::async_trait;
use std::fmt;
use zkgate::commitment::{AuthorizationRecord, Commitment, CommitmentShape, Decision};
use zkgate::error::AuthorizationError;
use zkgate::ledger::LedgerError;
use zkgate::timestamp::UnixTimestamp;

use crate::abi::IAuthorizationGate::{self, IAuthorizationGateErrors};
use crate::abi::IERC20;
use crate::codec::{CommitmentDomain, encode, to_extended, to_simple};
use crate::gate::{GateCall, GateError, GateEvent, GateLedger};

/// A [`GateLedger`] that submits calls to a deployed gate.
///
/// Transactions are signed by the provider's wallet. The `caller` passed to
/// [`GateLedger::submit`] only labels emitted custody events; the contract
/// authenticates the actual sender.
pub struct GateContract<P> {
    instance: IAuthorizationGate::IAuthorizationGateInstance<P>,
    domain: CommitmentDomain,
    shape: CommitmentShape,
}

impl<P> fmt::Debug for GateContract<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateContract")
            .field("address", &self.domain.verifying_contract)
            .field("chain_id", &self.domain.chain_id)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

impl<P: Provider> GateContract<P> {
    /// Connects to the gate at `domain.verifying_contract`.
    pub fn new(provider: P, domain: CommitmentDomain, shape: CommitmentShape) -> Self {
        Self {
            instance: IAuthorizationGate::new(domain.verifying_contract, provider),
            domain,
            shape,
        }
    }

    /// Address of the gate.
    pub const fn address(&self) -> Address {
        self.domain.verifying_contract
    }

    async fn send_transfer(
        &self,
        recipient: Address,
        amount: U256,
        commitment: &Commitment,
        signature: alloy_primitives::Bytes,
    ) -> Result<(), GateError> {
        let pending = match self.shape {
            CommitmentShape::Simple => {
                let arg = to_simple(commitment).map_err(AuthorizationError::from)?;
                self.instance
                    .executeTransfer(recipient, amount, arg, signature)
                    .send()
                    .await
            }
            CommitmentShape::Extended => {
                let arg = to_extended(commitment).map_err(AuthorizationError::from)?;
                self.instance
                    .executeTransferExtended(recipient, amount, arg, signature)
                    .send()
                    .await
            }
        }
        .map_err(map_contract_error)?;
        confirm(pending).await
    }

    async fn send_store(
        &self,
        commitment: &Commitment,
        signature: alloy_primitives::Bytes,
    ) -> Result<(), GateError> {
        let pending = match self.shape {
            CommitmentShape::Simple => {
                let arg = to_simple(commitment).map_err(AuthorizationError::from)?;
                self.instance.store(arg, signature).send().await
            }
            CommitmentShape::Extended => {
                let arg = to_extended(commitment).map_err(AuthorizationError::from)?;
                self.instance.storeExtended(arg, signature).send().await
            }
        }
        .map_err(map_contract_error)?;
        confirm(pending).await
    }
}

#[async_trait]
impl<P: Provider> GateLedger for GateContract<P> {
    async fn submit(&self, caller: Address, call: GateCall) -> Result<GateEvent, GateError> {
        match call {
            GateCall::ExecuteTransfer {
                recipient,
                amount,
                commitment,
                signature,
            } => {
                self.send_transfer(recipient, amount, &commitment, signature)
                    .await?;
                Ok(GateEvent::TransferExecuted(AuthorizationRecord::for_transfer(
                    &commitment,
                    recipient,
                    amount,
                )))
            }
            GateCall::Store {
                commitment,
                signature,
            } => {
                let commit_id = encode(&commitment, &self.domain, self.shape)
                    .map_err(AuthorizationError::from)?
                    .digest;
                self.send_store(&commitment, signature).await?;
                Ok(GateEvent::CommitmentStored {
                    commit_id,
                    proof_hash: commitment.proof_hash,
                    decision: commitment.decision,
                    nonce: commitment.nonce,
                    timestamp: commitment.timestamp,
                })
            }
            GateCall::Deposit { amount } => {
                let pending = self
                    .instance
                    .deposit(amount)
                    .send()
                    .await
                    .map_err(map_contract_error)?;
                confirm(pending).await?;
                Ok(GateEvent::FundsDeposited {
                    from: caller,
                    amount,
                })
            }
            GateCall::Withdraw { amount } => {
                let pending = self
                    .instance
                    .withdraw(amount)
                    .send()
                    .await
                    .map_err(map_contract_error)?;
                confirm(pending).await?;
                Ok(GateEvent::FundsWithdrawn { to: caller, amount })
            }
        }
    }

    async fn verification(
        &self,
        proof_hash: B256,
    ) -> Result<Option<AuthorizationRecord>, GateError> {
        let record = self
            .instance
            .getVerification(proof_hash)
            .call()
            .await
            .map_err(map_contract_error)?;
        // The contract returns a zeroed record for unknown proofs.
        if record.proofHash.is_zero() {
            return Ok(None);
        }
        Ok(Some(AuthorizationRecord {
            recipient: record.recipient,
            amount: record.amount,
            proof_hash: record.proofHash,
            decision: Decision::from_code(record.decision),
            nonce: record.nonce,
            timestamp: UnixTimestamp::from_secs(record.timestamp.saturating_to()),
        }))
    }

    async fn custody(&self) -> Result<U256, GateError> {
        self.instance
            .custodyBalance()
            .call()
            .await
            .map_err(map_contract_error)
    }

    async fn balance_of(&self, account: Address) -> Result<U256, GateError> {
        let token = self
            .instance
            .token()
            .call()
            .await
            .map_err(map_contract_error)?;
        IERC20::new(token, self.instance.provider())
            .balanceOf(account)
            .call()
            .await
            .map_err(map_contract_error)
    }
}

async fn confirm(pending: PendingTransactionBuilder<alloy_network::Ethereum>) -> Result<(), GateError> {
    let receipt = pending
        .get_receipt()
        .await
        .map_err(|e| GateError::Unavailable(LedgerError::new(e.to_string())))?;
    if !receipt.status() {
        return Err(GateError::Unavailable(LedgerError::new(format!(
            "gate transaction {} reverted",
            receipt.transaction_hash
        ))));
    }
    #[cfg(feature = "telemetry")]
    tracing::info!(tx = %receipt.transaction_hash, "gate transaction mined");
    Ok(())
}

const BINDING_FIELDS: [&str; 3] = ["recipient", "amount", "chainId"];

fn map_contract_error(err: ContractError) -> GateError {
    let Some(decoded) = err.as_decoded_interface_error::<IAuthorizationGateErrors>() else {
        return GateError::Unavailable(LedgerError::new(err.to_string()));
    };
    let rejection = match decoded {
        IAuthorizationGateErrors::NonceReplay(e) => AuthorizationError::NonceReplay { nonce: e.nonce },
        IAuthorizationGateErrors::NotAuthorized(e) => AuthorizationError::NotAuthorized {
            decision: Decision::from_code(e.decision),
        },
        IAuthorizationGateErrors::CommitmentExpired(e) => AuthorizationError::CommitmentExpired {
            timestamp: UnixTimestamp::from_secs(e.timestamp.saturating_to()),
            now: UnixTimestamp::from_secs(e.currentTime.saturating_to()),
        },
        IAuthorizationGateErrors::InvalidSignature(_) => AuthorizationError::InvalidSignature,
        IAuthorizationGateErrors::BindingMismatch(e) => AuthorizationError::BindingMismatch {
            field: BINDING_FIELDS
                .get(usize::from(e.field))
                .copied()
                .unwrap_or("unknown"),
        },
        IAuthorizationGateErrors::NotOwner(e) => AuthorizationError::NotOwner { caller: e.caller },
        IAuthorizationGateErrors::InsufficientCustody(e) => AuthorizationError::InsufficientCustody {
            available: e.available,
            requested: e.requested,
        },
    };
    GateError::Rejected(rejection)
}
