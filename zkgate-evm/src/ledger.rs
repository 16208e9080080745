//! On-chain payment lookup.
//!
//! [`EvmPaymentLedger`] answers [`PaymentLedger::lookup`] from an RPC node: it
//! fetches the transaction, then its receipt, and extracts every ERC-20
//! `Transfer` log. Deciding whether the transfers satisfy a requirement is left
//! to [`LedgerVerifier`](zkgate::ledger::LedgerVerifier).

use alloy_network::{ReceiptResponse, TransactionResponse};
use alloy_primitives::B256;
use alloy_provider::Provider;
use alloy_rpc_types_eth::Log;
use async_trait::async_trait;
use zkgate::ledger::{LedgerError, LedgerTransaction, PaymentLedger, TokenTransfer, TxLookup};

use crate::abi::IERC20Events;

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// A [`PaymentLedger`] backed by an EVM JSON-RPC provider.
#[derive(Debug, Clone)]
pub struct EvmPaymentLedger<P> {
    provider: P,
}

impl<P> EvmPaymentLedger<P> {
    /// Queries `provider`.
    pub const fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: Provider> PaymentLedger for EvmPaymentLedger<P> {
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "zkgate.evm.lookup", skip_all, err, fields(tx_hash = %tx_hash))
    )]
    async fn lookup(&self, tx_hash: B256) -> Result<TxLookup, LedgerError> {
        let Some(tx) = self
            .provider
            .get_transaction_by_hash(tx_hash)
            .await
            .map_err(|e| LedgerError::new(e.to_string()))?
        else {
            return Ok(TxLookup::NotFound);
        };
        let Some(receipt) = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| LedgerError::new(e.to_string()))?
        else {
            return Ok(TxLookup::NotFound);
        };
        if !receipt.status() {
            return Ok(TxLookup::Failed);
        }
        let transfers: Vec<_> = receipt.inner.logs().iter().filter_map(decode_transfer).collect();
        #[cfg(feature = "telemetry")]
        tracing::debug!(transfers = transfers.len(), "transaction confirmed");
        Ok(TxLookup::Confirmed(LedgerTransaction {
            tx_hash,
            from: tx.from(),
            transfers,
        }))
    }
}

fn decode_transfer(log: &Log) -> Option<TokenTransfer> {
    let decoded = log.log_decode::<IERC20Events::Transfer>().ok()?;
    let asset = decoded.inner.address;
    let event = decoded.inner.data;
    Some(TokenTransfer {
        asset,
        from: event.from,
        to: event.to,
        amount: event.value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, LogData, U256};
    use alloy_sol_types::SolEvent;

    fn rpc_log(address: Address, data: LogData) -> Log {
        Log {
            inner: alloy_primitives::Log { address, data },
            ..Log::default()
        }
    }

    #[test]
    fn test_decodes_erc20_transfer() {
        let usdc = Address::repeat_byte(0x36);
        let event = IERC20Events::Transfer {
            from: Address::repeat_byte(1),
            to: Address::repeat_byte(2),
            value: U256::from(3000),
        };
        let transfer = decode_transfer(&rpc_log(usdc, event.encode_log_data())).unwrap();
        assert_eq!(
            transfer,
            TokenTransfer {
                asset: usdc,
                from: Address::repeat_byte(1),
                to: Address::repeat_byte(2),
                amount: U256::from(3000),
            }
        );
    }

    #[test]
    fn test_ignores_other_logs() {
        let data = LogData::new_unchecked(vec![B256::repeat_byte(0xee)], vec![1, 2, 3].into());
        assert!(decode_transfer(&rpc_log(Address::ZERO, data)).is_none());
    }
}
