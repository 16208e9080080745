#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EVM realization of the zkgate commitment-authorization protocol.
//!
//! Commitments are encoded as EIP-712 typed data, signed with a secp256k1 key,
//! and verified by an authorization gate that runs on an atomic ledger.
//!
//! # Modules
//!
//! - [`codec`] - EIP-712 encoding of simple and extended commitments
//! - [`signer`] - Turns oracle output into signed, replay-protected commitments
//! - [`signature`] - Signer recovery and proof attestation checks
//! - [`gate`] - The authorization gate state machine and its ledgers
//! - [`networks`] - Known networks and token deployments
//!
//! # Feature Flags
//!
//! - `provider` - On-chain payment lookup and the deployed gate contract client
//! - `telemetry` - `tracing` spans and events

pub mod abi;
pub mod codec;
pub mod gate;
pub mod networks;
pub mod signature;
pub mod signer;

#[cfg(feature = "provider")]
pub mod contract;
#[cfg(feature = "provider")]
pub mod ledger;

pub use codec::{CommitmentDomain, EncodedCommitment, encode};
pub use gate::{AuthorizationGate, GateCall, GateError, GateEvent, GateLedger, InMemoryLedger};
pub use signer::{CommitmentSigner, NonceStrategy, SignerLike};

#[cfg(feature = "provider")]
pub use contract::GateContract;
#[cfg(feature = "provider")]
pub use ledger::EvmPaymentLedger;
