#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the zkgate payment-challenge and commitment-authorization protocol.
//!
//! This crate provides the foundational types shared by every zkgate component.
//! It is blockchain-agnostic: the EIP-712 codec, signer, and authorization gate
//! live in `zkgate-evm`, and the HTTP transport lives in `zkgate-http`.
//!
//! # Overview
//!
//! An external decision oracle produces a decision, a confidence score, and a
//! proof digest. A signer turns that output into a signed, replay-protected
//! [`Commitment`](commitment::Commitment), and an authorization gate refuses to
//! release funds until a valid, fresh, non-replayed commitment is presented.
//! When producing the commitment is itself a paid service, access is guarded by
//! the HTTP 402 challenge/response flow in [`payment`].
//!
//! # Modules
//!
//! - [`amount`] - Human-readable price parsing into atomic token units
//! - [`chain`] - CAIP-2 chain identifiers
//! - [`commitment`] - Commitment records, decisions, and audit records
//! - [`error`] - Authorization and signing error taxonomy
//! - [`ledger`] - Ledger lookups backing direct payment verification
//! - [`oracle`] - Decision oracle boundary and output decoding
//! - [`payment`] - Payment challenge gate and verifier interface
//! - [`proto`] - Wire format types for challenges, proofs, and settlements
//! - [`registry`] - Consumed payment proof registries
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod amount;
pub mod chain;
pub mod commitment;
pub mod encoding;
pub mod error;
pub mod ledger;
pub mod oracle;
pub mod payment;
pub mod proto;
pub mod registry;
pub mod timestamp;
