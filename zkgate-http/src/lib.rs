#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport layer for the zkgate payment-challenge protocol.
//!
//! Provides header encoding/decoding, constants, and (feature-gated)
//! server middleware and a delegated verification client.
//!
//! # Modules
//!
//! - [`constants`] - HTTP header names and status codes
//! - [`headers`] - Base64 encoding/decoding for protocol headers
//! - [`error`] - HTTP transport error types
//! - `server` - Tower payment-challenge middleware (feature: `server`)
//! - `facilitator` - Remote verification service client (feature: `client`)

pub mod constants;
pub mod error;
pub mod headers;

#[cfg(feature = "client")]
pub mod facilitator;
#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "client")]
pub use facilitator::FacilitatorVerifier;
#[cfg(feature = "server")]
pub use server::{PaymentRequiredLayer, PaymentRequiredService};
