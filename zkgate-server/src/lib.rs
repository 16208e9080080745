//! Commitment signing and authorization gate service.
//!
//! Serves the commitment signer as a paid resource behind the HTTP 402
//! payment challenge, and exposes the authorization gate that consumes the
//! signed commitments.
//!
//! # Modules
//!
//! - [`app`] - Wiring of signer, gate, oracle and payment gate from configuration
//! - [`config`] - Server configuration with environment variable expansion
//! - [`error`] - Handler and startup error types
//! - [`handlers`] - Axum route handlers and router builder
//! - [`oracle`] - Decision oracle running an external prover command

pub mod app;
pub mod config;
pub mod error;
pub mod handlers;
pub mod oracle;

pub use app::App;
pub use handlers::{AppState, app_router};
