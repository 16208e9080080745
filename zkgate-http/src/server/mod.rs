//! Tower middleware for enforcing payment on protected routes.
//!
//! See [`PaymentRequiredLayer`] for usage.

pub mod error;
pub mod layer;
pub mod paygate;

pub use error::PaygateError;
pub use layer::{PaymentRequiredLayer, PaymentRequiredService};
