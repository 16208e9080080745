//! Error types for the gate service.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use zkgate::amount::MoneyAmountError;
use zkgate::error::{AuthorizationError, SchemaMismatch, SignerError};
use zkgate::proto::{AsProblem, ErrorReason, Problem};
use zkgate::registry::RegistryError;
use zkgate_evm::GateError;
use zkgate_http::facilitator::FacilitatorError;

use crate::config::ConfigError;

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The authorization gate refused the call or could not be reached.
    #[error(transparent)]
    Gate(#[from] GateError),
    /// The commitment could not be signed.
    #[error(transparent)]
    Signer(#[from] SignerError),
    /// The request body is malformed or out of range.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The request needs the oracle but none is configured.
    #[error("no decision oracle configured; supply oracle output in the request")]
    OracleNotConfigured,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Gate(GateError::Rejected(rejection)) => rejection_status(rejection),
            Self::Gate(GateError::Unavailable(_)) | Self::OracleNotConfigured => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Signer(SignerError::SchemaMismatch(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Signer(SignerError::UnattestedProof { .. }) => StatusCode::FORBIDDEN,
            Self::Signer(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn problem(&self) -> Problem {
        match self {
            Self::Gate(err) => err.as_problem(),
            Self::Signer(SignerError::SchemaMismatch(_)) => {
                Problem::new(ErrorReason::SchemaMismatch, self.to_string())
            }
            Self::Signer(SignerError::UnattestedProof { .. }) => {
                Problem::new(ErrorReason::UnattestedProof, self.to_string())
            }
            Self::InvalidRequest(_) => Problem::new(ErrorReason::InvalidFormat, self.to_string()),
            Self::Signer(_) | Self::OracleNotConfigured => {
                Problem::new(ErrorReason::UnexpectedError, self.to_string())
            }
        }
    }
}

const fn rejection_status(rejection: &AuthorizationError) -> StatusCode {
    match rejection {
        AuthorizationError::NonceReplay { .. } => StatusCode::CONFLICT,
        AuthorizationError::NotAuthorized { .. }
        | AuthorizationError::InvalidSignature
        | AuthorizationError::BindingMismatch { .. }
        | AuthorizationError::NotOwner { .. } => StatusCode::FORBIDDEN,
        AuthorizationError::CommitmentExpired { .. } => StatusCode::GONE,
        AuthorizationError::InsufficientCustody { .. } | AuthorizationError::SchemaMismatch(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        (status, Json(self.problem())).into_response()
    }
}

/// Errors that prevent the service from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The signing key is missing or invalid.
    #[error(transparent)]
    Signer(#[from] SignerError),
    /// The signer's defaults cannot complete the configured commitment shape.
    #[error("signer cannot produce its configured shape: {0}")]
    Schema(#[from] SchemaMismatch),
    /// The configured price is not a valid amount for the asset.
    #[error("invalid price: {0}")]
    Price(#[from] MoneyAmountError),
    /// No asset was configured and the network has no known deployment.
    #[error("no known token deployment on {0}; set payment.asset and payment.decimals")]
    UnknownAsset(String),
    /// The proof registry could not be opened.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The remote verifier could not be configured.
    #[error(transparent)]
    Facilitator(#[from] FacilitatorError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use zkgate::ledger::LedgerError;

    #[test]
    fn test_rejection_statuses() {
        let cases = [
            (AuthorizationError::NonceReplay { nonce: U256::from(1) }, StatusCode::CONFLICT),
            (AuthorizationError::InvalidSignature, StatusCode::FORBIDDEN),
            (
                AuthorizationError::NotOwner {
                    caller: Address::ZERO,
                },
                StatusCode::FORBIDDEN,
            ),
            (
                AuthorizationError::InsufficientCustody {
                    available: U256::ZERO,
                    requested: U256::from(5),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (rejection, status) in cases {
            let err = ApiError::Gate(GateError::Rejected(rejection));
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_unavailable_ledger_is_503() {
        let err = ApiError::Gate(GateError::Unavailable(LedgerError::new("rpc down")));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
