//! HTTP routes of the gate service.
//!
//! - `POST /commitments` - Sign a commitment (paid)
//! - `POST /gate/transfers` - Execute a committed transfer
//! - `POST /gate/commitments` - Record a commitment without moving funds
//! - `GET /gate/verifications/{proofHash}` - First audit record for a proof
//! - `POST /gate/deposits` - Owner deposit into custody
//! - `POST /gate/withdrawals` - Owner withdrawal from custody
//! - `GET /gate/custody` - Current custody balance

use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes, U256};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use zkgate::commitment::{AuthorizationRecord, Commitment, SignedCommitment, TransferBinding};
use zkgate::oracle::{DecisionOracle, OracleOutput};
use zkgate::payment::PaymentGate;
use zkgate_evm::{CommitmentSigner, GateEvent, GateLedger};
use zkgate_http::PaymentRequiredLayer;

use crate::error::ApiError;

/// Shared state of the service.
#[derive(Clone)]
#[allow(missing_debug_implementations)] // dyn DecisionOracle and dyn GateLedger are not Debug
pub struct AppState {
    /// Signs commitments.
    pub signer: Arc<CommitmentSigner>,
    /// Produces decisions from features. Absent if callers bring their own output.
    pub oracle: Option<Arc<dyn DecisionOracle>>,
    /// The authorization gate.
    pub gate: Arc<dyn GateLedger>,
}

/// Oracle output supplied by the caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleInput {
    /// `0` or `1`.
    pub decision: u8,
    /// `0..=100`.
    pub confidence: u8,
    /// Digest of the proof artifact.
    pub proof_hash: B256,
    /// Attestor's signature over `proof_hash`.
    #[serde(default, alias = "signature")]
    pub attestation: Option<Bytes>,
}

/// Body of `POST /commitments`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    /// Feature vector passed to the configured oracle.
    #[serde(default)]
    pub features: Option<serde_json::Value>,
    /// Ready-made oracle output. Takes precedence over `features`.
    #[serde(default)]
    pub oracle: Option<OracleInput>,
    /// Extended-shape bindings.
    #[serde(default, flatten)]
    pub binding: TransferBinding,
}

/// Body of `POST /gate/transfers`.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Account submitting the call.
    pub caller: Address,
    /// Who receives the funds.
    pub recipient: Address,
    /// How much is released.
    #[serde_as(as = "DisplayFromStr")]
    pub amount: U256,
    /// The authorizing commitment.
    pub commitment: Commitment,
    /// Signature over the commitment digest.
    pub signature: Bytes,
}

/// Body of `POST /gate/commitments`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRequest {
    /// Account submitting the call.
    pub caller: Address,
    /// The commitment to record.
    pub commitment: Commitment,
    /// Signature over the commitment digest.
    pub signature: Bytes,
}

/// Response of `POST /gate/commitments`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResponse {
    /// The commitment's signing digest.
    pub commit_id: B256,
}

/// Body of the custody routes.
#[serde_as]
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CustodyRequest {
    /// Account submitting the call. Must be the owner.
    pub caller: Address,
    /// Amount moved.
    #[serde_as(as = "DisplayFromStr")]
    pub amount: U256,
}

/// Response of `GET /gate/custody`.
#[serde_as]
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CustodyResponse {
    /// Funds held by the gate.
    #[serde_as(as = "DisplayFromStr")]
    pub balance: U256,
}

/// Builds the service router. `POST /commitments` is charged through `payment`.
pub fn app_router(state: AppState, payment: Arc<PaymentGate>) -> Router {
    Router::new()
        .route(
            "/commitments",
            post(sign_commitment).layer(PaymentRequiredLayer::new(payment)),
        )
        .route("/gate/transfers", post(execute_transfer))
        .route("/gate/commitments", post(store_commitment))
        .route("/gate/verifications/{proof_hash}", get(get_verification))
        .route("/gate/deposits", post(deposit))
        .route("/gate/withdrawals", post(withdraw))
        .route("/gate/custody", get(custody))
        .with_state(state)
}

/// `POST /commitments`
///
/// Caller-supplied oracle output is range checked and rejected if invalid.
/// Output from the configured oracle that cannot be decoded falls back to a
/// signed denial. With an attestor configured, an authorization without a
/// valid attestation is refused with `403`.
async fn sign_commitment(
    State(state): State<AppState>,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignedCommitment>, ApiError> {
    let (output, attestation) = match (request.oracle, request.features) {
        (Some(input), _) => {
            let output = OracleOutput::new(input.decision, input.confidence, input.proof_hash)
                .ok_or_else(|| {
                    ApiError::InvalidRequest(format!(
                        "decision {} / confidence {} out of range",
                        input.decision, input.confidence
                    ))
                })?;
            (output, input.attestation)
        }
        (None, Some(features)) => {
            let oracle = state.oracle.as_ref().ok_or(ApiError::OracleNotConfigured)?;
            let outcome = oracle.decide(&features).await;
            let attestation = outcome.attestation().cloned();
            (outcome.into_output_or_deny(), attestation)
        }
        (None, None) => {
            return Err(ApiError::InvalidRequest(
                "either `oracle` or `features` is required".to_owned(),
            ));
        }
    };
    let signed = state
        .signer
        .sign_attested(&output, attestation.as_ref().map(|a| &a[..]), &request.binding)
        .await?;
    tracing::info!(
        commit_id = %signed.commit_id,
        decision = %signed.commitment.decision,
        "signed commitment"
    );
    Ok(Json(signed))
}

/// `POST /gate/transfers`
async fn execute_transfer(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<AuthorizationRecord>, ApiError> {
    let record = state
        .gate
        .execute_transfer(
            request.caller,
            request.recipient,
            request.amount,
            request.commitment,
            request.signature,
        )
        .await?;
    Ok(Json(record))
}

/// `POST /gate/commitments`
async fn store_commitment(
    State(state): State<AppState>,
    Json(request): Json<StoreRequest>,
) -> Result<Json<StoreResponse>, ApiError> {
    let commit_id = state
        .gate
        .store(request.caller, request.commitment, request.signature)
        .await?;
    Ok(Json(StoreResponse { commit_id }))
}

/// `GET /gate/verifications/{proofHash}`
///
/// Answers `null` when no record exists for the proof.
async fn get_verification(
    State(state): State<AppState>,
    Path(proof_hash): Path<B256>,
) -> Result<Json<Option<AuthorizationRecord>>, ApiError> {
    Ok(Json(state.gate.verification(proof_hash).await?))
}

async fn deposit(
    State(state): State<AppState>,
    Json(request): Json<CustodyRequest>,
) -> Result<Json<GateEvent>, ApiError> {
    Ok(Json(state.gate.deposit(request.caller, request.amount).await?))
}

async fn withdraw(
    State(state): State<AppState>,
    Json(request): Json<CustodyRequest>,
) -> Result<Json<GateEvent>, ApiError> {
    Ok(Json(state.gate.withdraw(request.caller, request.amount).await?))
}

async fn custody(State(state): State<AppState>) -> Result<Json<CustodyResponse>, ApiError> {
    let balance = state.gate.custody().await?;
    Ok(Json(CustodyResponse { balance }))
}
