//! Per-request payment enforcement.
//!
//! [`Paygate`] reads the `X-PAYMENT` header, drives one
//! [`PaymentGate::evaluate`] step for the request path, and either forwards
//! the request to the protected service or answers `402 Payment Required`.

use axum::Json;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderValue, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use tower::Service;
use zkgate::payment::{Evaluation, PaymentGate};
use zkgate::proto::{ErrorReason, PaymentRequired, PaymentResponse, Problem, Settlement};

#[cfg(feature = "telemetry")]
use tracing::Instrument;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::error::PaygateError;
use crate::constants::{
    ACCESS_CONTROL_EXPOSE_HEADERS, PAYMENT_REQUIRED_HEADER, X_PAYMENT_HEADER,
    X_PAYMENT_RESPONSE_HEADER,
};
use crate::headers;

/// Payment enforcement for a single request.
#[derive(Debug, Clone)]
pub struct Paygate {
    /// The gate deciding whether the request is paid for.
    pub gate: Arc<PaymentGate>,
}

impl Paygate {
    /// Calls the inner service with proper telemetry instrumentation.
    async fn call_inner<S>(mut inner: S, req: Request) -> Response
    where
        S: Service<Request, Response = Response, Error = Infallible>,
        S::Future: Send,
    {
        #[cfg(feature = "telemetry")]
        let result = inner
            .call(req)
            .instrument(tracing::info_span!("inner"))
            .await;
        #[cfg(not(feature = "telemetry"))]
        let result = inner.call(req).await;
        match result {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    /// Handles an incoming request, converting every failure into a response.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "zkgate.http.handle_request", skip_all, fields(path = %req.uri().path()))
    )]
    pub async fn handle_request<S>(self, inner: S, req: Request) -> Result<Response, Infallible>
    where
        S: Service<Request, Response = Response, Error = Infallible>,
        S::Future: Send,
    {
        match self.handle_request_fallible(inner, req).await {
            Ok(response) => Ok(response),
            Err(err) => Ok(error_into_response(err)),
        }
    }

    /// Evaluates the request's payment and, if it verifies, forwards the request.
    ///
    /// The proof is consumed before the inner service runs. If the inner
    /// service answers with a client or server error the proof is released
    /// and no settlement header is attached, so the payer can retry.
    ///
    /// # Errors
    ///
    /// Returns [`PaygateError`] if the request must not reach the inner service.
    pub async fn handle_request_fallible<S>(
        &self,
        inner: S,
        req: Request,
    ) -> Result<Response, PaygateError>
    where
        S: Service<Request, Response = Response, Error = Infallible>,
        S::Future: Send,
    {
        let resource = req.uri().path().to_owned();
        let evaluation = match extract_payment_header(req.headers(), X_PAYMENT_HEADER) {
            None => self.gate.evaluate(&resource, None).await?,
            Some(header) => match headers::decode_payment_proof(header) {
                Ok(proof) => self.gate.evaluate(&resource, Some(&proof)).await?,
                Err(err) => self.gate.reject_malformed(&resource, err.to_string()),
            },
        };

        let settlement = match evaluation {
            Evaluation::Proceed(settlement) => settlement,
            Evaluation::Challenge(challenge) => {
                return Err(PaygateError::PaymentRequired(Box::new(challenge)));
            }
            Evaluation::Rejected {
                challenge,
                rejection,
            } => {
                return Err(PaygateError::Rejected {
                    challenge: Box::new(challenge),
                    rejection,
                });
            }
        };

        let header_value = match settlement_to_header(&settlement) {
            Ok(value) => value,
            Err(err) => {
                self.release(&settlement).await;
                return Err(err);
            }
        };
        let mut response = Self::call_inner(inner, req).await;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            self.release(&settlement).await;
            return Ok(response);
        }
        let header_map = response.headers_mut();
        header_map.insert(X_PAYMENT_RESPONSE_HEADER, header_value);
        header_map.insert(
            ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(X_PAYMENT_RESPONSE_HEADER),
        );
        Ok(response)
    }

    async fn release(&self, settlement: &Settlement) {
        if let Err(err) = self.gate.release(settlement).await {
            #[cfg(feature = "telemetry")]
            tracing::warn!(error = %err, tx_hash = %settlement.tx_hash, "failed to release payment");
            #[cfg(not(feature = "telemetry"))]
            let _ = err;
        }
    }
}

fn extract_payment_header<'a>(header_map: &'a HeaderMap, header_name: &str) -> Option<&'a [u8]> {
    header_map.get(header_name).map(HeaderValue::as_bytes)
}

fn settlement_to_header(settlement: &Settlement) -> Result<HeaderValue, PaygateError> {
    let encoded = headers::encode_payment_response(&PaymentResponse::from(settlement.clone()))
        .map_err(|_| PaygateError::Header(X_PAYMENT_RESPONSE_HEADER))?;
    HeaderValue::from_str(&encoded).map_err(|_| PaygateError::Header(X_PAYMENT_RESPONSE_HEADER))
}

/// Renders a 402 challenge: JSON body plus the base64 mirror header.
///
/// If the mirror cannot be encoded the body alone is still a complete challenge.
fn challenge_response(challenge: &PaymentRequired) -> Response {
    let mut header_map = HeaderMap::new();
    if let Some(value) = headers::encode_payment_required(challenge)
        .ok()
        .and_then(|encoded| HeaderValue::from_str(&encoded).ok())
    {
        header_map.insert(PAYMENT_REQUIRED_HEADER, value);
        header_map.insert(
            ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(PAYMENT_REQUIRED_HEADER),
        );
    }
    (StatusCode::PAYMENT_REQUIRED, header_map, Json(challenge)).into_response()
}

fn error_into_response(err: PaygateError) -> Response {
    match err {
        PaygateError::PaymentRequired(challenge) | PaygateError::Rejected { challenge, .. } => {
            challenge_response(&challenge)
        }
        PaygateError::Verifier(err) => {
            #[cfg(feature = "telemetry")]
            tracing::warn!(error = %err, "payment verification unavailable");
            let problem = Problem::new(ErrorReason::UnexpectedError, err.to_string());
            (StatusCode::SERVICE_UNAVAILABLE, Json(problem)).into_response()
        }
        header @ PaygateError::Header(_) => {
            let problem = Problem::new(ErrorReason::UnexpectedError, header.to_string());
            (StatusCode::INTERNAL_SERVER_ERROR, Json(problem)).into_response()
        }
    }
}
