//! Tower layer enforcing payment on protected routes.
//!
//! ```ignore
//! let gate = Arc::new(PaymentGate::new(terms, verifier, registry));
//! let app = Router::new().route(
//!     "/commitments",
//!     post(sign_commitment).layer(PaymentRequiredLayer::new(gate)),
//! );
//! ```
//!
//! Unpaid requests are answered `402 Payment Required` with the challenge in
//! the body and mirrored in the `PAYMENT-REQUIRED` header. A request carrying
//! a valid, unused proof in `X-PAYMENT` reaches the inner service, and the
//! response gains an `X-PAYMENT-RESPONSE` header with the settlement. A 4xx or
//! 5xx from the inner service releases the proof instead. If the verifier
//! cannot reach a decision the layer answers `503`.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::response::Response;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
use zkgate::payment::PaymentGate;

use super::paygate::Paygate;

/// Layer wrapping services in [`PaymentRequiredService`].
#[derive(Debug, Clone)]
pub struct PaymentRequiredLayer {
    gate: Arc<PaymentGate>,
}

impl PaymentRequiredLayer {
    /// Protects the wrapped service with `gate`.
    #[must_use]
    pub const fn new(gate: Arc<PaymentGate>) -> Self {
        Self { gate }
    }

    /// Returns the gate.
    #[must_use]
    pub fn gate(&self) -> &PaymentGate {
        &self.gate
    }
}

impl<S> Layer<S> for PaymentRequiredLayer
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = PaymentRequiredService;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentRequiredService {
            gate: Arc::clone(&self.gate),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// Service that enforces payment on incoming requests.
#[derive(Clone)]
#[allow(missing_debug_implementations)] // BoxCloneSyncService does not implement Debug
pub struct PaymentRequiredService {
    gate: Arc<PaymentGate>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl Service<Request> for PaymentRequiredService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let paygate = Paygate {
            gate: Arc::clone(&self.gate),
        };
        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { paygate.handle_request(inner, req).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{PAYMENT_REQUIRED_HEADER, X_PAYMENT_HEADER, X_PAYMENT_RESPONSE_HEADER};
    use crate::headers;
    use alloy_primitives::{Address, B256, U256};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use http::StatusCode;
    use tower::ServiceExt;
    use zkgate::chain::ChainId;
    use zkgate::payment::{
        PaymentTerms, PaymentVerifier, Verification, VerifierError, check_scheme_and_network,
    };
    use zkgate::proto::{
        ErrorReason, PaymentProof, PaymentRequired, PaymentRequirement, Settlement,
    };
    use zkgate::registry::MemoryProofRegistry;
    use zkgate::timestamp::UnixTimestamp;

    /// Accepts every well-formed proof except the zero hash, which simulates an outage.
    struct StubVerifier;

    #[async_trait]
    impl PaymentVerifier for StubVerifier {
        async fn verify(
            &self,
            proof: &PaymentProof,
            requirement: &PaymentRequirement,
        ) -> Result<Verification, VerifierError> {
            if let Err(rejection) = check_scheme_and_network(proof, requirement) {
                return Ok(Verification::Rejected(rejection));
            }
            if proof.payload.tx_hash == B256::ZERO {
                return Err(VerifierError::Upstream("ledger down".to_owned()));
            }
            Ok(Verification::Verified(Settlement {
                network: requirement.network.clone(),
                tx_hash: proof.payload.tx_hash,
                payer: proof.payload.payer,
                amount: requirement.amount,
                asset: requirement.asset,
                timestamp: UnixTimestamp::now(),
            }))
        }
    }

    fn network() -> ChainId {
        ChainId::eip155(5_042_002)
    }

    fn service() -> PaymentRequiredService {
        let handler = tower::service_fn(|_req: Request| async {
            Ok::<_, Infallible>(Response::new(Body::from("signed")))
        });
        service_with(handler)
    }

    fn service_with<S>(handler: S) -> PaymentRequiredService
    where
        S: Service<Request, Response = Response, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let gate = PaymentGate::new(
            PaymentTerms {
                network: network(),
                amount: U256::from(3000),
                recipient: Address::repeat_byte(0xa1),
                asset: Address::repeat_byte(0x36),
                description: "Signed authorization commitment".to_owned(),
            },
            Arc::new(StubVerifier),
            Arc::new(MemoryProofRegistry::new()),
        );
        PaymentRequiredLayer::new(Arc::new(gate)).layer(handler)
    }

    fn request(proof: Option<&PaymentProof>) -> Request {
        let mut builder = http::Request::post("/commitments");
        if let Some(proof) = proof {
            builder = builder.header(X_PAYMENT_HEADER, headers::encode_payment_proof(proof).unwrap());
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unpaid_request_is_challenged() {
        let response = service().oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let mirrored = headers::decode_payment_required(
            response.headers()[PAYMENT_REQUIRED_HEADER].as_bytes(),
        )
        .unwrap();
        let body: PaymentRequired = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(body.accepts.len(), 1);
        assert_eq!(body.accepts[0].resource, "/commitments");
        assert_eq!(body.accepts[0].amount, mirrored.accepts[0].amount);
        assert_eq!(body.accepts[0].request_id(), mirrored.accepts[0].request_id());
        assert!(body.error.is_none());
    }

    #[tokio::test]
    async fn test_paid_request_reaches_handler_once() {
        let svc = service();
        let proof = PaymentProof::exact(network(), B256::repeat_byte(1), Address::repeat_byte(2));

        let response = svc.clone().oneshot(request(Some(&proof))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let settlement = headers::decode_payment_response(
            response.headers()[X_PAYMENT_RESPONSE_HEADER].as_bytes(),
        )
        .unwrap()
        .settlement;
        assert_eq!(settlement.tx_hash, B256::repeat_byte(1));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"signed");

        let replay = svc.oneshot(request(Some(&proof))).await.unwrap();
        assert_eq!(replay.status(), StatusCode::PAYMENT_REQUIRED);
        let body = body_json(replay).await;
        assert_eq!(body["reason"], "proof_already_consumed");
    }

    #[tokio::test]
    async fn test_failed_handler_releases_proof() {
        // Rejects bodies other than "ok", like a handler validating its input.
        let handler = tower::service_fn(|req: Request| async move {
            let body = to_bytes(req.into_body(), usize::MAX).await.unwrap();
            let status = if &body[..] == b"ok" {
                StatusCode::OK
            } else {
                StatusCode::BAD_REQUEST
            };
            let mut response = Response::new(Body::empty());
            *response.status_mut() = status;
            Ok::<_, Infallible>(response)
        });
        let svc = service_with(handler);
        let proof = PaymentProof::exact(network(), B256::repeat_byte(7), Address::repeat_byte(2));
        let paid = |body: &'static str| {
            http::Request::post("/commitments")
                .header(X_PAYMENT_HEADER, headers::encode_payment_proof(&proof).unwrap())
                .body(Body::from(body))
                .unwrap()
        };

        let rejected = svc.clone().oneshot(paid("bad")).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
        assert!(!rejected.headers().contains_key(X_PAYMENT_RESPONSE_HEADER));

        let retried = svc.clone().oneshot(paid("ok")).await.unwrap();
        assert_eq!(retried.status(), StatusCode::OK);
        assert!(retried.headers().contains_key(X_PAYMENT_RESPONSE_HEADER));

        let replay = svc.oneshot(paid("ok")).await.unwrap();
        assert_eq!(replay.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn test_malformed_proof_is_rechallenged() {
        let req = http::Request::post("/commitments")
            .header(X_PAYMENT_HEADER, "%%%")
            .body(Body::empty())
            .unwrap();
        let response = service().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body: PaymentRequired = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(body.reason, Some(ErrorReason::InvalidFormat));
    }

    #[tokio::test]
    async fn test_wrong_network_is_rejected() {
        let proof = PaymentProof::exact(ChainId::eip155(1), B256::repeat_byte(1), Address::ZERO);
        let response = service().oneshot(request(Some(&proof))).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = body_json(response).await;
        assert_eq!(body["reason"], "network_mismatch");
    }

    #[tokio::test]
    async fn test_verifier_outage_is_unavailable() {
        let proof = PaymentProof::exact(network(), B256::ZERO, Address::ZERO);
        let response = service().oneshot(request(Some(&proof))).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["reason"], "unexpected_error");
    }
}
