//! Delegated payment verification over HTTP.
//!
//! [`FacilitatorVerifier`] is the remote counterpart of
//! [`LedgerVerifier`](zkgate::ledger::LedgerVerifier): instead of querying the
//! ledger itself it posts the proof and the requirement to a verification
//! service and trusts its answer. Both plug into the same
//! [`PaymentGate`](zkgate::payment::PaymentGate), so deployments pick one by
//! configuration.
//!
//! The service contract is a single endpoint, `POST <base>/verify`, taking a
//! [`VerifyRequest`] and answering `200 OK` with a [`VerifyResponse`]. Any
//! other status is a transport failure, never a rejection.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;
use url::Url;
use zkgate::payment::{
    PaymentRejection, PaymentVerifier, Verification, VerifierError, check_scheme_and_network,
};
use zkgate::proto::{PaymentProof, PaymentRequirement, Settlement};

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// Body of `POST /verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// The proof presented by the caller.
    pub proof: PaymentProof,
    /// The requirement it must satisfy.
    pub requirement: PaymentRequirement,
}

/// Answer of `POST /verify`.
///
/// ```json
/// { "status": "rejected", "rejection": { "reason": "tx_failed", "details": "0x..." } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyResponse {
    /// The payment satisfies the requirement.
    Verified {
        /// What the service observed on the ledger.
        settlement: Settlement,
    },
    /// The payment does not satisfy the requirement.
    Rejected {
        /// Why.
        rejection: PaymentRejection,
    },
}

impl From<VerifyResponse> for Verification {
    fn from(response: VerifyResponse) -> Self {
        match response {
            VerifyResponse::Verified { settlement } => Self::Verified(settlement),
            VerifyResponse::Rejected { rejection } => Self::Rejected(rejection),
        }
    }
}

impl From<Verification> for VerifyResponse {
    fn from(verification: Verification) -> Self {
        match verification {
            Verification::Verified(settlement) => Self::Verified { settlement },
            Verification::Rejected(rejection) => Self::Rejected { rejection },
        }
    }
}

/// Errors that can occur while talking to a verification service.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    /// The service URL is unusable.
    #[error("bad verification service url ({what}): {source}")]
    Url {
        /// Which URL was being built.
        what: &'static str,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// The request never completed or the body could not be read.
    #[error("verification service unreachable: {0}")]
    Transport(#[source] reqwest::Error),
    /// The service answered `200 OK` with a body that is not a [`VerifyResponse`].
    #[error("verification service sent an unreadable answer: {0}")]
    Decode(#[source] reqwest::Error),
    /// The service answered with a status other than `200 OK`.
    #[error("verification service answered {status}: {body}")]
    Status {
        /// Status code received.
        status: StatusCode,
        /// Response body, as text.
        body: String,
    },
}

/// A [`PaymentVerifier`] that delegates to a remote verification service.
#[derive(Debug, Clone)]
pub struct FacilitatorVerifier {
    client: Client,
    base_url: Url,
    verify_url: Url,
    timeout: Option<Duration>,
}

impl FacilitatorVerifier {
    /// Returns the base URL used by this client.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the computed `./verify` URL relative to [`FacilitatorVerifier::base_url`].
    #[must_use]
    pub const fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    /// Returns the configured timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Constructs a new [`FacilitatorVerifier`] from a base URL.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError`] if URL construction fails.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorError> {
        let verify_url = base_url
            .join("./verify")
            .map_err(|source| FacilitatorError::Url {
                what: "verify endpoint",
                source,
            })?;
        Ok(Self {
            client: Client::new(),
            base_url,
            verify_url,
            timeout: None,
        })
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sends a `POST /verify` request to the service.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorError`] if the HTTP request fails or the service
    /// answers with anything but `200 OK`.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "zkgate.facilitator.verify", skip_all, err)
    )]
    pub async fn post_verify(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifyResponse, FacilitatorError> {
        let mut builder = self.client.post(self.verify_url.clone()).json(request);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let result = async {
            let response = builder.send().await.map_err(FacilitatorError::Transport)?;
            let status = response.status();
            if status != StatusCode::OK {
                let body = response.text().await.map_err(FacilitatorError::Transport)?;
                return Err(FacilitatorError::Status { status, body });
            }
            response
                .json::<VerifyResponse>()
                .await
                .map_err(FacilitatorError::Decode)
        }
        .await;

        log_failure(&result);
        result
    }
}

#[async_trait]
impl PaymentVerifier for FacilitatorVerifier {
    async fn verify(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentRequirement,
    ) -> Result<Verification, VerifierError> {
        if let Err(rejection) = check_scheme_and_network(proof, requirement) {
            return Ok(Verification::Rejected(rejection));
        }
        let request = VerifyRequest {
            proof: proof.clone(),
            requirement: requirement.clone(),
        };
        self.post_verify(&request)
            .await
            .map(Verification::from)
            .map_err(|e| VerifierError::Upstream(e.to_string()))
    }
}

/// Converts a string URL into a `FacilitatorVerifier`, normalizing the trailing slash.
impl TryFrom<&str> for FacilitatorVerifier {
    type Error = FacilitatorError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|source| FacilitatorError::Url {
            what: "base",
            source,
        })?;
        Self::try_new(url)
    }
}

#[cfg(feature = "telemetry")]
fn log_failure<R, E: Display>(result: &Result<R, E>) {
    if let Err(err) = result {
        tracing::error!(error = %err, "request to verification service failed");
    }
}

#[cfg(not(feature = "telemetry"))]
fn log_failure<R, E: Display>(_result: &Result<R, E>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, U256};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zkgate::chain::ChainId;
    use zkgate::proto::{EXACT_SCHEME, RequirementMetadata};
    use zkgate::timestamp::UnixTimestamp;

    fn requirement() -> PaymentRequirement {
        PaymentRequirement {
            scheme: EXACT_SCHEME.to_owned(),
            network: ChainId::eip155(5_042_002),
            amount: U256::from(3000),
            resource: "/commitments".to_owned(),
            recipient: Address::repeat_byte(0xa1),
            asset: Address::repeat_byte(0x36),
            description: String::new(),
            metadata: RequirementMetadata {
                request_id: "req-1".to_owned(),
                timestamp: UnixTimestamp::from_secs(1_760_000_000),
            },
        }
    }

    fn proof() -> PaymentProof {
        PaymentProof::exact(
            ChainId::eip155(5_042_002),
            B256::repeat_byte(0x11),
            Address::repeat_byte(0xb2),
        )
    }

    fn verifier(server: &MockServer) -> FacilitatorVerifier {
        FacilitatorVerifier::try_from(server.uri().as_str()).unwrap()
    }

    #[test]
    fn test_verify_url_is_relative_to_base() {
        let verifier = FacilitatorVerifier::try_from("https://facilitator.example/v1").unwrap();
        assert_eq!(
            verifier.verify_url().as_str(),
            "https://facilitator.example/v1/verify"
        );
    }

    #[tokio::test]
    async fn test_verified_response_yields_settlement() {
        let server = MockServer::start().await;
        let settlement = Settlement {
            network: ChainId::eip155(5_042_002),
            tx_hash: B256::repeat_byte(0x11),
            payer: Address::repeat_byte(0xb2),
            amount: U256::from(3000),
            asset: Address::repeat_byte(0x36),
            timestamp: UnixTimestamp::from_secs(1_760_000_100),
        };
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_partial_json(serde_json::json!({
                "requirement": { "resource": "/commitments" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(VerifyResponse::Verified {
                settlement: settlement.clone(),
            }))
            .expect(1)
            .mount(&server)
            .await;

        let result = verifier(&server)
            .verify(&proof(), &requirement())
            .await
            .unwrap();
        assert_eq!(result, Verification::Verified(settlement));
    }

    #[tokio::test]
    async fn test_remote_rejection_keeps_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "rejected",
                "rejection": { "reason": "tx_failed", "details": B256::repeat_byte(0x11) }
            })))
            .mount(&server)
            .await;

        let result = verifier(&server)
            .verify(&proof(), &requirement())
            .await
            .unwrap();
        assert_eq!(
            result,
            Verification::Rejected(PaymentRejection::TxFailed(B256::repeat_byte(0x11)))
        );
    }

    #[tokio::test]
    async fn test_service_error_is_not_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = verifier(&server)
            .verify(&proof(), &requirement())
            .await
            .unwrap_err();
        assert!(matches!(err, VerifierError::Upstream(msg) if msg.contains("502")));
    }

    #[tokio::test]
    async fn test_network_mismatch_short_circuits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let mut wrong = proof();
        wrong.network = ChainId::eip155(1);
        let result = verifier(&server)
            .verify(&wrong, &requirement())
            .await
            .unwrap();
        assert!(matches!(
            result,
            Verification::Rejected(PaymentRejection::NetworkMismatch { .. })
        ));
    }
}
