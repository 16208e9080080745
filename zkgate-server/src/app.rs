//! Service assembly from configuration.

use std::sync::Arc;
use std::time::Duration;

use alloy_network::EthereumWallet;
use alloy_provider::ProviderBuilder;
use axum::Router;
use zkgate::amount::MoneyAmount;
use zkgate::ledger::{CachedLedger, LedgerVerifier};
use zkgate::oracle::DecisionOracle;
use zkgate::payment::{PaymentGate, PaymentTerms, PaymentVerifier};
use zkgate::registry::{FileProofRegistry, MemoryProofRegistry, ProofRegistry};
use zkgate_evm::networks::network_for;
use zkgate_evm::{
    AuthorizationGate, CommitmentDomain, CommitmentSigner, EvmPaymentLedger, GateContract,
    GateLedger, InMemoryLedger,
};
use zkgate_http::FacilitatorVerifier;

use crate::config::{GateLedgerConfig, PaymentConfig, ServerConfig, VerifierConfig};
use crate::error::StartupError;
use crate::handlers::{AppState, app_router};
use crate::oracle::CommandOracle;

/// A fully wired service.
#[allow(missing_debug_implementations)] // AppState is not Debug
pub struct App {
    /// Handler state.
    pub state: AppState,
    /// Charges for `POST /commitments`.
    pub payment: Arc<PaymentGate>,
}

impl App {
    /// Wires signer, gate, oracle and payment gate from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] if the signing key is missing or invalid, the
    /// signer cannot produce its shape, or the payment terms or registry
    /// cannot be set up.
    pub async fn build(config: &ServerConfig) -> Result<Self, StartupError> {
        let domain = CommitmentDomain::new(config.gate.chain_id, config.gate.verifying_contract)
            .with_name_version(&config.gate.domain_name, &config.gate.domain_version);
        let signer = CommitmentSigner::from_private_key(
            config.signer.resolved_key(),
            domain.clone(),
            config.signer.shape,
        )?
        .with_defaults(config.signer.defaults.clone());
        let signer = match config.signer.attestor {
            Some(attestor) => signer.with_attestor(attestor),
            None => signer,
        };
        signer.preflight()?;
        tracing::info!(
            signer = %signer.address(),
            shape = %signer.shape(),
            attestor = ?signer.attestor(),
            chain_id = domain.chain_id,
            contract = %domain.verifying_contract,
            "commitment signer ready"
        );

        let gate: Arc<dyn GateLedger> = match &config.gate.ledger {
            GateLedgerConfig::Memory { owner } => {
                let owner = owner.unwrap_or_else(|| signer.address());
                tracing::info!(%owner, "using in-process gate ledger");
                let rules = AuthorizationGate::new(domain.clone(), config.signer.shape)
                    .with_freshness(Duration::from_secs(config.gate.freshness_secs));
                Arc::new(InMemoryLedger::new(rules, owner, signer.address()))
            }
            GateLedgerConfig::Contract { rpc_url } => {
                tracing::info!(contract = %domain.verifying_contract, "using deployed gate contract");
                let provider = ProviderBuilder::new()
                    .wallet(EthereumWallet::from(signer.inner().clone()))
                    .connect_http(rpc_url.clone());
                Arc::new(GateContract::new(provider, domain.clone(), config.signer.shape))
            }
        };

        let oracle = config
            .oracle
            .as_ref()
            .and_then(CommandOracle::from_config)
            .map(|oracle| Arc::new(oracle) as Arc<dyn DecisionOracle>);
        if oracle.is_none() {
            tracing::warn!("no oracle command configured; callers must supply oracle output");
        }

        let payment = Arc::new(payment_gate(&config.payment).await?);
        let state = AppState {
            signer: Arc::new(signer),
            oracle,
            gate,
        };
        Ok(Self { state, payment })
    }

    /// The service router.
    pub fn router(self) -> Router {
        app_router(self.state, self.payment)
    }
}

async fn payment_gate(config: &PaymentConfig) -> Result<PaymentGate, StartupError> {
    let known = network_for(&config.network).map(|n| n.usdc);
    let (asset, decimals) = match (config.asset, config.decimals, known) {
        (Some(asset), Some(decimals), _) => (asset, decimals),
        (Some(asset), None, Some(usdc)) if asset == usdc.address => (asset, usdc.decimals),
        (None, decimals, Some(usdc)) => (usdc.address, decimals.unwrap_or(usdc.decimals)),
        _ => return Err(StartupError::UnknownAsset(config.network.to_string())),
    };
    let amount = config.price.parse::<MoneyAmount>()?.to_atomic(decimals)?;
    let terms = PaymentTerms {
        network: config.network.clone(),
        amount,
        recipient: config.pay_to,
        asset,
        description: config.description.clone(),
    };
    tracing::info!(
        network = %terms.network,
        amount = %terms.amount,
        asset = %terms.asset,
        pay_to = %terms.recipient,
        "payment terms"
    );

    let verifier: Arc<dyn PaymentVerifier> = match &config.verifier {
        VerifierConfig::Ledger { rpc_url } => {
            let provider = ProviderBuilder::new().connect_http(rpc_url.clone());
            let ledger = CachedLedger::new(EvmPaymentLedger::new(provider));
            Arc::new(LedgerVerifier::new(ledger).with_policy(config.amount_policy))
        }
        VerifierConfig::Facilitator { url, timeout_secs } => {
            let facilitator = FacilitatorVerifier::try_from(url.as_str())?;
            tracing::info!(url = %facilitator.base_url(), "delegating payment verification");
            Arc::new(match timeout_secs {
                Some(secs) => facilitator.with_timeout(Duration::from_secs(*secs)),
                None => facilitator,
            })
        }
    };

    let registry: Arc<dyn ProofRegistry> = match &config.registry_path {
        Some(path) => Arc::new(FileProofRegistry::open(path).await?),
        None => {
            tracing::warn!("consumed proofs are kept in memory and forgotten on restart");
            Arc::new(MemoryProofRegistry::new())
        }
    };

    Ok(PaymentGate::new(terms, verifier, registry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use zkgate::error::SignerError;

    // Anvil's first well-known development key.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcb5c0ef5b4d0b3a2d";

    fn config(extra_signer: &str) -> ServerConfig {
        let text = format!(
            r#"
            [payment]
            network = "eip155:5042002"
            price = "0.003"
            pay_to = "0x1111111111111111111111111111111111111111"

            [payment.verifier]
            kind = "facilitator"
            url = "https://facilitator.example"

            [signer]
            {extra_signer}

            [gate]
            chain_id = 5042002
            verifying_contract = "0x2222222222222222222222222222222222222222"
            "#
        );
        ServerConfig::parse(&text).unwrap()
    }

    #[tokio::test]
    async fn test_builds_with_usdc_defaults() {
        let app = App::build(&config(&format!("private_key = \"{DEV_KEY}\"")))
            .await
            .unwrap();
        let terms = app.payment.terms();
        assert_eq!(terms.amount, U256::from(3000));
        assert_eq!(terms.asset, zkgate_evm::networks::USDC_ARC_TESTNET);
        assert_eq!(
            app.state.signer.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_configured_attestor_reaches_signer() {
        let signer = format!(
            "private_key = \"{DEV_KEY}\"\nattestor = \"0x3333333333333333333333333333333333333333\""
        );
        let app = App::build(&config(&signer)).await.unwrap();
        assert_eq!(app.state.signer.attestor(), Some(Address::repeat_byte(0x33)));
    }

    #[tokio::test]
    async fn test_missing_key_aborts_startup() {
        let Err(err) = App::build(&config("private_key = \"$ZKGATE_TEST_UNSET_KEY\"")).await else {
            panic!("expected startup failure");
        };
        assert!(matches!(err, StartupError::Signer(SignerError::MissingSigningKey)));
    }

    #[tokio::test]
    async fn test_extended_shape_without_bindings_aborts_startup() {
        let signer = format!("private_key = \"{DEV_KEY}\"\nshape = \"extended\"");
        let Err(err) = App::build(&config(&signer)).await else {
            panic!("expected startup failure");
        };
        assert!(matches!(err, StartupError::Schema(_)));
    }

    #[tokio::test]
    async fn test_unknown_network_needs_explicit_asset() {
        let mut config = config(&format!("private_key = \"{DEV_KEY}\""));
        config.payment.network = zkgate::chain::ChainId::eip155(999);
        let Err(err) = App::build(&config).await else {
            panic!("expected startup failure");
        };
        assert!(matches!(err, StartupError::UnknownAsset(_)));
    }
}
