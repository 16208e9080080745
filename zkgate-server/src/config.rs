//! Server configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 4021
//!
//! [payment]
//! network = "eip155:5042002"
//! price = "0.003"
//! pay_to = "0x1111111111111111111111111111111111111111"
//! description = "Signed authorization commitment"
//! registry_path = "consumed-proofs.jsonl"
//!
//! [payment.verifier]
//! kind = "ledger"
//! rpc_url = "$ARC_RPC_URL"
//!
//! [signer]
//! private_key = "$SIGNER_PRIVATE_KEY"
//! shape = "simple"
//!
//! [gate]
//! chain_id = 5042002
//! verifying_contract = "0x2222222222222222222222222222222222222222"
//!
//! [oracle]
//! command = ["./llm_prover", "--output", "llm_proof.json"]
//! proof_file = "llm_proof.json"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to configuration file (default: `config.toml`)
//! - `HOST` - Override server bind address
//! - `PORT` - Override server port
//! - Secrets referenced by `$VAR` in the config file

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use alloy_primitives::Address;
use regex::{Captures, Regex};
use serde::Deserialize;
use url::Url;
use zkgate::chain::ChainId;
use zkgate::commitment::{CommitmentShape, TransferBinding};
use zkgate::payment::AmountPolicy;
use zkgate_evm::codec::{DEFAULT_DOMAIN_NAME, DEFAULT_DOMAIN_VERSION};

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("static regex is valid")
});

/// Errors raised while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration.
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `4021`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// What `POST /commitments` charges and how payments are verified.
    pub payment: PaymentConfig,

    /// Commitment signing key and shape.
    pub signer: SignerConfig,

    /// Authorization gate domain and backing ledger.
    pub gate: GateConfig,

    /// External prover. Without it, callers must supply oracle output themselves.
    #[serde(default)]
    pub oracle: Option<OracleConfig>,
}

/// Payment terms for the signing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Network payments settle on.
    pub network: ChainId,
    /// Human-readable price, e.g. `"0.003"`.
    pub price: String,
    /// Token to pay in. Defaults to the network's USDC deployment.
    #[serde(default)]
    pub asset: Option<Address>,
    /// Decimals of `asset`. Defaults to the known deployment's decimals.
    #[serde(default)]
    pub decimals: Option<u8>,
    /// Recipient of payments.
    pub pay_to: Address,
    /// Shown to payers in the challenge.
    #[serde(default)]
    pub description: String,
    /// How the paid amount is compared with the price.
    #[serde(default)]
    pub amount_policy: AmountPolicy,
    /// How proofs are verified.
    pub verifier: VerifierConfig,
    /// Append-only file of consumed proofs. In memory when absent.
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
}

/// Verification strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerifierConfig {
    /// Query the ledger directly over JSON-RPC.
    Ledger {
        /// RPC endpoint of the payment network.
        rpc_url: Url,
    },
    /// Delegate to a remote verification service.
    Facilitator {
        /// Base URL of the service.
        url: String,
        /// Per-request timeout.
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

/// Signer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    /// Hex private key. An unresolved `$VAR` counts as missing.
    #[serde(default)]
    pub private_key: Option<String>,
    /// Commitment layout.
    #[serde(default)]
    pub shape: CommitmentShape,
    /// Extended-shape bindings applied when the request leaves them out.
    #[serde(default)]
    pub defaults: TransferBinding,
    /// If set, authorizations are only signed with this address's signature
    /// over the proof digest.
    #[serde(default)]
    pub attestor: Option<Address>,
}

impl SignerConfig {
    /// The private key, if one was configured and resolved.
    #[must_use]
    pub fn resolved_key(&self) -> Option<&str> {
        self.private_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty() && !k.starts_with('$'))
    }
}

/// Authorization gate configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// EIP-712 domain chain id.
    pub chain_id: u64,
    /// EIP-712 verifying contract.
    pub verifying_contract: Address,
    /// EIP-712 domain name.
    #[serde(default = "default_domain_name")]
    pub domain_name: String,
    /// EIP-712 domain version.
    #[serde(default = "default_domain_version")]
    pub domain_version: String,
    /// Maximum commitment age in seconds.
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
    /// Where gate state lives.
    #[serde(default)]
    pub ledger: GateLedgerConfig,
}

/// Backing ledger of the authorization gate.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateLedgerConfig {
    /// In-process ledger. State is lost on restart.
    Memory {
        /// Gate owner. Defaults to the signer address.
        #[serde(default)]
        owner: Option<Address>,
    },
    /// A deployed gate contract at `verifying_contract`, called with the signer key.
    Contract {
        /// RPC endpoint of the gate's chain.
        rpc_url: Url,
    },
}

impl Default for GateLedgerConfig {
    fn default() -> Self {
        Self::Memory { owner: None }
    }
}

/// External prover invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Program and arguments. The feature vector is written to stdin as JSON.
    pub command: Vec<String>,
    /// File the prover writes its proof to, read when stdout has none.
    #[serde(default)]
    pub proof_file: Option<PathBuf>,
    /// Maximum run time in seconds.
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    4021
}

fn default_domain_name() -> String {
    DEFAULT_DOMAIN_NAME.to_owned()
}

fn default_domain_version() -> String {
    DEFAULT_DOMAIN_VERSION.to_owned()
}

const fn default_freshness_secs() -> u64 {
    3600
}

const fn default_oracle_timeout_secs() -> u64 {
    120
}

impl ServerConfig {
    /// Loads configuration from `path`.
    ///
    /// All `$VAR` / `${VAR}` references are expanded from the process
    /// environment before parsing. `HOST` and `PORT` override the file values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(host) = std::env::var("HOST").ok().and_then(|h| h.parse().ok()) {
            config.host = host;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        Ok(config)
    }

    /// Parses configuration text after environment expansion.
    ///
    /// # Errors
    ///
    /// Returns the TOML error if the expanded text is not valid configuration.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(&expand_env_vars(content, |name| std::env::var(name).ok()))
    }
}

/// Expands `$VAR` and `${VAR}` references using `lookup`.
///
/// Unresolved references are left as-is.
fn expand_env_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    ENV_REFERENCE
        .replace_all(input, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            lookup(name).unwrap_or_else(|| caps[0].to_owned())
        })
        .into_owned()
}
