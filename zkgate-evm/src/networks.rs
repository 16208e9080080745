//! Known EVM networks and their USDC deployments.

use alloy_primitives::{Address, address};
use zkgate::chain::ChainId;

/// Arc testnet chain id.
pub const ARC_TESTNET: u64 = 5_042_002;

/// Base Sepolia (testnet) chain id.
pub const BASE_SEPOLIA: u64 = 84_532;

/// Base Mainnet chain id.
pub const BASE_MAINNET: u64 = 8453;

/// USDC on Arc testnet.
pub const USDC_ARC_TESTNET: Address = address!("3600000000000000000000000000000000000000");

/// USDC on Base Sepolia.
pub const USDC_BASE_SEPOLIA: Address = address!("036CbD53842c5426634e7929541eC2318f3dCF7e");

/// USDC on Base Mainnet.
pub const USDC_BASE: Address = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");

/// Default token decimals for USDC.
pub const DEFAULT_TOKEN_DECIMALS: u8 = 6;

/// A token contract on a specific network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenDeployment {
    /// Contract address.
    pub address: Address,
    /// Decimal places of one whole token.
    pub decimals: u8,
}

/// A known network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Human-readable network name, also accepted as a chain-id namespace.
    pub name: &'static str,
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// The network's USDC deployment.
    pub usdc: TokenDeployment,
}

impl NetworkConfig {
    /// The CAIP-2 identifier, `eip155:<chain id>`.
    #[must_use]
    pub fn caip2(&self) -> ChainId {
        ChainId::eip155(self.chain_id)
    }
}

/// Returns all known networks.
#[must_use]
pub fn known_networks() -> Vec<NetworkConfig> {
    vec![
        usdc_network("arc-testnet", ARC_TESTNET, USDC_ARC_TESTNET),
        usdc_network("base-sepolia", BASE_SEPOLIA, USDC_BASE_SEPOLIA),
        usdc_network("base", BASE_MAINNET, USDC_BASE),
    ]
}

/// Finds the network for `chain`.
///
/// Both the CAIP-2 form (`eip155:5042002`) and the named form
/// (`arc-testnet:5042002`) resolve, provided the reference is the network's
/// numeric chain id.
#[must_use]
pub fn network_for(chain: &ChainId) -> Option<NetworkConfig> {
    let chain_id = chain.numeric_reference()?;
    known_networks()
        .into_iter()
        .find(|n| n.chain_id == chain_id && (chain.namespace() == "eip155" || chain.namespace() == n.name))
}

const fn usdc_network(name: &'static str, chain_id: u64, address: Address) -> NetworkConfig {
    NetworkConfig {
        name,
        chain_id,
        usdc: TokenDeployment {
            address,
            decimals: DEFAULT_TOKEN_DECIMALS,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_named_and_caip2_forms() {
        let named: ChainId = "arc-testnet:5042002".parse().unwrap();
        let caip2: ChainId = "eip155:5042002".parse().unwrap();
        let a = network_for(&named).unwrap();
        let b = network_for(&caip2).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.usdc.address, USDC_ARC_TESTNET);
        assert_eq!(a.caip2().to_string(), "eip155:5042002");
    }

    #[test]
    fn test_rejects_mismatched_name_or_unknown_chain() {
        assert!(network_for(&"base:5042002".parse().unwrap()).is_none());
        assert!(network_for(&"eip155:1".parse().unwrap()).is_none());
        assert!(network_for(&"solana:mainnet".parse().unwrap()).is_none());
    }
}
