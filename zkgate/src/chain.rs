//! CAIP-2 chain identifiers.
//!
//! Every payment requirement, payment proof, and settlement names the network
//! it belongs to with a [`ChainId`], e.g. `eip155:5042002` for Arc testnet.

use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt;
use std::str::FromStr;

/// A CAIP-2 network identifier, `namespace:reference`.
///
/// EVM networks use the `eip155` namespace with the decimal chain id as the
/// reference. A human-readable namespace such as `arc-testnet:5042002` is
/// accepted too; [`ChainId::numeric_reference`] recovers the chain id from
/// either form. On the wire it is the plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct ChainId {
    namespace: String,
    reference: String,
}

impl ChainId {
    /// Builds an identifier from its two parts.
    pub fn new<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    /// `eip155:<chain_id>`.
    #[must_use]
    pub fn eip155(chain_id: u64) -> Self {
        Self::new("eip155", chain_id.to_string())
    }

    /// Chain family, e.g. `eip155`.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Chain within the family.
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// The reference as a number, if it is one.
    ///
    /// This is the value bound into an EIP-712 domain.
    #[must_use]
    pub fn numeric_reference(&self) -> Option<u64> {
        self.reference.parse().ok()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

/// The string is not `namespace:reference` with both parts non-empty.
#[derive(Debug, thiserror::Error)]
#[error("malformed chain id `{0}`, expected `namespace:reference`")]
pub struct ChainIdFormatError(String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split_once(':')
            .filter(|(namespace, reference)| !namespace.is_empty() && !reference.is_empty())
            .map(|(namespace, reference)| Self::new(namespace, reference))
            .ok_or_else(|| ChainIdFormatError(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_roundtrip() {
        let chain: ChainId = "eip155:5042002".parse().unwrap();
        assert_eq!(chain.namespace(), "eip155");
        assert_eq!(chain.reference(), "5042002");
        assert_eq!(chain.numeric_reference(), Some(5_042_002));
        assert_eq!(chain.to_string(), "eip155:5042002");
        assert_eq!(chain, ChainId::eip155(5_042_002));
    }

    #[test]
    fn test_chain_id_serde() {
        let chain = ChainId::new("arc-testnet", "5042002");
        let json = serde_json::to_string(&chain).unwrap();
        assert_eq!(json, "\"arc-testnet:5042002\"");
        let back: ChainId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chain);
    }

    #[test]
    fn test_chain_id_rejects_malformed() {
        assert!("eip155".parse::<ChainId>().is_err());
        assert!(":1".parse::<ChainId>().is_err());
        assert!("eip155:".parse::<ChainId>().is_err());
    }
}
