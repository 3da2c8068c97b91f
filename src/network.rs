//! Payment network registry.
//!
//! Static table of the settlement networks the gateway accepts payment on,
//! keyed by [CAIP-2] chain identifiers. Each network carries its stablecoin
//! deployment (contract address and decimals) and the recipient address the
//! gateway advertises in 402 responses.
//!
//! [CAIP-2]: https://github.com/ChainAgnostic/CAIPs/blob/main/CAIPs/caip-2.md
//!
//! # Format
//!
//! A CAIP-2 chain identifier has the format `namespace:reference`:
//! - `eip155:6342` — MegaETH testnet (fast rail, direct receipt verification)
//! - `eip155:8453` — Base mainnet (permit rail)
//! - `solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp` — Solana mainnet (permit rail)

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A CAIP-2 compliant chain identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainId {
    /// The namespace identifying the blockchain ecosystem (e.g. "eip155").
    pub namespace: String,
    /// The reference identifying the specific chain within the namespace.
    pub reference: String,
}

/// Error type for [`ChainId`] parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainIdParseError {
    #[error("empty chain ID")]
    Empty,
    #[error("missing separator ':' in chain ID")]
    MissingSeparator,
    #[error("empty namespace in chain ID")]
    EmptyNamespace,
    #[error("empty reference in chain ID")]
    EmptyReference,
}

impl ChainId {
    /// Creates a chain identifier in the `eip155` namespace.
    pub fn eip155(chain_id: u64) -> Self {
        Self {
            namespace: "eip155".to_string(),
            reference: chain_id.to_string(),
        }
    }

    /// Creates a chain identifier in the `solana` namespace.
    ///
    /// The reference is the first 32 characters of the cluster's genesis hash,
    /// per the CAIP-2 Solana namespace convention.
    pub fn solana(genesis_prefix: &str) -> Self {
        Self {
            namespace: "solana".to_string(),
            reference: genesis_prefix.to_string(),
        }
    }

    /// Returns true if this chain lives in the `eip155` (EVM) namespace.
    pub fn is_evm(&self) -> bool {
        self.namespace == "eip155"
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

impl FromStr for ChainId {
    type Err = ChainIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ChainIdParseError::Empty);
        }
        let (namespace, reference) = s
            .split_once(':')
            .ok_or(ChainIdParseError::MissingSeparator)?;
        if namespace.is_empty() {
            return Err(ChainIdParseError::EmptyNamespace);
        }
        if reference.is_empty() {
            return Err(ChainIdParseError::EmptyReference);
        }
        Ok(Self {
            namespace: namespace.to_string(),
            reference: reference.to_string(),
        })
    }
}

impl Serialize for ChainId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The settlement networks the gateway accepts payment on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// MegaETH testnet. Fast rail: sub-second finality, payments are
    /// verified by reading transaction receipts directly from RPC.
    Megaeth,
    /// Base mainnet. Permit rail, settled through the external facilitator.
    Base,
    /// Solana mainnet. Permit rail, settled through the external facilitator.
    Solana,
}

impl Network {
    /// All supported networks, in the stable order used for 402 `accepts`
    /// arrays and discovery documents.
    pub fn variants() -> &'static [Network] {
        &[Network::Megaeth, Network::Base, Network::Solana]
    }

    /// The CAIP-2 identifier for this network.
    pub fn chain_id(&self) -> ChainId {
        match self {
            Network::Megaeth => ChainId::eip155(6342),
            Network::Base => ChainId::eip155(8453),
            Network::Solana => ChainId::solana("5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp"),
        }
    }

    /// Human-readable network name for dashboards and error bodies.
    pub fn display_name(&self) -> &'static str {
        match self {
            Network::Megaeth => "MegaETH Testnet",
            Network::Base => "Base",
            Network::Solana => "Solana",
        }
    }

    /// Whether payments on this network are verified directly from
    /// transaction receipts rather than through the external facilitator.
    pub fn is_fast_rail(&self) -> bool {
        matches!(self, Network::Megaeth)
    }

    /// Average block time in milliseconds.
    pub fn block_time_ms(&self) -> u64 {
        match self {
            Network::Megaeth => 10,
            Network::Base => 2000,
            Network::Solana => 400,
        }
    }

    /// Resolves a CAIP-2 identifier back to a supported network.
    pub fn from_chain_id(chain_id: &ChainId) -> Option<Network> {
        Network::variants()
            .iter()
            .copied()
            .find(|n| &n.chain_id() == chain_id)
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Network::Megaeth => write!(f, "megaeth"),
            Network::Base => write!(f, "base"),
            Network::Solana => write!(f, "solana"),
        }
    }
}

/// A stablecoin deployment on a specific network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stablecoin {
    /// Ticker symbol (e.g. "USDC", "USDm").
    pub symbol: String,
    /// Contract address in the network's native format (hex for EVM,
    /// base58 for Solana).
    pub address: String,
    /// Number of decimals in the token's base unit.
    pub decimals: u32,
}

/// A fully described payment network: identifiers, stablecoin deployment,
/// and the recipient address advertised to clients.
#[derive(Debug, Clone)]
pub struct Chain {
    pub network: Network,
    pub chain_id: ChainId,
    pub display_name: String,
    /// RPC endpoint; populated only for the fast rail, which the gateway
    /// queries directly.
    pub rpc_url: Option<String>,
    pub stablecoin: Stablecoin,
    /// Where clients must send payment on this network.
    pub pay_to: String,
    pub block_time_ms: u64,
}

/// Immutable table of supported chains, built once at startup.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: Vec<Chain>,
}

impl ChainRegistry {
    /// Assembles the registry from configured recipient addresses and the
    /// fast-rail RPC endpoint / stablecoin contract.
    pub fn new(
        evm_pay_to: String,
        solana_pay_to: String,
        megaeth_rpc_url: String,
        megaeth_usd_contract: String,
    ) -> Self {
        let chains = vec![
            Chain {
                network: Network::Megaeth,
                chain_id: Network::Megaeth.chain_id(),
                display_name: Network::Megaeth.display_name().to_string(),
                rpc_url: Some(megaeth_rpc_url),
                stablecoin: Stablecoin {
                    symbol: "USDm".to_string(),
                    address: megaeth_usd_contract,
                    decimals: 18,
                },
                pay_to: evm_pay_to.clone(),
                block_time_ms: Network::Megaeth.block_time_ms(),
            },
            Chain {
                network: Network::Base,
                chain_id: Network::Base.chain_id(),
                display_name: Network::Base.display_name().to_string(),
                rpc_url: None,
                stablecoin: Stablecoin {
                    symbol: "USDC".to_string(),
                    address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
                    decimals: 6,
                },
                pay_to: evm_pay_to,
                block_time_ms: Network::Base.block_time_ms(),
            },
            Chain {
                network: Network::Solana,
                chain_id: Network::Solana.chain_id(),
                display_name: Network::Solana.display_name().to_string(),
                rpc_url: None,
                stablecoin: Stablecoin {
                    symbol: "USDC".to_string(),
                    address: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
                    decimals: 6,
                },
                pay_to: solana_pay_to,
                block_time_ms: Network::Solana.block_time_ms(),
            },
        ];
        Self { chains }
    }

    /// Looks up a chain by its CAIP-2 identifier.
    pub fn lookup(&self, chain_id: &ChainId) -> Option<&Chain> {
        self.chains.iter().find(|c| &c.chain_id == chain_id)
    }

    /// Looks up a chain by network.
    pub fn by_network(&self, network: Network) -> Option<&Chain> {
        self.chains.iter().find(|c| c.network == network)
    }

    /// All chains in stable order.
    pub fn all(&self) -> &[Chain] {
        &self.chains
    }

    /// The fast-rail chain. The registry always contains it.
    pub fn fast_rail(&self) -> &Chain {
        self.by_network(Network::Megaeth)
            .expect("registry is constructed with the fast rail present")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ChainRegistry {
        ChainRegistry::new(
            "0x1111111111111111111111111111111111111111".to_string(),
            "7hQxnCfyqyPNjdhL5DCAyBJDHjVUsYBkqLcVRRHCmVuq".to_string(),
            "https://carrot.megaeth.com/rpc".to_string(),
            "0x2222222222222222222222222222222222222222".to_string(),
        )
    }

    #[test]
    fn test_chain_id_roundtrip() {
        let base = ChainId::eip155(8453);
        assert_eq!(base.to_string(), "eip155:8453");
        let parsed: ChainId = "eip155:8453".parse().unwrap();
        assert_eq!(parsed, base);
    }

    #[test]
    fn test_chain_id_parse_errors() {
        assert_eq!("".parse::<ChainId>(), Err(ChainIdParseError::Empty));
        assert_eq!(
            "eip155".parse::<ChainId>(),
            Err(ChainIdParseError::MissingSeparator)
        );
        assert_eq!(
            ":8453".parse::<ChainId>(),
            Err(ChainIdParseError::EmptyNamespace)
        );
        assert_eq!(
            "eip155:".parse::<ChainId>(),
            Err(ChainIdParseError::EmptyReference)
        );
    }

    #[test]
    fn test_chain_id_serde() {
        let id = ChainId::eip155(6342);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"eip155:6342\"");
        let back: ChainId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_decimals_invariant() {
        for chain in registry().all() {
            assert!(matches!(chain.stablecoin.decimals, 6 | 18));
        }
    }

    #[test]
    fn test_caip2_uniquely_identifies_chain() {
        let reg = registry();
        let fast = reg.lookup(&ChainId::eip155(6342)).unwrap();
        assert_eq!(fast.network, Network::Megaeth);
        assert!(fast.network.is_fast_rail());
        assert!(reg.lookup(&ChainId::eip155(1)).is_none());
    }

    #[test]
    fn test_network_from_chain_id() {
        let solana: ChainId = "solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp".parse().unwrap();
        assert_eq!(Network::from_chain_id(&solana), Some(Network::Solana));
        assert!(!solana.is_evm());
    }

    #[test]
    fn test_stable_ordering() {
        let reg = registry();
        let networks: Vec<Network> = reg.all().iter().map(|c| c.network).collect();
        assert_eq!(
            networks,
            vec![Network::Megaeth, Network::Base, Network::Solana]
        );
    }
}
