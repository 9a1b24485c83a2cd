//! Blockchain network identifiers and explorer metadata.

use serde::{Deserialize, Serialize};

/// EVM network the monitor is scoped to.
///
/// Discriminants are the EIP-155 chain ids, which is also what the
/// multichain explorer API expects in its `chainid` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u64)]
pub enum Chain {
    #[default]
    Ethereum = 1,
    Optimism = 10,
    Bsc = 56,
    Polygon = 137,
    Base = 8453,
    Arbitrum = 42161,
    Sepolia = 11155111,
}

impl Chain {
    /// Create Chain from its EIP-155 id.
    pub fn from_id(id: u64) -> Option<Self> {
        match id {
            1 => Some(Chain::Ethereum),
            10 => Some(Chain::Optimism),
            56 => Some(Chain::Bsc),
            137 => Some(Chain::Polygon),
            8453 => Some(Chain::Base),
            42161 => Some(Chain::Arbitrum),
            11155111 => Some(Chain::Sepolia),
            _ => None,
        }
    }

    /// Get EIP-155 id of this chain.
    #[inline]
    pub fn id(self) -> u64 {
        self as u64
    }

    /// Get string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Ethereum => "Ethereum",
            Chain::Optimism => "Optimism",
            Chain::Bsc => "BSC",
            Chain::Polygon => "Polygon",
            Chain::Base => "Base",
            Chain::Arbitrum => "Arbitrum",
            Chain::Sepolia => "Sepolia",
        }
    }

    /// Ticker of the native coin, used when rendering transfer values.
    pub fn native_symbol(self) -> &'static str {
        match self {
            Chain::Bsc => "BNB",
            Chain::Polygon => "POL",
            _ => "ETH",
        }
    }

    /// Base URL of the public block explorer for this chain.
    pub fn explorer_url(self) -> &'static str {
        match self {
            Chain::Ethereum => "https://etherscan.io",
            Chain::Optimism => "https://optimistic.etherscan.io",
            Chain::Bsc => "https://bscscan.com",
            Chain::Polygon => "https://polygonscan.com",
            Chain::Base => "https://basescan.org",
            Chain::Arbitrum => "https://arbiscan.io",
            Chain::Sepolia => "https://sepolia.etherscan.io",
        }
    }

    /// Explorer link for a transaction hash.
    pub fn tx_url(self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_url(), tx_hash)
    }

    /// Get all chain variants.
    pub fn all() -> &'static [Chain] {
        &[
            Chain::Ethereum,
            Chain::Optimism,
            Chain::Bsc,
            Chain::Polygon,
            Chain::Base,
            Chain::Arbitrum,
            Chain::Sepolia,
        ]
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_from_id() {
        assert_eq!(Chain::from_id(1), Some(Chain::Ethereum));
        assert_eq!(Chain::from_id(42161), Some(Chain::Arbitrum));
        assert_eq!(Chain::from_id(11155111), Some(Chain::Sepolia));
        assert_eq!(Chain::from_id(2), None);
    }

    #[test]
    fn test_chain_id_round_trip_for_all_variants() {
        for chain in Chain::all() {
            assert_eq!(Chain::from_id(chain.id()), Some(*chain));
        }
    }

    #[test]
    fn test_tx_url() {
        assert_eq!(
            Chain::Ethereum.tx_url("0xabc"),
            "https://etherscan.io/tx/0xabc"
        );
        assert_eq!(Chain::Base.tx_url("0x01"), "https://basescan.org/tx/0x01");
    }

    #[test]
    fn test_native_symbol() {
        assert_eq!(Chain::Ethereum.native_symbol(), "ETH");
        assert_eq!(Chain::Arbitrum.native_symbol(), "ETH");
        assert_eq!(Chain::Bsc.native_symbol(), "BNB");
    }
}
