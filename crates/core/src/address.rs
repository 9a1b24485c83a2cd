//! Account address type.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 20-byte account address, stored as `0x` followed by 40 lowercase hex digits.
///
/// Addresses are compared by value, so normalizing case on construction is what
/// makes checksummed and lowercase spellings of the same account equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Number of hex digits in an address body.
    pub const HEX_LEN: usize = 40;

    /// Parse and normalize an address. The `0x` prefix is optional on input.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let trimmed = input.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if body.len() != Self::HEX_LEN || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidAddress(input.to_string()));
        }

        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    /// Normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines and message titles (`0x1234abcd...`).
    pub fn short(&self) -> &str {
        &self.0[..10]
    }

    /// Case-insensitive comparison against a raw address string from an
    /// external payload.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKSUMMED: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";

    #[test]
    fn test_parse_normalizes_case() {
        let addr = Address::parse(CHECKSUMMED).unwrap();
        assert_eq!(addr.as_str(), "0xdac17f958d2ee523a2206206994597c13d831ec7");
    }

    #[test]
    fn test_parse_accepts_missing_prefix() {
        let with = Address::parse(CHECKSUMMED).unwrap();
        let without = Address::parse(&CHECKSUMMED[2..]).unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Address::parse("").is_err());
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzzC17F958D2ee523a2206206994597C13D831ec7").is_err());
        assert!(Address::parse("0xdAC17F958D2ee523a2206206994597C13D831ec7ff").is_err());
    }

    #[test]
    fn test_matches_ignores_case() {
        let addr = Address::parse(CHECKSUMMED).unwrap();
        assert!(addr.matches(CHECKSUMMED));
        assert!(!addr.matches("0x0000000000000000000000000000000000000000"));
    }

    #[test]
    fn test_short() {
        let addr = Address::parse(CHECKSUMMED).unwrap();
        assert_eq!(addr.short(), "0xdac17f95");
    }

    #[test]
    fn test_serde_validates() {
        let json = format!("\"{}\"", CHECKSUMMED);
        let addr: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr.as_str(), "0xdac17f958d2ee523a2206206994597c13d831ec7");
        assert!(serde_json::from_str::<Address>("\"0x12\"").is_err());
    }
}
