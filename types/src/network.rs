//! Ledger network identifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TypesError;

/// Identifies which ledger network a wallet or contract binding targets.
///
/// Wallet providers report chain ids as `0x`-prefixed hex strings; config
/// files usually carry them as decimal numbers. Both parse to the same value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "ChainIdRepr", into = "u64")]
pub struct ChainId(u64);

impl ChainId {
    /// Ethereum mainnet.
    pub const MAINNET: Self = Self(1);
    /// Sepolia public test network.
    pub const SEPOLIA: Self = Self(11_155_111);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Parse from `0x`-prefixed hex or plain decimal.
    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        let raw = raw.trim();
        let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => raw.parse::<u64>(),
        };
        parsed
            .map(Self)
            .map_err(|_| TypesError::InvalidChainId(raw.to_string()))
    }

    /// The `0x`-prefixed lowercase hex form wallet providers speak.
    pub fn to_hex(&self) -> String {
        format!("{:#x}", self.0)
    }

    /// Human-readable name for well-known networks.
    pub fn name(&self) -> Option<&'static str> {
        match *self {
            Self::MAINNET => Some("mainnet"),
            Self::SEPOLIA => Some("sepolia"),
            _ => None,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", self.to_hex(), name),
            None => write!(f, "{}", self.to_hex()),
        }
    }
}

impl FromStr for ChainId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

/// Accepts either a number or a string in serialized form.
#[derive(Deserialize)]
#[serde(untagged)]
enum ChainIdRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<ChainIdRepr> for ChainId {
    type Error = TypesError;

    fn try_from(repr: ChainIdRepr) -> Result<Self, Self::Error> {
        match repr {
            ChainIdRepr::Number(n) => Ok(Self(n)),
            ChainIdRepr::Text(s) => Self::parse(&s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_hex() {
        assert_eq!(ChainId::parse("0xaa36a7").unwrap(), ChainId::SEPOLIA);
        assert_eq!(ChainId::parse("0xAA36A7").unwrap(), ChainId::SEPOLIA);
    }

    #[test]
    fn parses_decimal() {
        assert_eq!(ChainId::parse("11155111").unwrap(), ChainId::SEPOLIA);
    }

    #[test]
    fn hex_form() {
        assert_eq!(ChainId::SEPOLIA.to_hex(), "0xaa36a7");
        assert_eq!(ChainId::MAINNET.to_hex(), "0x1");
    }

    #[test]
    fn rejects_garbage() {
        assert!(ChainId::parse("sepolia").is_err());
        assert!(ChainId::parse("0x").is_err());
    }

    #[test]
    fn deserializes_number_or_string() {
        let a: ChainId = serde_json::from_str("11155111").unwrap();
        let b: ChainId = serde_json::from_str("\"0xaa36a7\"").unwrap();
        assert_eq!(a, b);
    }
}
