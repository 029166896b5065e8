//! Account address type (`0x` + 40 hex digits).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::TypesError;

/// A ledger account address.
///
/// Addresses compare and hash case-insensitively, so a checksummed address
/// reported by the ledger equals the lowercase form reported by a wallet.
/// The original spelling is kept for display.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// The required prefix.
    pub const PREFIX: &'static str = "0x";

    /// Number of hex digits after the prefix.
    pub const HEX_LEN: usize = 40;

    /// Parse and validate an address string.
    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TypesError::EmptyAddress);
        }
        let digits = raw
            .strip_prefix(Self::PREFIX)
            .or_else(|| raw.strip_prefix("0X"))
            .ok_or_else(|| TypesError::InvalidAddress(raw.to_string()))?;
        if digits.len() != Self::HEX_LEN || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypesError::InvalidAddress(raw.to_string()));
        }
        Ok(Self(format!("{}{}", Self::PREFIX, digits)))
    }

    /// Return the address as originally spelled.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form, used for comparison and hashing.
    pub fn to_lowercase(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_lowercase().hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = TypesError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &str = "0xAbCdEf0123456789abcdef0123456789ABCDEF01";

    #[test]
    fn parse_accepts_mixed_case() {
        let addr = Address::parse(MIXED).unwrap();
        assert_eq!(addr.as_str(), MIXED);
    }

    #[test]
    fn equality_ignores_case() {
        let a = Address::parse(MIXED).unwrap();
        let b = Address::parse(&MIXED.to_lowercase()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_missing_prefix() {
        let raw = &MIXED[2..];
        assert!(matches!(
            Address::parse(raw),
            Err(TypesError::InvalidAddress(_))
        ));
    }

    #[test]
    fn rejects_wrong_length_and_non_hex() {
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xZZcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(Address::parse("   "), Err(TypesError::EmptyAddress)));
    }

    #[test]
    fn serde_validates() {
        let ok: Address = serde_json::from_str(&format!("\"{MIXED}\"")).unwrap();
        assert_eq!(ok.as_str(), MIXED);
        assert!(serde_json::from_str::<Address>("\"0x12\"").is_err());
    }
}
