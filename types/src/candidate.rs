//! Candidate identity.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TypesError;

/// A candidate, identified by name.
///
/// The ledger exposes no numeric id, so the name is the identity: two
/// candidates sharing a name cannot be told apart when counting votes.
/// The name is stored exactly as submitted (no trimming or case folding).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateName(String);

impl CandidateName {
    /// Validate a name for submission. Empty and whitespace-only names are rejected.
    pub fn new(raw: impl Into<String>) -> Result<Self, TypesError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(TypesError::EmptyCandidateName);
        }
        Ok(Self(raw))
    }

    /// Wrap a name read back from the ledger without validation.
    pub fn from_ledger(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CandidateName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
