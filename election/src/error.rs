use serde::{Deserialize, Serialize};
use thiserror::Error;

use tally_ledger::LedgerError;
use tally_publish::PublishError;
use tally_session::SessionError;
use tally_types::{TxHash, TypesError};

/// Machine-checkable category of an [`ElectionError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No wallet provider, or the user declined account access.
    Connection,
    /// The wallet is on another network than the contract.
    NetworkMismatch,
    /// A role lookup failed.
    Resolution,
    /// Rejected locally before anything was submitted.
    Validation,
    /// Submission rejected, reverted, or failed at finality.
    Transaction,
    /// Upload or retrieval at the publication service failed.
    Publication,
    /// The results hash was already committed. Benign.
    CommitConflict,
    /// A close is already in flight.
    Busy,
    /// The action is not allowed in the current election phase.
    Phase,
    /// A close or tally step of the results pipeline failed.
    Pipeline,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElectionError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Failed to load account roles: {0}")]
    Resolution(LedgerError),

    #[error("Please enter a candidate name")]
    InvalidCandidateName,

    #[error("{0}")]
    InvalidAddressFormat(TypesError),

    #[error("Only the election admin can do this")]
    NotAdmin,

    #[error("You are not registered to vote")]
    NotRegistered,

    #[error("You have already voted")]
    AlreadyVoted,

    #[error("Transaction failed: {tx_hash}")]
    TransactionFailed { tx_hash: TxHash },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Failed to close election: {0}")]
    CloseFailed(Box<ElectionError>),

    #[error("Failed to read final results: {0}")]
    TallyRead(LedgerError),

    #[error(transparent)]
    Publication(#[from] PublishError),

    #[error("invalid results document: {0}")]
    Document(TypesError),

    #[error("Results already stored on-chain as {0}")]
    CommitConflict(String),

    #[error("An election close is already in progress")]
    Busy,

    #[error("Election has ended")]
    ElectionClosed,

    #[error("Results have not been published yet")]
    NotPublished,
}

impl ElectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Session(SessionError::WrongNetwork { .. }) => ErrorKind::NetworkMismatch,
            Self::Session(_) => ErrorKind::Connection,
            Self::Resolution(_) => ErrorKind::Resolution,
            Self::InvalidCandidateName
            | Self::InvalidAddressFormat(_)
            | Self::NotAdmin
            | Self::NotRegistered
            | Self::AlreadyVoted => ErrorKind::Validation,
            Self::TransactionFailed { .. } | Self::Ledger(_) => ErrorKind::Transaction,
            Self::CloseFailed(_) | Self::TallyRead(_) => ErrorKind::Pipeline,
            Self::Publication(_) | Self::Document(_) => ErrorKind::Publication,
            Self::CommitConflict(_) => ErrorKind::CommitConflict,
            Self::Busy => ErrorKind::Busy,
            Self::ElectionClosed | Self::NotPublished => ErrorKind::Phase,
        }
    }

    /// Whether the wallet holder declined a prompt, at connect or at signing.
    pub fn is_user_rejection(&self) -> bool {
        match self {
            Self::Session(SessionError::UserRejected) | Self::Ledger(LedgerError::UserRejected) => {
                true
            }
            Self::CloseFailed(inner) => inner.is_user_rejection(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(String),

    #[error("invalid config: {0}")]
    Parse(String),

    #[error("failed to serialize config: {0}")]
    Serialize(String),

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid contract interface: {0}")]
    Abi(String),

    #[error("contract interface is missing functions: {}", .0.join(", "))]
    AbiMissingFunctions(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_types::ChainId;

    #[test]
    fn wrong_network_is_its_own_kind() {
        let err = ElectionError::from(SessionError::WrongNetwork {
            expected: ChainId::SEPOLIA,
            actual: ChainId::MAINNET,
        });
        assert_eq!(err.kind(), ErrorKind::NetworkMismatch);
        assert_eq!(
            ElectionError::from(SessionError::NoProvider).kind(),
            ErrorKind::Connection
        );
    }

    #[test]
    fn transaction_failures_stay_distinguishable() {
        let rejected = ElectionError::from(LedgerError::UserRejected);
        let reverted = ElectionError::from(LedgerError::Reverted("Already voted".into()));
        let timed_out = ElectionError::from(LedgerError::FinalityTimeout(TxHash::new("0xab")));
        for err in [&rejected, &reverted, &timed_out] {
            assert_eq!(err.kind(), ErrorKind::Transaction);
        }
        assert!(rejected.is_user_rejection());
        assert!(!reverted.is_user_rejection());
        assert_eq!(rejected.to_string(), "Transaction rejected by user");
    }

    #[test]
    fn close_failure_keeps_cause() {
        let err = ElectionError::CloseFailed(Box::new(LedgerError::UserRejected.into()));
        assert_eq!(err.kind(), ErrorKind::Pipeline);
        assert!(err.is_user_rejection());
        assert_eq!(
            err.to_string(),
            "Failed to close election: Transaction rejected by user"
        );
    }
}
