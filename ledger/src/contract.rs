//! The election contract capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use tally_types::{Address, CandidateName, TxHash, TxReceipt};

use crate::error::LedgerError;

/// Contract functions the coordinator depends on.
///
/// The names are the contract's own, so a gateway or an interface
/// description can be checked against [`LedgerMethod::ALL`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerMethod {
    Admin,
    Voters,
    HasVoted,
    GetCandidates,
    GetVotes,
    GetFinalResults,
    RegisterCandidate,
    RegisterVoter,
    Vote,
    ElectionActive,
    ElectionEnded,
    ElectionResultsIpfsHash,
    CloseElection,
    StoreElectionResultsIpfs,
}

impl LedgerMethod {
    pub const ALL: [LedgerMethod; 14] = [
        Self::Admin,
        Self::Voters,
        Self::HasVoted,
        Self::GetCandidates,
        Self::GetVotes,
        Self::GetFinalResults,
        Self::RegisterCandidate,
        Self::RegisterVoter,
        Self::Vote,
        Self::ElectionActive,
        Self::ElectionEnded,
        Self::ElectionResultsIpfsHash,
        Self::CloseElection,
        Self::StoreElectionResultsIpfs,
    ];

    /// The contract function name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Voters => "voters",
            Self::HasVoted => "hasVoted",
            Self::GetCandidates => "getCandidates",
            Self::GetVotes => "getVotes",
            Self::GetFinalResults => "getFinalResults",
            Self::RegisterCandidate => "registerCandidate",
            Self::RegisterVoter => "registerVoter",
            Self::Vote => "vote",
            Self::ElectionActive => "electionActive",
            Self::ElectionEnded => "electionEnded",
            Self::ElectionResultsIpfsHash => "electionResultsIPFSHash",
            Self::CloseElection => "closeElection",
            Self::StoreElectionResultsIpfs => "storeElectionResultsIPFS",
        }
    }

    /// Whether calling this method submits a transaction.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::RegisterCandidate
                | Self::RegisterVoter
                | Self::Vote
                | Self::CloseElection
                | Self::StoreElectionResultsIpfs
        )
    }
}

impl fmt::Display for LedgerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted transaction that has not yet been observed at finality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTx {
    pub hash: TxHash,
    pub method: LedgerMethod,
}

impl PendingTx {
    pub fn new(hash: TxHash, method: LedgerMethod) -> Self {
        Self { hash, method }
    }
}

/// Read and write access to the election contract.
///
/// Write methods take the sending account explicitly and return once the
/// transaction is submitted; callers must follow up with
/// [`wait_for_receipt`](ElectionLedger::wait_for_receipt) to observe
/// finality. No method imposes a timeout of its own.
#[async_trait]
pub trait ElectionLedger: Send + Sync {
    async fn admin(&self) -> Result<Address, LedgerError>;

    async fn voters(&self, account: &Address) -> Result<bool, LedgerError>;

    async fn has_voted(&self, account: &Address) -> Result<bool, LedgerError>;

    async fn get_candidates(&self) -> Result<Vec<CandidateName>, LedgerError>;

    /// Live vote count. Advisory while the election is active.
    async fn get_votes(&self, name: &CandidateName) -> Result<u64, LedgerError>;

    /// Frozen vote count. Only meaningful once the election has ended.
    async fn get_final_results(&self, name: &CandidateName) -> Result<u64, LedgerError>;

    async fn election_active(&self) -> Result<bool, LedgerError>;

    async fn election_ended(&self) -> Result<bool, LedgerError>;

    /// The committed results hash, or an empty string if none is set.
    async fn election_results_ipfs_hash(&self) -> Result<String, LedgerError>;

    async fn register_candidate(
        &self,
        from: &Address,
        name: &CandidateName,
    ) -> Result<PendingTx, LedgerError>;

    async fn register_voter(
        &self,
        from: &Address,
        voter: &Address,
    ) -> Result<PendingTx, LedgerError>;

    async fn vote(&self, from: &Address, name: &CandidateName) -> Result<PendingTx, LedgerError>;

    async fn close_election(&self, from: &Address) -> Result<PendingTx, LedgerError>;

    async fn store_election_results_ipfs(
        &self,
        from: &Address,
        hash: &str,
    ) -> Result<PendingTx, LedgerError>;

    /// Wait until `tx` is final and return its receipt.
    async fn wait_for_receipt(&self, tx: &PendingTx) -> Result<TxReceipt, LedgerError>;
}
