//! Session, role and election phase state.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::network::ChainId;

/// Lifecycle phase of the election.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElectionPhase {
    /// Accepting candidates, voters and votes.
    #[default]
    Active,
    /// Close/publish pipeline in flight. Never observed outside the pipeline.
    Closing,
    /// Closed on the ledger. Irreversible.
    Closed,
}

impl ElectionPhase {
    /// Collapse the transient `Closing` phase for external observers.
    pub fn observable(&self) -> Self {
        match self {
            Self::Closing => Self::Active,
            other => *other,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Closing)
                | (Self::Closing, Self::Active)
                | (Self::Closing, Self::Closed)
                | (Self::Active, Self::Closed)
        )
    }
}

/// Roles and eligibility of the current account, derived from the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleState {
    pub is_admin: bool,
    pub is_registered_voter: bool,
    pub has_voted: bool,
}

impl RoleState {
    /// Whether the account may currently cast a vote.
    pub fn can_vote(&self) -> bool {
        self.is_registered_voter && !self.has_voted
    }
}

/// The wallet session.
///
/// Fields are private so `connected` can never be true without an account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    account: Option<Address>,
    chain_id: Option<ChainId>,
    connected: bool,
}

impl Session {
    /// A connected session for `account`.
    pub fn connected(account: Address, chain_id: Option<ChainId>) -> Self {
        Self {
            account: Some(account),
            chain_id,
            connected: true,
        }
    }

    /// A session with no account access.
    pub fn disconnected(chain_id: Option<ChainId>) -> Self {
        Self {
            account: None,
            chain_id,
            connected: false,
        }
    }

    pub fn account(&self) -> Option<&Address> {
        self.account.as_ref()
    }

    pub fn chain_id(&self) -> Option<ChainId> {
        self.chain_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Switch the active account. `None` disconnects.
    pub fn set_account(&mut self, account: Option<Address>) {
        self.connected = account.is_some();
        self.account = account;
    }

    pub fn set_chain_id(&mut self, chain_id: ChainId) {
        self.chain_id = Some(chain_id);
    }
}

/// On-ledger anchor of the published results. Written at most once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    content_hash: Option<String>,
}

impl PublicationRecord {
    /// Build from the raw ledger value; the ledger reports "not set" as an empty string.
    pub fn from_ledger(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            content_hash: (!raw.is_empty()).then_some(raw),
        }
    }

    pub fn published(hash: impl Into<String>) -> Self {
        Self::from_ledger(hash)
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    pub fn is_published(&self) -> bool {
        self.content_hash.is_some()
    }
}
