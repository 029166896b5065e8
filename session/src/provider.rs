//! The wallet provider capability.

use async_trait::async_trait;

use tally_types::{Address, ChainId};

use crate::error::SessionError;
use crate::listeners::Subscription;

/// Which provider event a subscription listens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    AccountsChanged,
    ChainChanged,
}

/// An event emitted by the wallet provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletEvent {
    /// The exposed accounts changed. Empty means the wallet locked or revoked access.
    AccountsChanged(Vec<Address>),
    /// The wallet moved to another network.
    ChainChanged(ChainId),
}

impl WalletEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AccountsChanged(_) => EventKind::AccountsChanged,
            Self::ChainChanged(_) => EventKind::ChainChanged,
        }
    }
}

/// Access to the user's wallet.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the user for account access. The first account is the active one.
    async fn request_accounts(&self) -> Result<Vec<Address>, SessionError>;

    async fn chain_id(&self) -> Result<ChainId, SessionError>;

    /// Ask the wallet to move to `chain`.
    async fn switch_chain(&self, chain: ChainId) -> Result<(), SessionError>;

    /// Register a listener. Dropping the returned handle unsubscribes.
    fn subscribe(&self, kind: EventKind) -> Subscription;
}
