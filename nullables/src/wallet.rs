//! Nullable wallet: scripted accounts and network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tally_session::{
    EventKind, ListenerRegistry, SessionError, Subscription, WalletEvent, WalletProvider,
};
use tally_types::{Address, ChainId};

struct WalletState {
    accounts: Vec<Address>,
    chain: ChainId,
    reject_requests: bool,
    allow_switch: bool,
}

/// A wallet whose accounts and network are driven by the test.
pub struct NullWallet {
    state: Mutex<WalletState>,
    registry: ListenerRegistry,
    account_requests: AtomicUsize,
}

impl NullWallet {
    /// A wallet exposing `accounts` on `chain`. Chain switches are allowed.
    pub fn new(accounts: Vec<Address>, chain: ChainId) -> Self {
        Self {
            state: Mutex::new(WalletState {
                accounts,
                chain,
                reject_requests: false,
                allow_switch: true,
            }),
            registry: ListenerRegistry::new(),
            account_requests: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the user decline account requests.
    pub fn reject_requests(&self, reject: bool) {
        self.state().reject_requests = reject;
    }

    /// Make the user decline network switch requests.
    pub fn allow_switch(&self, allow: bool) {
        self.state().allow_switch = allow;
    }

    /// Switch accounts in the wallet UI and notify listeners.
    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.state().accounts = accounts.clone();
        self.registry.emit(WalletEvent::AccountsChanged(accounts));
    }

    /// Move the wallet to `chain` without notifying anyone.
    pub fn set_chain_silently(&self, chain: ChainId) {
        self.state().chain = chain;
    }

    /// Move the wallet to `chain` and notify listeners.
    pub fn set_chain(&self, chain: ChainId) {
        self.set_chain_silently(chain);
        self.registry.emit(WalletEvent::ChainChanged(chain));
    }

    pub fn chain(&self) -> ChainId {
        self.state().chain
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry.listener_count(kind)
    }

    pub fn total_listeners(&self) -> usize {
        self.registry.total_listeners()
    }

    pub fn account_requests(&self) -> usize {
        self.account_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletProvider for NullWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, SessionError> {
        self.account_requests.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.reject_requests {
            return Err(SessionError::UserRejected);
        }
        Ok(state.accounts.clone())
    }

    async fn chain_id(&self) -> Result<ChainId, SessionError> {
        Ok(self.state().chain)
    }

    async fn switch_chain(&self, chain: ChainId) -> Result<(), SessionError> {
        let allowed = self.state().allow_switch;
        if !allowed {
            return Err(SessionError::UserRejected);
        }
        self.set_chain(chain);
        Ok(())
    }

    fn subscribe(&self, kind: EventKind) -> Subscription {
        self.registry.subscribe(kind)
    }
}
