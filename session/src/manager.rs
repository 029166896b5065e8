//! Wallet session lifecycle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tally_types::{Address, ChainId, Session};

use crate::error::SessionError;
use crate::listeners::SubscriptionGuard;
use crate::provider::{EventKind, WalletEvent, WalletProvider};

/// A change to the session, forwarded to whoever drives the coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The active account changed. `None` means the wallet revoked access.
    AccountChanged(Option<Address>),
    /// The wallet moved to another network. Everything bound to the old
    /// network must be rebuilt.
    NetworkChanged(ChainId),
}

#[derive(Default)]
struct SessionSlot {
    session: Session,
    /// Bumped on every disconnect so a late event from an old pump is ignored.
    generation: u64,
}

/// The two standing subscriptions plus the task forwarding their events.
struct Listeners {
    _accounts: SubscriptionGuard,
    _chain: SubscriptionGuard,
    pump: JoinHandle<()>,
}

impl Drop for Listeners {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Owns the wallet session and its change listeners.
pub struct SessionManager {
    provider: Option<Arc<dyn WalletProvider>>,
    slot: Arc<Mutex<SessionSlot>>,
    listeners: Mutex<Option<Listeners>>,
}

impl SessionManager {
    /// Create a manager for the detected provider, if any.
    pub fn new(provider: Option<Arc<dyn WalletProvider>>) -> Self {
        Self {
            provider,
            slot: Arc::new(Mutex::new(SessionSlot::default())),
            listeners: Mutex::new(None),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    fn provider(&self) -> Result<&Arc<dyn WalletProvider>, SessionError> {
        self.provider.as_ref().ok_or(SessionError::NoProvider)
    }

    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        lock(&self.slot)
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.slot().session.clone()
    }

    pub fn account(&self) -> Option<Address> {
        self.slot().session.account().cloned()
    }

    /// Whether change listeners are currently registered.
    pub fn is_listening(&self) -> bool {
        lock(&self.listeners).is_some()
    }

    /// Request account access and start listening for account and network changes.
    ///
    /// Any listeners from a previous connection are released first. Returns
    /// the active account and the receiver of session events.
    pub async fn connect(
        &self,
    ) -> Result<(Address, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        let provider = self.provider()?.clone();
        self.disconnect();

        let accounts = provider.request_accounts().await?;
        let account = accounts
            .into_iter()
            .next()
            .ok_or(SessionError::NoAccounts)?;
        let chain_id = provider.chain_id().await?;

        let generation = {
            let mut slot = self.slot();
            slot.session = Session::connected(account.clone(), Some(chain_id));
            slot.generation
        };

        let (accounts_guard, accounts_rx) = provider
            .subscribe(EventKind::AccountsChanged)
            .into_parts();
        let (chain_guard, chain_rx) = provider.subscribe(EventKind::ChainChanged).into_parts();
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_events(
            accounts_rx,
            chain_rx,
            self.slot.clone(),
            generation,
            tx,
        ));

        *lock(&self.listeners) = Some(Listeners {
            _accounts: accounts_guard,
            _chain: chain_guard,
            pump,
        });

        tracing::info!(account = %account, chain = %chain_id, "wallet connected");
        Ok((account, rx))
    }

    /// Release both listeners and forget the account. Safe to call at any time.
    pub fn disconnect(&self) {
        let released = lock(&self.listeners).take();
        let mut slot = self.slot();
        slot.generation += 1;
        let chain_id = slot.session.chain_id();
        slot.session = Session::disconnected(chain_id);
        if released.is_some() {
            tracing::info!("wallet disconnected, listeners released");
        }
    }

    /// Make sure the wallet is on `expected`, asking it to switch if not.
    ///
    /// Fails with [`SessionError::WrongNetwork`] if the wallet stays on
    /// another network. Callers must not submit transactions after an error.
    pub async fn ensure_network(&self, expected: ChainId) -> Result<(), SessionError> {
        let provider = self.provider()?;
        let actual = provider.chain_id().await?;
        if actual == expected {
            self.slot().session.set_chain_id(actual);
            return Ok(());
        }

        tracing::warn!(%expected, %actual, "wallet on wrong network, requesting switch");
        if let Err(e) = provider.switch_chain(expected).await {
            tracing::warn!(error = %e, "network switch failed");
            self.slot().session.set_chain_id(actual);
            return Err(SessionError::WrongNetwork { expected, actual });
        }

        let now = provider.chain_id().await?;
        self.slot().session.set_chain_id(now);
        if now == expected {
            Ok(())
        } else {
            Err(SessionError::WrongNetwork {
                expected,
                actual: now,
            })
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Apply provider events to the session and forward them.
async fn pump_events(
    mut accounts: mpsc::UnboundedReceiver<WalletEvent>,
    mut chain: mpsc::UnboundedReceiver<WalletEvent>,
    slot: Arc<Mutex<SessionSlot>>,
    generation: u64,
    out: mpsc::UnboundedSender<SessionEvent>,
) {
    loop {
        let event = tokio::select! {
            Some(event) = accounts.recv() => event,
            Some(event) = chain.recv() => event,
            else => break,
        };

        let forwarded = {
            let mut slot = lock(&slot);
            if slot.generation != generation {
                break;
            }
            match event {
                WalletEvent::AccountsChanged(list) => {
                    let account = list.into_iter().next();
                    slot.session.set_account(account.clone());
                    SessionEvent::AccountChanged(account)
                }
                WalletEvent::ChainChanged(chain_id) => {
                    slot.session.set_chain_id(chain_id);
                    SessionEvent::NetworkChanged(chain_id)
                }
            }
        };

        tracing::debug!(event = ?forwarded, "session event");
        if out.send(forwarded).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::{ListenerRegistry, Subscription};
    use async_trait::async_trait;

    const ALICE: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
    const BOB: &str = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC";

    struct StubWallet {
        accounts: Vec<Address>,
        chain: ChainId,
        registry: ListenerRegistry,
    }

    impl StubWallet {
        fn new(accounts: &[&str]) -> Self {
            Self {
                accounts: accounts.iter().map(|a| Address::parse(a).unwrap()).collect(),
                chain: ChainId::SEPOLIA,
                registry: ListenerRegistry::new(),
            }
        }
    }

    #[async_trait]
    impl WalletProvider for StubWallet {
        async fn request_accounts(&self) -> Result<Vec<Address>, SessionError> {
            Ok(self.accounts.clone())
        }

        async fn chain_id(&self) -> Result<ChainId, SessionError> {
            Ok(self.chain)
        }

        async fn switch_chain(&self, _chain: ChainId) -> Result<(), SessionError> {
            Err(SessionError::UserRejected)
        }

        fn subscribe(&self, kind: EventKind) -> Subscription {
            self.registry.subscribe(kind)
        }
    }

    fn manager(wallet: &Arc<StubWallet>) -> SessionManager {
        SessionManager::new(Some(wallet.clone() as Arc<dyn WalletProvider>))
    }

    #[tokio::test]
    async fn connect_without_provider_fails() {
        let manager = SessionManager::new(None);
        assert_eq!(manager.connect().await.unwrap_err(), SessionError::NoProvider);
        manager.disconnect();
        assert!(!manager.session().is_connected());
    }

    #[tokio::test]
    async fn connect_with_no_accounts_registers_nothing() {
        let wallet = Arc::new(StubWallet::new(&[]));
        let manager = manager(&wallet);
        assert_eq!(manager.connect().await.unwrap_err(), SessionError::NoAccounts);
        assert_eq!(wallet.registry.total_listeners(), 0);
    }

    #[tokio::test]
    async fn reconnect_keeps_one_listener_per_kind() {
        let wallet = Arc::new(StubWallet::new(&[ALICE]));
        let manager = manager(&wallet);
        manager.connect().await.unwrap();
        manager.connect().await.unwrap();
        assert_eq!(wallet.registry.listener_count(EventKind::AccountsChanged), 1);
        assert_eq!(wallet.registry.listener_count(EventKind::ChainChanged), 1);

        manager.disconnect();
        manager.disconnect();
        assert_eq!(wallet.registry.total_listeners(), 0);
        assert!(!manager.is_listening());
    }

    #[tokio::test]
    async fn account_events_update_session() {
        let wallet = Arc::new(StubWallet::new(&[ALICE]));
        let manager = manager(&wallet);
        let (account, mut events) = manager.connect().await.unwrap();
        assert_eq!(account.as_str(), ALICE);

        let bob = Address::parse(BOB).unwrap();
        wallet
            .registry
            .emit(WalletEvent::AccountsChanged(vec![bob.clone()]));
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::AccountChanged(Some(bob.clone())))
        );
        assert_eq!(manager.account(), Some(bob));

        wallet.registry.emit(WalletEvent::AccountsChanged(vec![]));
        assert_eq!(events.recv().await, Some(SessionEvent::AccountChanged(None)));
        assert!(!manager.session().is_connected());
    }

    #[tokio::test]
    async fn chain_event_is_forwarded() {
        let wallet = Arc::new(StubWallet::new(&[ALICE]));
        let manager = manager(&wallet);
        let (_, mut events) = manager.connect().await.unwrap();
        wallet
            .registry
            .emit(WalletEvent::ChainChanged(ChainId::MAINNET));
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::NetworkChanged(ChainId::MAINNET))
        );
        assert_eq!(manager.session().chain_id(), Some(ChainId::MAINNET));
    }

    #[tokio::test]
    async fn ensure_network_reports_mismatch_when_switch_fails() {
        let wallet = Arc::new(StubWallet::new(&[ALICE]));
        let manager = manager(&wallet);
        assert!(manager.ensure_network(ChainId::SEPOLIA).await.is_ok());
        assert_eq!(
            manager.ensure_network(ChainId::MAINNET).await.unwrap_err(),
            SessionError::WrongNetwork {
                expected: ChainId::MAINNET,
                actual: ChainId::SEPOLIA,
            }
        );
    }

    #[tokio::test]
    async fn dropping_manager_releases_listeners() {
        let wallet = Arc::new(StubWallet::new(&[ALICE]));
        {
            let manager = manager(&wallet);
            manager.connect().await.unwrap();
            assert_eq!(wallet.registry.total_listeners(), 2);
        }
        assert_eq!(wallet.registry.total_listeners(), 0);
    }
}
