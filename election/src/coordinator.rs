//! The election coordinator.
//!
//! Composes the session manager, role resolver, election machine and results
//! pipeline into one observable [`CoordinatorState`] and exposes the action
//! surface. Every action follows the same shape: local checks, then
//! `loading`, then the capability calls, then a refresh of the affected
//! slices and an outcome [`Notice`]. A failed action only changes `loading`
//! and `notice`.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use tally_ledger::ElectionLedger;
use tally_publish::{test_connection, PublishError, Publisher};
use tally_session::{SessionError, SessionEvent, SessionManager, WalletProvider};
use tally_types::{
    Address, ChainId, Clock, ElectionPhase, PublicationRecord, ResultsDocument, RoleState,
    Session, TxReceipt,
};

use crate::config::ElectionConfig;
use crate::error::{ElectionError, ErrorKind};
use crate::machine::{candidate_name, voter_address, ElectionMachine, ElectionSnapshot};
use crate::pipeline::{PipelineOutcome, PipelineStep, ResultsPipeline, CLOSED_MESSAGE};
use crate::resolver::RoleResolver;

pub const CANDIDATE_REGISTERED_MESSAGE: &str = "Candidate registered successfully!";
pub const VOTER_REGISTERED_MESSAGE: &str = "Voter registered successfully!";
pub const VOTE_CAST_MESSAGE: &str = "Vote cast successfully!";

/// External collaborators, injected at construction.
pub struct Capabilities {
    /// `None` when no wallet provider was detected.
    pub wallet: Option<Arc<dyn WalletProvider>>,
    pub ledger: Arc<dyn ElectionLedger>,
    /// `None` when no publication credential is configured.
    pub publisher: Option<Arc<dyn Publisher>>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// The only network write actions may run on.
    pub chain_id: ChainId,
    pub poll_interval: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &ElectionConfig) -> Self {
        Self {
            chain_id: config.chain_id,
            poll_interval: config.poll_interval(),
        }
    }
}

/// Human-readable outcome of the last action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Progress(String),
    Error { kind: ErrorKind, message: String },
}

impl Notice {
    pub fn from_error(err: &ElectionError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Info(m) | Self::Progress(m) => m,
            Self::Error { message, .. } => message,
        }
    }
}

/// Everything a view needs, replaced wholesale on every change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoordinatorState {
    pub session: Session,
    pub roles: RoleState,
    /// Election slice. `Closing` is shown as `Active` with `loading` set.
    pub election: ElectionSnapshot,
    pub loading: bool,
    pub notice: Option<Notice>,
}

impl CoordinatorState {
    pub fn phase(&self) -> ElectionPhase {
        self.election.phase
    }
}

/// Published results as read back from the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedResults {
    pub content_hash: String,
    pub gateway_url: Option<String>,
    pub document: ResultsDocument,
}

pub struct Coordinator {
    settings: CoordinatorSettings,
    session: SessionManager,
    resolver: RoleResolver,
    machine: Arc<ElectionMachine>,
    pipeline: Option<ResultsPipeline>,
    ledger: Arc<dyn ElectionLedger>,
    publisher: Option<Arc<dyn Publisher>>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<CoordinatorState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Set while the last network check passed.
    on_network: AtomicBool,
}

impl Coordinator {
    pub fn new(capabilities: Capabilities, settings: CoordinatorSettings) -> Arc<Self> {
        let Capabilities {
            wallet,
            ledger,
            publisher,
            clock,
        } = capabilities;
        let (state, _) = watch::channel(CoordinatorState::default());
        Arc::new(Self {
            settings,
            session: SessionManager::new(wallet),
            resolver: RoleResolver::new(ledger.clone()),
            machine: Arc::new(ElectionMachine::new(ledger.clone(), settings.poll_interval)),
            pipeline: publisher
                .as_ref()
                .map(|p| ResultsPipeline::new(ledger.clone(), p.clone(), clock.clone())),
            ledger,
            publisher,
            clock,
            state,
            tasks: Mutex::new(Vec::new()),
            on_network: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> CoordinatorState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.session
    }

    pub fn machine(&self) -> &Arc<ElectionMachine> {
        &self.machine
    }

    pub fn settings(&self) -> CoordinatorSettings {
        self.settings
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Connect the wallet, check the network, load the election, resolve
    /// roles and start polling.
    ///
    /// Account and network listeners stay registered if a later step fails,
    /// so switching the wallet to the right network triggers a reload.
    pub async fn bootstrap(self: &Arc<Self>) -> Result<(), ElectionError> {
        self.stop_tasks();
        self.set(|s| {
            s.loading = true;
            s.notice = None;
        });
        let result = self.connect_and_load().await;
        self.finish("bootstrap", &result, None);
        result
    }

    async fn connect_and_load(self: &Arc<Self>) -> Result<(), ElectionError> {
        let (account, events) = self.session.connect().await?;
        self.sync_session();
        self.spawn(pump_session_events(Arc::downgrade(self), events));

        self.ensure_network().await?;
        self.machine.load().await?;
        self.spawn(mirror_election(Arc::downgrade(self), self.machine.subscribe()));
        self.sync_election();
        self.refresh_roles().await?;
        self.machine.start_polling();
        tracing::info!(account = %account, chain = %self.settings.chain_id, "coordinator ready");
        Ok(())
    }

    /// Read the election without a wallet session.
    pub async fn load(&self) -> Result<ElectionSnapshot, ElectionError> {
        let snapshot = self.machine.load().await?;
        self.sync_election();
        Ok(snapshot)
    }

    /// Stop polling, release the wallet listeners and stop handling events.
    /// Safe to call any number of times.
    pub fn shutdown(&self) {
        self.stop_tasks();
        self.machine.stop_polling();
        self.session.disconnect();
        self.on_network.store(false, Ordering::SeqCst);
        let session = self.session.session();
        self.set(|s| {
            s.session = session;
            s.roles = RoleState::default();
            s.loading = false;
        });
        tracing::debug!("coordinator shut down");
    }

    /// Hard reset: tear everything down, forget all derived state, bootstrap again.
    ///
    /// Boxed because the session event task, which `bootstrap` spawns,
    /// itself triggers reloads.
    pub fn reload(self: &Arc<Self>) -> BoxFuture<'static, Result<(), ElectionError>> {
        let this = Arc::clone(self);
        Box::pin(async move {
            tracing::info!("reloading coordinator");
            this.shutdown();
            this.machine.reset();
            this.state.send_replace(CoordinatorState::default());
            this.bootstrap().await
        })
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(tokio::spawn(task));
    }

    fn stop_tasks(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
    }

    // ── State plumbing ──────────────────────────────────────────────────

    fn set(&self, update: impl FnOnce(&mut CoordinatorState)) {
        self.state.send_modify(update);
    }

    fn sync_session(&self) {
        let session = self.session.session();
        self.set(|s| s.session = session);
    }

    fn sync_election(&self) {
        let election = self.machine.snapshot().observable();
        self.state.send_if_modified(|s| {
            if s.election == election {
                return false;
            }
            s.election = election;
            true
        });
    }

    /// Clear `loading` and post the outcome notice.
    fn finish<T>(&self, action: &'static str, result: &Result<T, ElectionError>, success: Option<&str>) {
        match result {
            Ok(_) => {
                tracing::debug!(action, "action succeeded");
                self.set(|s| {
                    s.loading = false;
                    s.notice = success.map(|m| Notice::Info(m.to_string()));
                });
            }
            // Another close owns `loading`.
            Err(ElectionError::Busy) => self.report(action, &ElectionError::Busy),
            Err(err) => {
                self.report(action, err);
                self.set(|s| s.loading = false);
            }
        }
    }

    fn report(&self, action: &'static str, err: &ElectionError) {
        tracing::warn!(action, kind = ?err.kind(), error = %err, "action failed");
        let notice = Notice::from_error(err);
        self.set(|s| s.notice = Some(notice));
    }

    /// Post a failure from the local checks that run before `loading` is set.
    fn checked<T>(&self, action: &'static str, result: Result<T, ElectionError>) -> Result<T, ElectionError> {
        result.map_err(|err| {
            self.report(action, &err);
            err
        })
    }

    /// Run the capability part of an action under `loading`.
    async fn act<T, Fut>(
        &self,
        action: &'static str,
        work: Fut,
        success: Option<&str>,
    ) -> Result<T, ElectionError>
    where
        Fut: Future<Output = Result<T, ElectionError>>,
    {
        self.set(|s| {
            s.loading = true;
            s.notice = None;
        });
        let result = work.await;
        self.sync_election();
        self.finish(action, &result, success);
        result
    }

    // ── Session and roles ───────────────────────────────────────────────

    fn account(&self) -> Result<Address, ElectionError> {
        self.session
            .account()
            .ok_or(ElectionError::Session(SessionError::NotConnected))
    }

    fn admin_account(&self) -> Result<Address, ElectionError> {
        let account = self.account()?;
        if self.state.borrow().roles.is_admin {
            Ok(account)
        } else {
            Err(ElectionError::NotAdmin)
        }
    }

    /// Check the wallet network, asking it to switch if needed.
    pub async fn ensure_network(&self) -> Result<(), ElectionError> {
        let result = self.session.ensure_network(self.settings.chain_id).await;
        self.on_network.store(result.is_ok(), Ordering::SeqCst);
        self.sync_session();
        result.map_err(ElectionError::from)
    }

    /// Resolve roles for the current account.
    ///
    /// The result is applied only if the account is still the one it was
    /// resolved for.
    pub async fn refresh_roles(&self) -> Result<RoleState, ElectionError> {
        let account = self.account()?;
        let roles = self.resolver.resolve(&account).await?;
        if self.session.account().as_ref() == Some(&account) {
            self.set(|s| s.roles = roles);
        } else {
            tracing::debug!(account = %account, "account changed during resolution, roles discarded");
        }
        Ok(roles)
    }

    async fn on_account_changed(&self, account: Option<Address>) {
        let session = self.session.session();
        self.set(|s| {
            s.session = session;
            s.roles = RoleState::default();
        });
        let Some(account) = account else {
            tracing::info!("wallet access revoked");
            return;
        };

        tracing::info!(account = %account, "account changed");
        if let Err(err) = self.refresh_roles().await {
            self.report("resolve_roles", &err);
        }
        if self.machine.phase() == ElectionPhase::Active {
            if let Err(err) = self.machine.refresh_live_tally().await {
                tracing::warn!(error = %err, "live tally refresh after account change failed");
            }
            self.sync_election();
        }
    }

    // ── Actions ─────────────────────────────────────────────────────────

    pub async fn register_candidate(&self, name: &str) -> Result<TxReceipt, ElectionError> {
        const ACTION: &str = "register_candidate";
        let (from, name) = self.checked(
            ACTION,
            self.admin_account()
                .and_then(|from| Ok((from, candidate_name(name)?))),
        )?;

        self.act(
            ACTION,
            async {
                self.ensure_network().await?;
                self.machine.register_candidate(&from, &name).await
            },
            Some(CANDIDATE_REGISTERED_MESSAGE),
        )
        .await
    }

    pub async fn register_voter(&self, address: &str) -> Result<TxReceipt, ElectionError> {
        const ACTION: &str = "register_voter";
        let (from, voter) = self.checked(
            ACTION,
            self.admin_account()
                .and_then(|from| Ok((from, voter_address(address)?))),
        )?;

        self.act(
            ACTION,
            async {
                self.ensure_network().await?;
                let receipt = self.machine.register_voter(&from, &voter).await?;
                if self.session.account().as_ref() == Some(&voter) {
                    self.set(|s| s.roles.is_registered_voter = true);
                }
                Ok::<_, ElectionError>(receipt)
            },
            Some(VOTER_REGISTERED_MESSAGE),
        )
        .await
    }

    pub async fn vote(&self, candidate: &str) -> Result<TxReceipt, ElectionError> {
        const ACTION: &str = "vote";
        let (from, name) = self.checked(ACTION, {
            self.account().and_then(|from| {
                let name = candidate_name(candidate)?;
                if self.state.borrow().roles.is_registered_voter {
                    Ok((from, name))
                } else {
                    Err(ElectionError::NotRegistered)
                }
            })
        })?;

        self.act(
            ACTION,
            async {
                self.ensure_network().await?;
                match self.machine.vote(&from, &name).await {
                    Ok(receipt) => {
                        self.set(|s| s.roles.has_voted = true);
                        Ok(receipt)
                    }
                    Err(ElectionError::AlreadyVoted) => {
                        self.set(|s| s.roles.has_voted = true);
                        Err(ElectionError::AlreadyVoted)
                    }
                    Err(e) => Err(e),
                }
            },
            Some(VOTE_CAST_MESSAGE),
        )
        .await
    }

    /// Close the election and publish its results, resuming a previous
    /// attempt where the ledger says it stopped.
    /// Close the election and publish the final tally, resuming wherever an
    /// earlier attempt stopped.
    ///
    /// Dropping the returned future mid-flight is allowed: `loading` is
    /// cleared and the election is re-read from the ledger in the background.
    pub async fn end_election(self: &Arc<Self>) -> Result<PipelineOutcome, ElectionError> {
        const ACTION: &str = "end_election";
        let (from, pipeline) = self.checked(ACTION, {
            self.admin_account().and_then(|from| {
                let pipeline = self
                    .pipeline
                    .as_ref()
                    .ok_or(ElectionError::Publication(PublishError::MissingCredential))?;
                if pipeline.is_running() {
                    return Err(ElectionError::Busy);
                }
                Ok((from, pipeline))
            })
        })?;

        let guard = AbandonedClose::arm(self);
        let result = self
            .act(
                ACTION,
                async {
                    self.ensure_network().await?;
                    let result = pipeline
                        .run(&from, |step| {
                            if step == PipelineStep::Close {
                                self.machine.mark_closing();
                            }
                            if let Some(message) = step.message() {
                                self.set(|s| s.notice = Some(Notice::Progress(message.to_string())));
                            }
                        })
                        .await;

                    match &result {
                        Ok(outcome) => {
                            self.machine.mark_closed();
                            self.machine
                                .record_results(outcome.final_tally.clone(), outcome.publication());
                        }
                        Err(ElectionError::Busy) => {}
                        Err(_) => self.resync_after_failed_close().await,
                    }
                    result
                },
                Some(CLOSED_MESSAGE),
            )
            .await;
        guard.disarm();
        result
    }

    /// Put the machine back in line with the ledger after a failed close.
    async fn resync_after_failed_close(&self) {
        if let Err(e) = self.machine.load().await {
            tracing::warn!(error = %e, "could not re-read election after failed close");
            self.machine.abort_closing();
        }
        if self.machine.phase() == ElectionPhase::Active {
            self.machine.start_polling();
        }
    }

    pub async fn refresh_live_tally(&self) -> Result<(), ElectionError> {
        self.machine.refresh_live_tally().await?;
        self.sync_election();
        Ok(())
    }

    // ── Publication ─────────────────────────────────────────────────────

    fn publisher(&self) -> Result<&Arc<dyn Publisher>, ElectionError> {
        self.publisher
            .as_ref()
            .ok_or(ElectionError::Publication(PublishError::MissingCredential))
    }

    /// Fetch the published results document named by the on-ledger hash.
    pub async fn results(&self) -> Result<PublishedResults, ElectionError> {
        let publisher = self.publisher()?;
        let record = PublicationRecord::from_ledger(self.ledger.election_results_ipfs_hash().await?);
        let hash = record.content_hash().ok_or(ElectionError::NotPublished)?;
        let document =
            ResultsDocument::from_json(publisher.retrieve(hash).await?).map_err(ElectionError::Document)?;
        Ok(PublishedResults {
            content_hash: hash.to_string(),
            gateway_url: publisher.gateway_url(hash),
            document,
        })
    }

    /// Upload a probe document and read it back.
    pub async fn test_publication(&self) -> Result<String, ElectionError> {
        let publisher = self.publisher()?;
        Ok(test_connection(publisher.as_ref(), self.clock.now()).await?)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop_tasks();
        self.machine.stop_polling();
    }
}

/// Reconciles the coordinator with the ledger when an `end_election`
/// future is dropped before it finishes.
struct AbandonedClose {
    coordinator: Weak<Coordinator>,
    armed: bool,
}

impl AbandonedClose {
    fn arm(coordinator: &Arc<Coordinator>) -> Self {
        Self {
            coordinator: Arc::downgrade(coordinator),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonedClose {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(coordinator) = self.coordinator.upgrade() else {
            return;
        };
        tracing::warn!("election close abandoned before completion, re-reading the ledger");
        coordinator.machine.abort_closing();
        coordinator.sync_election();
        coordinator.set(|s| {
            s.loading = false;
            s.notice = None;
        });

        // The close may have reached the ledger; only a fresh read can tell.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    coordinator.resync_after_failed_close().await;
                    coordinator.sync_election();
                });
            }
            Err(_) => tracing::debug!("no runtime to reconcile on, election left as last read"),
        }
    }
}

async fn pump_session_events(
    coordinator: Weak<Coordinator>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        match event {
            SessionEvent::AccountChanged(account) => coordinator.on_account_changed(account).await,
            SessionEvent::NetworkChanged(chain) => {
                // Echo of a switch this coordinator asked for.
                if chain == coordinator.settings.chain_id
                    && coordinator.on_network.load(Ordering::SeqCst)
                {
                    tracing::debug!(chain = %chain, "already on the election network");
                    continue;
                }
                tracing::warn!(chain = %chain, "wallet network changed, reloading");
                // The reload tears down this task, so it runs on its own.
                tokio::spawn(async move {
                    if let Err(e) = coordinator.reload().await {
                        tracing::warn!(error = %e, "reload after network change failed");
                    }
                });
                break;
            }
        }
    }
}

async fn mirror_election(
    coordinator: Weak<Coordinator>,
    mut election: watch::Receiver<ElectionSnapshot>,
) {
    while election.changed().await.is_ok() {
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        coordinator.sync_election();
    }
}
