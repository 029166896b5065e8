//! Election phase, candidates and vote counts.
//!
//! [`ElectionMachine`] owns the election slice of the coordinator state:
//! the phase (`Active` → `Closing` → `Closed`), the candidate list, the
//! advisory live tally, the final tally and the publication record. It runs
//! the single-transaction actions (register candidate, register voter, vote)
//! and the live-tally poller, which only runs while the phase is `Active`.

use futures_util::future::try_join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tally_ledger::{ElectionLedger, PendingTx};
use tally_types::{
    Address, CandidateName, ElectionPhase, PublicationRecord, TxReceipt, VoteTally,
};

use crate::error::ElectionError;

/// Point-in-time view of the election.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ElectionSnapshot {
    pub phase: ElectionPhase,
    /// Candidates in ledger order.
    pub candidates: Vec<CandidateName>,
    /// Polled counts while active. Never authoritative.
    pub live_tally: Option<VoteTally>,
    /// Frozen counts read after close.
    pub final_tally: Option<VoteTally>,
    pub publication: PublicationRecord,
}

impl ElectionSnapshot {
    /// The snapshot as seen from outside the results pipeline.
    pub fn observable(&self) -> Self {
        Self {
            phase: self.phase.observable(),
            ..self.clone()
        }
    }
}

/// Validate a candidate name for submission.
pub fn candidate_name(raw: &str) -> Result<CandidateName, ElectionError> {
    CandidateName::new(raw).map_err(|_| ElectionError::InvalidCandidateName)
}

/// Validate a voter address for submission.
pub fn voter_address(raw: &str) -> Result<Address, ElectionError> {
    Address::parse(raw).map_err(ElectionError::InvalidAddressFormat)
}

/// Wait for `tx` to reach finality and require a successful status.
pub(crate) async fn await_finality(
    ledger: &dyn ElectionLedger,
    tx: PendingTx,
) -> Result<TxReceipt, ElectionError> {
    tracing::debug!(method = %tx.method, tx_hash = %tx.hash, "awaiting finality");
    let receipt = ledger.wait_for_receipt(&tx).await?;
    if !receipt.is_success() {
        tracing::warn!(method = %tx.method, tx_hash = %receipt.tx_hash, "transaction failed");
        return Err(ElectionError::TransactionFailed {
            tx_hash: receipt.tx_hash,
        });
    }
    Ok(receipt)
}

pub struct ElectionMachine {
    ledger: Arc<dyn ElectionLedger>,
    state: watch::Sender<ElectionSnapshot>,
    poll_interval: Duration,
    /// Bumped whenever polling stops; a poll started under an older epoch
    /// must not write.
    poll_epoch: AtomicU64,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl ElectionMachine {
    pub fn new(ledger: Arc<dyn ElectionLedger>, poll_interval: Duration) -> Self {
        let (state, _) = watch::channel(ElectionSnapshot::default());
        Self {
            ledger,
            state,
            poll_interval,
            poll_epoch: AtomicU64::new(0),
            poller: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> ElectionSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ElectionSnapshot> {
        self.state.subscribe()
    }

    pub fn phase(&self) -> ElectionPhase {
        self.state.borrow().phase
    }

    // ── Sync ────────────────────────────────────────────────────────────

    /// Read phase, candidates and publication record from the ledger.
    pub async fn load(&self) -> Result<ElectionSnapshot, ElectionError> {
        let (ended, candidates, hash) = tokio::try_join!(
            self.ledger.election_ended(),
            self.ledger.get_candidates(),
            self.ledger.election_results_ipfs_hash(),
        )?;

        if ended {
            self.stop_polling();
        }
        self.state.send_modify(|s| {
            s.phase = match (s.phase, ended) {
                (ElectionPhase::Closed, _) | (_, true) => ElectionPhase::Closed,
                _ => ElectionPhase::Active,
            };
            if s.phase.is_closed() {
                s.live_tally = None;
            }
            s.candidates = candidates;
            s.publication = PublicationRecord::from_ledger(hash);
        });
        let snapshot = self.snapshot();
        tracing::info!(
            phase = ?snapshot.phase,
            candidates = snapshot.candidates.len(),
            published = snapshot.publication.is_published(),
            "election state loaded"
        );
        Ok(snapshot)
    }

    pub async fn refresh_candidates(&self) -> Result<Vec<CandidateName>, ElectionError> {
        let candidates = self.ledger.get_candidates().await?;
        self.state.send_modify(|s| s.candidates = candidates.clone());
        Ok(candidates)
    }

    /// Re-read candidates and their live counts. Only applied while active.
    pub async fn refresh_live_tally(&self) -> Result<VoteTally, ElectionError> {
        self.read_live_tally(None).await
    }

    async fn read_live_tally(&self, epoch: Option<u64>) -> Result<VoteTally, ElectionError> {
        let candidates = self.ledger.get_candidates().await?;
        let counts = try_join_all(candidates.iter().map(|c| self.ledger.get_votes(c))).await?;
        let tally = VoteTally::live(candidates.iter().cloned().zip(counts).collect());

        self.state.send_if_modified(|s| {
            let current = epoch.map_or(true, |e| e == self.poll_epoch.load(Ordering::SeqCst));
            if !current || s.phase != ElectionPhase::Active {
                return false;
            }
            s.candidates = candidates;
            s.live_tally = Some(tally.clone());
            true
        });
        Ok(tally)
    }

    // ── Actions ─────────────────────────────────────────────────────────

    fn require_active(&self) -> Result<(), ElectionError> {
        match self.phase() {
            ElectionPhase::Active => Ok(()),
            _ => Err(ElectionError::ElectionClosed),
        }
    }

    /// Submit a candidate, wait for finality, then refresh the candidate list.
    pub async fn register_candidate(
        &self,
        from: &Address,
        name: &CandidateName,
    ) -> Result<TxReceipt, ElectionError> {
        self.require_active()?;
        let tx = self.ledger.register_candidate(from, name).await?;
        let receipt = await_finality(self.ledger.as_ref(), tx).await?;
        tracing::info!(candidate = %name, tx_hash = %receipt.tx_hash, "candidate registered");
        if let Err(e) = self.refresh_candidates().await {
            tracing::warn!(error = %e, "candidate refresh after registration failed");
        }
        Ok(receipt)
    }

    pub async fn register_voter(
        &self,
        from: &Address,
        voter: &Address,
    ) -> Result<TxReceipt, ElectionError> {
        self.require_active()?;
        let tx = self.ledger.register_voter(from, voter).await?;
        let receipt = await_finality(self.ledger.as_ref(), tx).await?;
        tracing::info!(voter = %voter, tx_hash = %receipt.tx_hash, "voter registered");
        Ok(receipt)
    }

    /// Cast `from`'s vote for `name`.
    ///
    /// Registration is checked by the caller from resolved roles; the
    /// has-voted flag is read from the ledger right before submission.
    pub async fn vote(&self, from: &Address, name: &CandidateName) -> Result<TxReceipt, ElectionError> {
        self.require_active()?;
        if self.ledger.has_voted(from).await? {
            return Err(ElectionError::AlreadyVoted);
        }

        let tx = self.ledger.vote(from, name).await?;
        let receipt = await_finality(self.ledger.as_ref(), tx).await?;
        tracing::info!(voter = %from, candidate = %name, tx_hash = %receipt.tx_hash, "vote cast");
        if let Err(e) = self.refresh_live_tally().await {
            tracing::warn!(error = %e, "live tally refresh after vote failed");
        }
        Ok(receipt)
    }

    // ── Phase transitions ───────────────────────────────────────────────

    /// Enter the pipeline's transient phase. No-op unless active.
    pub fn mark_closing(&self) {
        self.state.send_if_modified(|s| {
            if s.phase.can_transition_to(ElectionPhase::Closing) {
                s.phase = ElectionPhase::Closing;
                true
            } else {
                false
            }
        });
    }

    /// Leave `Closing` without having closed.
    pub fn abort_closing(&self) {
        self.state.send_if_modified(|s| {
            if s.phase == ElectionPhase::Closing {
                s.phase = ElectionPhase::Active;
                true
            } else {
                false
            }
        });
    }

    /// Enter the terminal phase: stop polling and drop the live tally.
    pub fn mark_closed(&self) {
        self.stop_polling();
        self.state.send_modify(|s| {
            s.phase = ElectionPhase::Closed;
            s.live_tally = None;
        });
    }

    /// Record the frozen tally and the on-ledger publication record.
    pub fn record_results(&self, final_tally: VoteTally, publication: PublicationRecord) {
        self.state.send_modify(|s| {
            s.candidates = final_tally.entries().iter().map(|(n, _)| n.clone()).collect();
            s.final_tally = Some(final_tally);
            s.publication = publication;
        });
    }

    /// Drop everything derived from the ledger, e.g. before a rebind.
    pub fn reset(&self) {
        self.stop_polling();
        self.state.send_replace(ElectionSnapshot::default());
    }

    // ── Polling ─────────────────────────────────────────────────────────

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Start refreshing the live tally every poll interval while active.
    ///
    /// Replaces any running poller.
    pub fn start_polling(self: &Arc<Self>) {
        if self.phase() != ElectionPhase::Active {
            return;
        }
        self.stop_polling();
        let epoch = self.poll_epoch.load(Ordering::SeqCst);
        let handle = tokio::spawn(poll_loop(Arc::downgrade(self), self.poll_interval, epoch));
        *self.poller.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::debug!(interval = ?self.poll_interval, epoch, "live tally polling started");
    }

    /// Cancel the poller. A poll already in flight completes but is not applied.
    pub fn stop_polling(&self) {
        self.state.send_if_modified(|_| {
            self.poll_epoch.fetch_add(1, Ordering::SeqCst);
            false
        });
        if let Some(handle) = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            tracing::debug!("live tally polling stopped");
        }
    }

    fn poll_is_current(&self, epoch: u64) -> bool {
        self.poll_epoch.load(Ordering::SeqCst) == epoch && self.phase() == ElectionPhase::Active
    }
}

impl Drop for ElectionMachine {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

async fn poll_loop(machine: Weak<ElectionMachine>, period: Duration, epoch: u64) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(machine) = machine.upgrade() else {
            break;
        };
        if !machine.poll_is_current(epoch) {
            break;
        }
        if let Err(e) = machine.read_live_tally(Some(epoch)).await {
            tracing::warn!(error = %e, "live tally poll failed");
        }
    }
}
