//! Nullable ledger: an in-memory election contract.
//!
//! Mirrors the contract's rules (admin-only writes, one vote per registered
//! voter, frozen results after close, single-write results hash) and lets
//! tests inject failures at each step of a call:
//! - [`NullLedger::fail_next`]: the call errors and has no effect
//! - [`NullLedger::revert_next`]: the write is accepted but its receipt reports failure
//! - [`NullLedger::lose_receipt_next`]: the write takes effect but waiting for its receipt errors
//! - [`NullLedger::gate_receipts`]: receipts for a method are held until released

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;

use tally_ledger::{ElectionLedger, LedgerError, LedgerMethod, PendingTx};
use tally_types::{Address, CandidateName, TxHash, TxReceipt, TxStatus};

struct Submitted {
    status: TxStatus,
    lost: Option<LedgerError>,
}

struct Contract {
    admin: Address,
    candidates: Vec<CandidateName>,
    votes: HashMap<CandidateName, u64>,
    final_results: HashMap<CandidateName, u64>,
    voters: HashSet<Address>,
    voted: HashSet<Address>,
    active: bool,
    ended: bool,
    results_hash: String,
    block: u64,
    txs: HashMap<TxHash, Submitted>,
    calls: Vec<LedgerMethod>,
    receipt_waits: usize,
    fail_next: HashMap<LedgerMethod, LedgerError>,
    revert_next: HashSet<LedgerMethod>,
    lose_receipt_next: HashMap<LedgerMethod, LedgerError>,
    gates: HashMap<LedgerMethod, Arc<Semaphore>>,
}

/// Holds back receipts for one method until opened.
#[derive(Clone)]
pub struct ReceiptGate {
    permits: Arc<Semaphore>,
}

impl ReceiptGate {
    /// Let one held receipt through.
    pub fn open(&self) {
        self.permits.add_permits(1);
    }
}

/// An in-memory election contract.
pub struct NullLedger {
    contract: Mutex<Contract>,
}

impl NullLedger {
    /// A fresh, active election administered by `admin`.
    pub fn new(admin: Address) -> Self {
        Self {
            contract: Mutex::new(Contract {
                admin,
                candidates: Vec::new(),
                votes: HashMap::new(),
                final_results: HashMap::new(),
                voters: HashSet::new(),
                voted: HashSet::new(),
                active: true,
                ended: false,
                results_hash: String::new(),
                block: 0,
                txs: HashMap::new(),
                calls: Vec::new(),
                receipt_waits: 0,
                fail_next: HashMap::new(),
                revert_next: HashSet::new(),
                lose_receipt_next: HashMap::new(),
                gates: HashMap::new(),
            }),
        }
    }

    fn contract(&self) -> MutexGuard<'_, Contract> {
        self.contract.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Fault injection ─────────────────────────────────────────────────

    /// The next call to `method` fails with `error` and changes nothing.
    pub fn fail_next(&self, method: LedgerMethod, error: LedgerError) {
        self.contract().fail_next.insert(method, error);
    }

    /// The next `method` write is accepted but mined with a failed status.
    pub fn revert_next(&self, method: LedgerMethod) {
        self.contract().revert_next.insert(method);
    }

    /// The next `method` write takes effect, but waiting for its receipt fails.
    pub fn lose_receipt_next(&self, method: LedgerMethod, error: LedgerError) {
        self.contract().lose_receipt_next.insert(method, error);
    }

    /// Hold receipts for `method` until the returned gate is opened.
    pub fn gate_receipts(&self, method: LedgerMethod) -> ReceiptGate {
        let permits = Arc::new(Semaphore::new(0));
        self.contract().gates.insert(method, permits.clone());
        ReceiptGate { permits }
    }

    // ── Direct state manipulation (other sessions acting on the contract) ──

    /// Record a vote by `voter` as if cast from another session.
    pub fn mark_voted(&self, voter: &Address) {
        self.contract().voted.insert(voter.clone());
    }

    /// Add a candidate directly, bypassing admin checks.
    pub fn seed_candidate(&self, name: &str) {
        let mut c = self.contract();
        let name = CandidateName::from_ledger(name);
        c.votes.entry(name.clone()).or_insert(0);
        c.candidates.push(name);
    }

    // ── Inspection ──────────────────────────────────────────────────────

    /// Every contract method called so far, in order.
    pub fn calls(&self) -> Vec<LedgerMethod> {
        self.contract().calls.clone()
    }

    pub fn count(&self, method: LedgerMethod) -> usize {
        self.contract().calls.iter().filter(|m| **m == method).count()
    }

    /// Number of write submissions so far.
    pub fn write_count(&self) -> usize {
        self.contract().calls.iter().filter(|m| m.is_write()).count()
    }

    pub fn receipt_waits(&self) -> usize {
        self.contract().receipt_waits
    }

    pub fn clear_calls(&self) {
        self.contract().calls.clear();
    }

    pub fn is_ended(&self) -> bool {
        self.contract().ended
    }

    pub fn results_hash(&self) -> String {
        self.contract().results_hash.clone()
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Log the call and consume an injected failure, if any.
    fn enter(&self, method: LedgerMethod) -> Result<MutexGuard<'_, Contract>, LedgerError> {
        let mut c = self.contract();
        c.calls.push(method);
        match c.fail_next.remove(&method) {
            Some(err) => Err(err),
            None => Ok(c),
        }
    }

    /// Validate and apply a write, then record its pending receipt.
    fn submit(
        &self,
        method: LedgerMethod,
        from: &Address,
        apply: impl FnOnce(&mut Contract, &Address) -> Result<(), String>,
    ) -> Result<PendingTx, LedgerError> {
        let mut c = self.enter(method)?;
        let reverted = c.revert_next.remove(&method);
        if !reverted {
            apply(&mut c, from).map_err(LedgerError::Reverted)?;
        }
        c.block += 1;
        let hash = TxHash::new(format!("0x{:064x}", c.block));
        let lost = c.lose_receipt_next.remove(&method);
        c.txs.insert(
            hash.clone(),
            Submitted {
                status: if reverted {
                    TxStatus::Failed
                } else {
                    TxStatus::Success
                },
                lost,
            },
        );
        Ok(PendingTx::new(hash, method))
    }
}

fn only_admin(c: &Contract, from: &Address) -> Result<(), String> {
    if *from == c.admin {
        Ok(())
    } else {
        Err("Only admin can perform this action".into())
    }
}

fn only_active(c: &Contract) -> Result<(), String> {
    if c.active {
        Ok(())
    } else {
        Err("Election is not active".into())
    }
}

#[async_trait]
impl ElectionLedger for NullLedger {
    async fn admin(&self) -> Result<Address, LedgerError> {
        Ok(self.enter(LedgerMethod::Admin)?.admin.clone())
    }

    async fn voters(&self, account: &Address) -> Result<bool, LedgerError> {
        Ok(self.enter(LedgerMethod::Voters)?.voters.contains(account))
    }

    async fn has_voted(&self, account: &Address) -> Result<bool, LedgerError> {
        Ok(self.enter(LedgerMethod::HasVoted)?.voted.contains(account))
    }

    async fn get_candidates(&self) -> Result<Vec<CandidateName>, LedgerError> {
        Ok(self.enter(LedgerMethod::GetCandidates)?.candidates.clone())
    }

    async fn get_votes(&self, name: &CandidateName) -> Result<u64, LedgerError> {
        let c = self.enter(LedgerMethod::GetVotes)?;
        Ok(c.votes.get(name).copied().unwrap_or(0))
    }

    async fn get_final_results(&self, name: &CandidateName) -> Result<u64, LedgerError> {
        let c = self.enter(LedgerMethod::GetFinalResults)?;
        if !c.ended {
            return Err(LedgerError::Reverted("Election has not ended".into()));
        }
        Ok(c.final_results.get(name).copied().unwrap_or(0))
    }

    async fn election_active(&self) -> Result<bool, LedgerError> {
        Ok(self.enter(LedgerMethod::ElectionActive)?.active)
    }

    async fn election_ended(&self) -> Result<bool, LedgerError> {
        Ok(self.enter(LedgerMethod::ElectionEnded)?.ended)
    }

    async fn election_results_ipfs_hash(&self) -> Result<String, LedgerError> {
        Ok(self
            .enter(LedgerMethod::ElectionResultsIpfsHash)?
            .results_hash
            .clone())
    }

    async fn register_candidate(
        &self,
        from: &Address,
        name: &CandidateName,
    ) -> Result<PendingTx, LedgerError> {
        self.submit(LedgerMethod::RegisterCandidate, from, |c, from| {
            only_admin(c, from)?;
            only_active(c)?;
            if c.candidates.contains(name) {
                return Err("Candidate already registered".into());
            }
            c.candidates.push(name.clone());
            c.votes.insert(name.clone(), 0);
            Ok(())
        })
    }

    async fn register_voter(
        &self,
        from: &Address,
        voter: &Address,
    ) -> Result<PendingTx, LedgerError> {
        self.submit(LedgerMethod::RegisterVoter, from, |c, from| {
            only_admin(c, from)?;
            only_active(c)?;
            c.voters.insert(voter.clone());
            Ok(())
        })
    }

    async fn vote(&self, from: &Address, name: &CandidateName) -> Result<PendingTx, LedgerError> {
        self.submit(LedgerMethod::Vote, from, |c, from| {
            only_active(c)?;
            if !c.voters.contains(from) {
                return Err("Not a registered voter".into());
            }
            if c.voted.contains(from) {
                return Err("Already voted".into());
            }
            let count = c
                .votes
                .get_mut(name)
                .ok_or_else(|| "Candidate does not exist".to_string())?;
            *count += 1;
            c.voted.insert(from.clone());
            Ok(())
        })
    }

    async fn close_election(&self, from: &Address) -> Result<PendingTx, LedgerError> {
        self.submit(LedgerMethod::CloseElection, from, |c, from| {
            only_admin(c, from)?;
            only_active(c)?;
            c.active = false;
            c.ended = true;
            c.final_results = c.votes.clone();
            Ok(())
        })
    }

    async fn store_election_results_ipfs(
        &self,
        from: &Address,
        hash: &str,
    ) -> Result<PendingTx, LedgerError> {
        self.submit(LedgerMethod::StoreElectionResultsIpfs, from, |c, from| {
            only_admin(c, from)?;
            if !c.ended {
                return Err("Election has not ended".into());
            }
            if !c.results_hash.is_empty() {
                return Err("Results already stored".into());
            }
            c.results_hash = hash.to_string();
            Ok(())
        })
    }

    async fn wait_for_receipt(&self, tx: &PendingTx) -> Result<TxReceipt, LedgerError> {
        let gate = {
            let mut c = self.contract();
            c.receipt_waits += 1;
            c.gates.get(&tx.method).cloned()
        };
        if let Some(permits) = gate {
            let permit = permits
                .acquire()
                .await
                .map_err(|_| LedgerError::Rpc("receipt gate closed".into()))?;
            permit.forget();
        }

        let mut c = self.contract();
        let block = c.block;
        let submitted = c
            .txs
            .get_mut(&tx.hash)
            .ok_or_else(|| LedgerError::Rpc(format!("unknown transaction {}", tx.hash)))?;
        if let Some(err) = submitted.lost.take() {
            return Err(err);
        }
        Ok(TxReceipt {
            tx_hash: tx.hash.clone(),
            status: submitted.status,
            block_number: Some(block),
        })
    }
}
