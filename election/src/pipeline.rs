//! Close → tally → publish, resumable from ledger state.
//!
//! Closing an election takes up to two ledger transactions and one upload.
//! Any of them can fail, and the process can die between them, so the
//! pipeline never keeps progress of its own: every run derives its starting
//! step from the ledger ([`ResumePoint`]).
//!
//! | ledger state                     | resume point        |
//! |----------------------------------|---------------------|
//! | `electionEnded == false`         | `Close`             |
//! | ended, empty results hash        | `Tally`             |
//! | ended, results hash present      | `Published(hash)`   |
//!
//! Re-running after a failure therefore never closes twice and never
//! commits a second hash.

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use tally_ledger::ElectionLedger;
use tally_publish::Publisher;
use tally_types::{Address, Clock, PublicationRecord, ResultsDocument, VoteTally};

use crate::error::ElectionError;
use crate::machine::await_finality;

pub const CLOSING_MESSAGE: &str = "Closing election... Please wait for confirmation.";
pub const UPLOADING_MESSAGE: &str = "Uploading results to IPFS...";
pub const COMMITTING_MESSAGE: &str = "Storing IPFS hash on blockchain...";
pub const CLOSED_MESSAGE: &str = "Election closed successfully!";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStep {
    Close,
    Tally,
    Upload,
    Commit,
}

impl PipelineStep {
    /// Progress message shown while the step runs.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Self::Close => Some(CLOSING_MESSAGE),
            Self::Tally => None,
            Self::Upload => Some(UPLOADING_MESSAGE),
            Self::Commit => Some(COMMITTING_MESSAGE),
        }
    }
}

/// Where a run starts, derived from the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResumePoint {
    Close,
    Tally,
    Published(String),
}

/// Result of a completed run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub resumed_from: ResumePoint,
    pub final_tally: VoteTally,
    /// The hash on the ledger after the run.
    pub content_hash: String,
    /// Whether this run committed the hash itself.
    pub committed: bool,
}

impl PipelineOutcome {
    pub fn publication(&self) -> PublicationRecord {
        PublicationRecord::published(self.content_hash.clone())
    }
}

pub struct ResultsPipeline {
    ledger: Arc<dyn ElectionLedger>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    running: Mutex<()>,
}

impl ResultsPipeline {
    pub fn new(
        ledger: Arc<dyn ElectionLedger>,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            publisher,
            clock,
            running: Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    pub async fn resume_point(&self) -> Result<ResumePoint, ElectionError> {
        let (ended, hash) = tokio::try_join!(
            self.ledger.election_ended(),
            self.ledger.election_results_ipfs_hash(),
        )?;
        Ok(match (ended, PublicationRecord::from_ledger(hash).content_hash()) {
            (false, _) => ResumePoint::Close,
            (true, None) => ResumePoint::Tally,
            (true, Some(hash)) => ResumePoint::Published(hash.to_string()),
        })
    }

    /// Run the pipeline from wherever the ledger says it stands.
    ///
    /// `on_step` is called as each step starts. A second run while one is in
    /// flight fails with [`ElectionError::Busy`] and touches nothing.
    pub async fn run<F>(&self, from: &Address, on_step: F) -> Result<PipelineOutcome, ElectionError>
    where
        F: Fn(PipelineStep) + Send + Sync,
    {
        let _running = self.running.try_lock().map_err(|_| ElectionError::Busy)?;

        let resumed_from = self.resume_point().await?;
        tracing::info!(account = %from, resume = ?resumed_from, "results pipeline started");

        if resumed_from == ResumePoint::Close {
            on_step(PipelineStep::Close);
            self.close(from).await?;
        }

        on_step(PipelineStep::Tally);
        let final_tally = self.read_final_tally().await?;

        let (content_hash, committed) = match &resumed_from {
            ResumePoint::Published(hash) => {
                tracing::info!(%hash, "results already published, skipping upload and commit");
                (hash.clone(), false)
            }
            _ => {
                on_step(PipelineStep::Upload);
                let hash = self.upload(&final_tally).await?;
                on_step(PipelineStep::Commit);
                match self.commit(from, &hash).await {
                    Ok(()) => (hash, true),
                    Err(ElectionError::CommitConflict(existing)) => (existing, false),
                    Err(e) => return Err(e),
                }
            }
        };

        tracing::info!(hash = %content_hash, committed, "results pipeline finished");
        Ok(PipelineOutcome {
            resumed_from,
            final_tally,
            content_hash,
            committed,
        })
    }

    /// Step 1. Treats an election found closed after a failure as closed.
    async fn close(&self, from: &Address) -> Result<(), ElectionError> {
        let result = match self.ledger.close_election(from).await {
            Ok(tx) => await_finality(self.ledger.as_ref(), tx).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };
        let Err(err) = result else {
            tracing::info!("election closed on ledger");
            return Ok(());
        };

        if matches!(self.ledger.election_ended().await, Ok(true)) {
            tracing::warn!(error = %err, "close reported failure but the election is closed");
            return Ok(());
        }
        tracing::warn!(error = %err, "close failed");
        Err(ElectionError::CloseFailed(Box::new(err)))
    }

    /// Step 2. Reads the candidate list and frozen counts after close.
    pub async fn read_final_tally(&self) -> Result<VoteTally, ElectionError> {
        let candidates = self
            .ledger
            .get_candidates()
            .await
            .map_err(ElectionError::TallyRead)?;
        let counts = try_join_all(candidates.iter().map(|c| self.ledger.get_final_results(c)))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "final tally read failed");
                ElectionError::TallyRead(e)
            })?;
        Ok(VoteTally::final_tally(
            candidates.into_iter().zip(counts).collect(),
        ))
    }

    async fn upload(&self, tally: &VoteTally) -> Result<String, ElectionError> {
        let document = ResultsDocument::from_tally(self.clock.now(), tally);
        let json = document.to_json().map_err(ElectionError::Document)?;
        let hash = self.publisher.publish(&json).await?;
        tracing::info!(%hash, "results uploaded");
        Ok(hash)
    }

    /// Step 3b. A failed commit is re-checked against the ledger: if a hash
    /// is there now, the step is satisfied and
    /// [`ElectionError::CommitConflict`] carries the stored hash.
    async fn commit(&self, from: &Address, hash: &str) -> Result<(), ElectionError> {
        let result = match self.ledger.store_election_results_ipfs(from, hash).await {
            Ok(tx) => await_finality(self.ledger.as_ref(), tx).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };
        let Err(err) = result else {
            tracing::info!(%hash, "results hash committed");
            return Ok(());
        };

        let stored = self
            .ledger
            .election_results_ipfs_hash()
            .await
            .map(PublicationRecord::from_ledger);
        match stored {
            Ok(record) if record.content_hash() == Some(hash) => {
                tracing::warn!(error = %err, %hash, "commit reported failure but our hash is stored");
                Ok(())
            }
            Ok(record) => match record.content_hash() {
                Some(existing) => {
                    tracing::warn!(%existing, ours = %hash, "results hash already committed");
                    Err(ElectionError::CommitConflict(existing.to_string()))
                }
                None => Err(err),
            },
            Err(_) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Mutex as StdMutex;
    use tally_ledger::{LedgerError, LedgerMethod};
    use tally_nullables::{NullClock, NullLedger, NullPublisher};
    use tally_publish::PublishError;
    use tally_types::CandidateName;

    fn addr(last: u8) -> Address {
        Address::parse(&format!("0x{:040x}", last)).unwrap()
    }

    struct Fixture {
        ledger: Arc<NullLedger>,
        publisher: Arc<NullPublisher>,
        pipeline: ResultsPipeline,
    }

    async fn fixture() -> Fixture {
        let admin = addr(1);
        let ledger = Arc::new(NullLedger::new(admin.clone()));
        for name in ["Alice", "Bob"] {
            ledger
                .register_candidate(&admin, &CandidateName::from_ledger(name))
                .await
                .unwrap();
        }
        ledger.register_voter(&admin, &addr(2)).await.unwrap();
        ledger
            .vote(&addr(2), &CandidateName::from_ledger("Alice"))
            .await
            .unwrap();
        ledger.clear_calls();

        let publisher = Arc::new(NullPublisher::new());
        let pipeline = ResultsPipeline::new(
            ledger.clone(),
            publisher.clone(),
            Arc::new(NullClock::new(1_700_000_000)),
        );
        Fixture {
            ledger,
            publisher,
            pipeline,
        }
    }

    #[tokio::test]
    async fn full_run_reports_steps_in_order() {
        let f = fixture().await;
        let steps = StdMutex::new(Vec::new());
        let outcome = f
            .pipeline
            .run(&addr(1), |step| steps.lock().unwrap().push(step))
            .await
            .unwrap();

        assert_eq!(
            *steps.lock().unwrap(),
            vec![
                PipelineStep::Close,
                PipelineStep::Tally,
                PipelineStep::Upload,
                PipelineStep::Commit
            ]
        );
        assert_eq!(outcome.resumed_from, ResumePoint::Close);
        assert!(outcome.committed);
        assert_eq!(outcome.final_tally.votes_for("Alice"), Some(1));
        assert_eq!(f.ledger.results_hash(), outcome.content_hash);
        assert!(f.publisher.document(&outcome.content_hash).is_some());
    }

    #[tokio::test]
    async fn resume_point_follows_ledger() {
        let f = fixture().await;
        assert_eq!(f.pipeline.resume_point().await.unwrap(), ResumePoint::Close);
        f.ledger.close_election(&addr(1)).await.unwrap();
        assert_eq!(f.pipeline.resume_point().await.unwrap(), ResumePoint::Tally);
        f.ledger
            .store_election_results_ipfs(&addr(1), "bafyx")
            .await
            .unwrap();
        assert_eq!(
            f.pipeline.resume_point().await.unwrap(),
            ResumePoint::Published("bafyx".into())
        );
    }

    #[tokio::test]
    async fn rejected_close_stops_before_tally() {
        let f = fixture().await;
        f.ledger
            .fail_next(LedgerMethod::CloseElection, LedgerError::UserRejected);
        let err = f.pipeline.run(&addr(1), |_| {}).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Pipeline);
        assert!(err.is_user_rejection());
        assert_eq!(f.ledger.count(LedgerMethod::GetFinalResults), 0);
        assert_eq!(f.publisher.publish_count(), 0);
    }

    #[tokio::test]
    async fn lost_close_receipt_is_recovered_in_the_same_run() {
        let f = fixture().await;
        f.ledger
            .lose_receipt_next(LedgerMethod::CloseElection, LedgerError::Rpc("timeout".into()));
        let outcome = f.pipeline.run(&addr(1), |_| {}).await.unwrap();
        assert!(outcome.committed);
        assert_eq!(f.ledger.count(LedgerMethod::CloseElection), 1);
    }

    #[tokio::test]
    async fn upload_failure_leaves_election_closed_and_resumable() {
        let f = fixture().await;
        f.publisher
            .fail_next_publish(PublishError::Upload("HTTP 500".into()));
        let err = f.pipeline.run(&addr(1), |_| {}).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Publication);
        assert!(f.ledger.is_ended());
        assert_eq!(f.pipeline.resume_point().await.unwrap(), ResumePoint::Tally);

        let outcome = f.pipeline.run(&addr(1), |_| {}).await.unwrap();
        assert_eq!(outcome.resumed_from, ResumePoint::Tally);
        assert_eq!(f.ledger.count(LedgerMethod::CloseElection), 1);
    }

    #[tokio::test]
    async fn failed_commit_without_stored_hash_surfaces() {
        let f = fixture().await;
        f.ledger.close_election(&addr(1)).await.unwrap();
        f.ledger.fail_next(
            LedgerMethod::StoreElectionResultsIpfs,
            LedgerError::Rpc("nonce too low".into()),
        );
        let err = f.pipeline.commit(&addr(1), "bafyours").await.unwrap_err();
        assert_eq!(
            err,
            ElectionError::Ledger(LedgerError::Rpc("nonce too low".into()))
        );
        assert_eq!(f.ledger.results_hash(), "");
    }

    #[tokio::test]
    async fn commit_after_foreign_commit_is_a_benign_conflict() {
        let f = fixture().await;
        f.ledger.close_election(&addr(1)).await.unwrap();
        f.ledger
            .store_election_results_ipfs(&addr(1), "bafyother")
            .await
            .unwrap();

        let err = f.pipeline.commit(&addr(1), "bafyours").await.unwrap_err();
        assert_eq!(err, ElectionError::CommitConflict("bafyother".into()));
        assert_eq!(err.kind(), ErrorKind::CommitConflict);
        assert_eq!(f.ledger.results_hash(), "bafyother");
    }

    #[tokio::test]
    async fn second_run_while_running_is_busy() {
        let f = Arc::new(fixture().await);
        let gate = f.ledger.gate_receipts(LedgerMethod::CloseElection);

        let first = {
            let f = f.clone();
            tokio::spawn(async move { f.pipeline.run(&addr(1), |_| {}).await })
        };
        while !f.pipeline.is_running() {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            f.pipeline.run(&addr(1), |_| {}).await.unwrap_err(),
            ElectionError::Busy
        );

        gate.open();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(f.ledger.count(LedgerMethod::CloseElection), 1);
    }
}
