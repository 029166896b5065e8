//! Integration tests driving the coordinator end to end against the
//! nullable wallet, ledger and publisher:
//! session events → role resolution → actions → close/publish → readback.

use std::sync::Arc;
use std::time::Duration;

use tally_election::{
    Capabilities, Coordinator, CoordinatorSettings, CoordinatorState, ElectionError, ErrorKind,
    Notice, ResumePoint, CLOSED_MESSAGE, VOTE_CAST_MESSAGE,
};
use tally_ledger::{LedgerError, LedgerMethod};
use tally_nullables::{NullClock, NullLedger, NullPublisher, NullWallet};
use tally_session::EventKind;
use tally_types::{Address, ChainId, ElectionPhase};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn admin() -> Address {
    Address::parse("0x70997970C51812dc3A010C7d01b50e0d17dc79C8").unwrap()
}

fn voter() -> Address {
    Address::parse("0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC").unwrap()
}

struct Harness {
    wallet: Arc<NullWallet>,
    ledger: Arc<NullLedger>,
    publisher: Arc<NullPublisher>,
    coordinator: Arc<Coordinator>,
}

impl Harness {
    fn new(poll_interval: Duration) -> Self {
        let wallet = Arc::new(NullWallet::new(vec![admin()], ChainId::SEPOLIA));
        let ledger = Arc::new(NullLedger::new(admin()));
        let publisher = Arc::new(NullPublisher::new());
        let coordinator = coordinator_for(&wallet, &ledger, &publisher, poll_interval);
        Self {
            wallet,
            ledger,
            publisher,
            coordinator,
        }
    }

    /// A second coordinator over the same wallet, ledger and store, as after a restart.
    fn restart(&self) -> Arc<Coordinator> {
        coordinator_for(
            &self.wallet,
            &self.ledger,
            &self.publisher,
            Duration::from_secs(3600),
        )
    }

    /// Bootstrap as admin with candidates Alice and Bob and `voter()` registered.
    async fn seeded() -> Self {
        let h = Self::new(Duration::from_secs(3600));
        h.coordinator.bootstrap().await.unwrap();
        h.coordinator.register_candidate("Alice").await.unwrap();
        h.coordinator.register_candidate("Bob").await.unwrap();
        h.coordinator
            .register_voter(voter().as_str())
            .await
            .unwrap();
        h
    }

    async fn switch_to(&self, account: Address) -> CoordinatorState {
        self.wallet.set_accounts(vec![account.clone()]);
        let admin = account == admin();
        wait_until(&self.coordinator, move |s| {
            s.session.account() == Some(&account)
                && if admin {
                    s.roles.is_admin
                } else {
                    s.roles.is_registered_voter
                }
        })
        .await
    }
}

fn coordinator_for(
    wallet: &Arc<NullWallet>,
    ledger: &Arc<NullLedger>,
    publisher: &Arc<NullPublisher>,
    poll_interval: Duration,
) -> Arc<Coordinator> {
    Coordinator::new(
        Capabilities {
            wallet: Some(wallet.clone()),
            ledger: ledger.clone(),
            publisher: Some(publisher.clone()),
            clock: Arc::new(NullClock::new(1_700_000_000)),
        },
        CoordinatorSettings {
            chain_id: ChainId::SEPOLIA,
            poll_interval,
        },
    )
}

async fn wait_until(
    coordinator: &Coordinator,
    predicate: impl FnMut(&CoordinatorState) -> bool,
) -> CoordinatorState {
    let mut rx = coordinator.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("state reached within timeout")
        .expect("coordinator alive");
    state.clone()
}

async fn wait_for_condition(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition reached within timeout");
}

// ---------------------------------------------------------------------------
// 1. End-to-end scenario
// ---------------------------------------------------------------------------

#[tokio::test]
async fn alice_wins_and_results_round_trip() {
    let h = Harness::seeded().await;

    let state = h.switch_to(voter()).await;
    assert!(!state.roles.is_admin);
    assert!(state.roles.can_vote());

    h.coordinator.vote("Alice").await.unwrap();
    let state = h.coordinator.state();
    assert!(state.roles.has_voted);
    assert_eq!(state.notice, Some(Notice::Info(VOTE_CAST_MESSAGE.into())));
    let live = state.election.live_tally.expect("live tally after vote");
    assert_eq!(live.votes_for("Alice"), Some(1));

    h.switch_to(admin()).await;
    let outcome = h.coordinator.end_election().await.unwrap();
    assert_eq!(outcome.resumed_from, ResumePoint::Close);
    assert!(outcome.committed);
    assert_eq!(outcome.final_tally.votes_for("Alice"), Some(1));
    assert_eq!(outcome.final_tally.votes_for("Bob"), Some(0));

    let state = h.coordinator.state();
    assert_eq!(state.phase(), ElectionPhase::Closed);
    assert!(!state.loading);
    assert_eq!(state.notice, Some(Notice::Info(CLOSED_MESSAGE.into())));
    assert!(state.election.live_tally.is_none());
    assert_eq!(
        state.election.publication.content_hash(),
        Some(outcome.content_hash.as_str())
    );

    let published = h.coordinator.results().await.unwrap();
    assert_eq!(published.content_hash, outcome.content_hash);
    assert_eq!(published.document.pairs(), vec![("Alice", 1), ("Bob", 0)]);
    assert_eq!(published.document.end_time.as_secs(), 1_700_000_000);
    assert!(published.gateway_url.is_some());
}

#[tokio::test]
async fn actions_after_close_are_phase_errors() {
    let h = Harness::seeded().await;
    h.coordinator.end_election().await.unwrap();
    h.ledger.clear_calls();

    let err = h.coordinator.register_candidate("Carol").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Phase);
    assert_eq!(h.ledger.write_count(), 0);
}

// ---------------------------------------------------------------------------
// 2. Results pipeline recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tally_failure_resumes_without_closing_again() {
    let h = Harness::seeded().await;
    h.ledger.fail_next(
        LedgerMethod::GetFinalResults,
        LedgerError::Rpc("connection reset".into()),
    );

    let err = h.coordinator.end_election().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pipeline);
    let state = h.coordinator.state();
    assert_eq!(state.phase(), ElectionPhase::Closed);
    assert!(!state.election.publication.is_published());
    assert!(!state.loading);

    let outcome = h.coordinator.end_election().await.unwrap();
    assert_eq!(outcome.resumed_from, ResumePoint::Tally);
    assert_eq!(h.ledger.count(LedgerMethod::CloseElection), 1);
    assert_eq!(h.ledger.count(LedgerMethod::StoreElectionResultsIpfs), 1);
}

#[tokio::test]
async fn restart_after_close_resumes_at_tally() {
    let h = Harness::seeded().await;
    h.ledger.fail_next(
        LedgerMethod::GetCandidates,
        LedgerError::Rpc("gateway restarting".into()),
    );
    // Close goes through, then the process "dies" on the tally read.
    assert!(h.coordinator.end_election().await.is_err());
    h.coordinator.shutdown();

    let restarted = h.restart();
    restarted.bootstrap().await.unwrap();
    assert_eq!(restarted.state().phase(), ElectionPhase::Closed);
    assert!(!restarted.machine().is_polling());

    let outcome = restarted.end_election().await.unwrap();
    assert_eq!(outcome.resumed_from, ResumePoint::Tally);
    assert_eq!(h.ledger.count(LedgerMethod::CloseElection), 1);
}

#[tokio::test]
async fn restart_after_commit_submission_never_commits_twice() {
    let h = Harness::seeded().await;
    let gate = h.ledger.gate_receipts(LedgerMethod::StoreElectionResultsIpfs);

    let first = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.end_election().await })
    };
    let ledger = h.ledger.clone();
    wait_for_condition(move || !ledger.results_hash().is_empty()).await;
    // The commit is on the ledger but its confirmation was never observed.
    first.abort();
    drop(gate);

    let restarted = h.restart();
    restarted.bootstrap().await.unwrap();
    assert!(restarted.state().election.publication.is_published());

    let outcome = restarted.end_election().await.unwrap();
    assert!(matches!(outcome.resumed_from, ResumePoint::Published(_)));
    assert!(!outcome.committed);
    assert_eq!(outcome.content_hash, h.ledger.results_hash());
    assert_eq!(h.ledger.count(LedgerMethod::StoreElectionResultsIpfs), 1);
    assert_eq!(h.publisher.publish_count(), 1);
}

#[tokio::test]
async fn abandoned_close_is_reconciled_with_the_ledger() {
    let h = Harness::new(Duration::from_millis(20));
    h.coordinator.bootstrap().await.unwrap();
    h.coordinator.register_candidate("Alice").await.unwrap();
    let gate = h.ledger.gate_receipts(LedgerMethod::CloseElection);

    let waited =
        tokio::time::timeout(Duration::from_millis(100), h.coordinator.end_election()).await;
    assert!(waited.is_err());
    assert!(h.ledger.is_ended());
    assert!(!h.coordinator.state().loading);

    let state = wait_until(&h.coordinator, |s| s.phase() == ElectionPhase::Closed).await;
    assert!(!state.loading);
    assert!(!state.election.publication.is_published());
    assert!(state.election.live_tally.is_none());
    assert!(!h.coordinator.machine().is_polling());

    drop(gate);
    let outcome = h.coordinator.end_election().await.unwrap();
    assert_eq!(outcome.resumed_from, ResumePoint::Tally);
    assert_eq!(h.ledger.count(LedgerMethod::CloseElection), 1);
    assert_eq!(h.coordinator.state().phase(), ElectionPhase::Closed);
}

#[tokio::test]
async fn rejected_close_keeps_election_active() {
    let h = Harness::new(Duration::from_millis(20));
    h.coordinator.bootstrap().await.unwrap();
    h.ledger
        .fail_next(LedgerMethod::CloseElection, LedgerError::UserRejected);

    let err = h.coordinator.end_election().await.unwrap_err();
    assert!(err.is_user_rejection());
    let state = h.coordinator.state();
    assert_eq!(state.phase(), ElectionPhase::Active);
    assert!(matches!(
        state.notice,
        Some(Notice::Error { kind: ErrorKind::Pipeline, .. })
    ));
    assert!(h.coordinator.machine().is_polling());
}

// ---------------------------------------------------------------------------
// 3. Guards: network, validation, concurrency, races
// ---------------------------------------------------------------------------

#[tokio::test]
async fn wrong_network_blocks_every_write_without_ledger_calls() {
    let h = Harness::seeded().await;
    h.coordinator
        .register_voter(admin().as_str())
        .await
        .unwrap();

    h.wallet.allow_switch(false);
    h.wallet.set_chain_silently(ChainId::MAINNET);
    h.ledger.clear_calls();

    let results = [
        h.coordinator.register_candidate("Carol").await.map(|_| ()),
        h.coordinator.register_voter(voter().as_str()).await.map(|_| ()),
        h.coordinator.vote("Alice").await.map(|_| ()),
        h.coordinator.end_election().await.map(|_| ()),
    ];
    for result in results {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NetworkMismatch);
    }
    assert!(h.ledger.calls().is_empty());
    assert_eq!(h.coordinator.state().phase(), ElectionPhase::Active);
}

#[tokio::test]
async fn wrong_network_is_switched_when_the_wallet_agrees() {
    let h = Harness::new(Duration::from_secs(3600));
    h.wallet.set_chain_silently(ChainId::MAINNET);
    h.coordinator.bootstrap().await.unwrap();
    assert_eq!(h.wallet.chain(), ChainId::SEPOLIA);
}

#[tokio::test]
async fn invalid_input_is_rejected_without_ledger_calls() {
    let h = Harness::seeded().await;
    h.ledger.clear_calls();

    for name in ["", "   ", "\t\n"] {
        assert_eq!(
            h.coordinator.register_candidate(name).await.unwrap_err(),
            ElectionError::InvalidCandidateName
        );
    }
    for address in ["", "not-an-address", "0x1234", "0xZZ997970C51812dc3A010C7d01b50e0d17dc79C8"] {
        let err = h.coordinator.register_voter(address).await.unwrap_err();
        assert!(matches!(err, ElectionError::InvalidAddressFormat(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert!(h.ledger.calls().is_empty());
    assert_eq!(
        h.coordinator.state().notice.map(|n| n.message().to_string()),
        Some("Invalid Ethereum address format: 0xZZ997970C51812dc3A010C7d01b50e0d17dc79C8".into())
    );
}

#[tokio::test]
async fn second_close_while_first_in_flight_is_rejected() {
    let h = Harness::seeded().await;
    let gate = h.ledger.gate_receipts(LedgerMethod::CloseElection);
    let waits = h.ledger.receipt_waits();

    let first = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.end_election().await })
    };
    let ledger = h.ledger.clone();
    wait_for_condition(move || ledger.receipt_waits() > waits).await;
    assert!(h.coordinator.state().loading);
    assert_eq!(h.coordinator.state().phase(), ElectionPhase::Active);

    let err = h.coordinator.end_election().await.unwrap_err();
    assert_eq!(err, ElectionError::Busy);
    assert!(h.coordinator.state().loading);

    gate.open();
    first.await.unwrap().unwrap();
    assert_eq!(h.ledger.count(LedgerMethod::CloseElection), 1);
    assert_eq!(h.ledger.count(LedgerMethod::StoreElectionResultsIpfs), 1);
    assert!(!h.coordinator.state().loading);
}

#[tokio::test]
async fn vote_recorded_elsewhere_is_caught_before_submission() {
    let h = Harness::seeded().await;
    let state = h.switch_to(voter()).await;
    assert!(!state.roles.has_voted);

    // The same account votes from another session.
    h.ledger.mark_voted(&voter());
    h.ledger.clear_calls();

    let err = h.coordinator.vote("Alice").await.unwrap_err();
    assert_eq!(err, ElectionError::AlreadyVoted);
    assert_eq!(h.ledger.count(LedgerMethod::Vote), 0);
    assert!(h.coordinator.state().roles.has_voted);
}

#[tokio::test]
async fn unregistered_account_cannot_vote() {
    let h = Harness::seeded().await;
    h.ledger.clear_calls();
    assert_eq!(
        h.coordinator.vote("Alice").await.unwrap_err(),
        ElectionError::NotRegistered
    );
    assert!(h.ledger.calls().is_empty());
}

// ---------------------------------------------------------------------------
// 4. Session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnecting_keeps_one_listener_per_event() {
    let h = Harness::new(Duration::from_secs(3600));
    h.coordinator.bootstrap().await.unwrap();
    h.coordinator.bootstrap().await.unwrap();
    assert_eq!(h.wallet.listener_count(EventKind::AccountsChanged), 1);
    assert_eq!(h.wallet.listener_count(EventKind::ChainChanged), 1);

    h.coordinator.shutdown();
    assert_eq!(h.wallet.total_listeners(), 0);
}

#[tokio::test]
async fn dropping_the_coordinator_releases_listeners() {
    let h = Harness::new(Duration::from_secs(3600));
    h.coordinator.bootstrap().await.unwrap();
    assert_eq!(h.wallet.total_listeners(), 2);

    let Harness {
        wallet,
        coordinator,
        ..
    } = h;
    drop(coordinator);
    wait_for_condition(move || wallet.total_listeners() == 0).await;
}

#[tokio::test]
async fn revoked_access_clears_session_and_roles() {
    let h = Harness::new(Duration::from_secs(3600));
    h.coordinator.bootstrap().await.unwrap();
    assert!(h.coordinator.state().roles.is_admin);

    h.wallet.set_accounts(vec![]);
    let state = wait_until(&h.coordinator, |s| !s.session.is_connected()).await;
    assert!(state.session.account().is_none());
    assert!(!state.roles.is_admin);
}

#[tokio::test]
async fn network_change_hard_resets_and_rebinds() {
    let h = Harness::seeded().await;
    h.wallet.allow_switch(false);
    h.wallet.set_chain(ChainId::MAINNET);

    let state = wait_until(&h.coordinator, |s| {
        matches!(
            s.notice,
            Some(Notice::Error {
                kind: ErrorKind::NetworkMismatch,
                ..
            })
        )
    })
    .await;
    assert!(state.election.candidates.is_empty());
    assert!(!state.roles.is_admin);

    h.wallet.set_chain(ChainId::SEPOLIA);
    let state = wait_until(&h.coordinator, |s| {
        s.roles.is_admin && s.election.candidates.len() == 2
    })
    .await;
    assert_eq!(state.phase(), ElectionPhase::Active);
    assert_eq!(h.wallet.listener_count(EventKind::ChainChanged), 1);
}

#[tokio::test]
async fn polling_stops_on_close_and_on_shutdown() {
    let h = Harness::new(Duration::from_millis(20));
    h.coordinator.bootstrap().await.unwrap();
    h.coordinator.register_candidate("Alice").await.unwrap();
    wait_until(&h.coordinator, |s| s.election.live_tally.is_some()).await;

    h.coordinator.end_election().await.unwrap();
    assert!(!h.coordinator.machine().is_polling());
    h.ledger.clear_calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.ledger.count(LedgerMethod::GetVotes), 0);

    let h = Harness::new(Duration::from_millis(20));
    h.coordinator.bootstrap().await.unwrap();
    h.coordinator.shutdown();
    h.ledger.clear_calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.ledger.calls().is_empty());
}
