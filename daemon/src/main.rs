//! tally: operator entry point for the election coordinator.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tally_election::{
    Capabilities, Coordinator, CoordinatorSettings, CoordinatorState, ElectionConfig,
    ElectionSnapshot, JWT_ENV,
};
use tally_ledger::HttpLedger;
use tally_publish::{PinataClient, PublishError, Publisher};
use tally_session::{HttpWalletProvider, WalletProvider};
use tally_types::{Address, ChainId, SystemClock};
use tally_utils::LogFormat;

#[derive(Parser)]
#[command(name = "tally", about = "Run and inspect an on-chain election")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Network the election contract lives on (decimal or 0x-hex chain id).
    #[arg(long, env = "TALLY_CHAIN_ID")]
    chain_id: Option<String>,

    /// Address of the election contract.
    #[arg(long, env = "TALLY_CONTRACT")]
    contract: Option<String>,

    /// JSON interface description of the election contract.
    #[arg(long, env = "TALLY_CONTRACT_ABI")]
    contract_abi: Option<PathBuf>,

    /// Contract gateway endpoint.
    #[arg(long, env = "TALLY_GATEWAY_URL")]
    gateway_url: Option<String>,

    /// Wallet bridge endpoint. Without one, only read commands work.
    #[arg(long, env = "TALLY_WALLET_URL")]
    wallet_url: Option<String>,

    /// Pinning service JWT.
    #[arg(long, env = JWT_ENV, hide_env_values = true)]
    pinata_jwt: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "TALLY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "TALLY_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Show the election, the connected account and its roles.
    Status,
    /// Register a candidate (admin only).
    RegisterCandidate { name: String },
    /// Register a voter address (admin only).
    RegisterVoter { address: String },
    /// Cast the connected account's vote.
    Vote { candidate: String },
    /// Close the election and publish the final tally (admin only).
    /// Resumes from wherever an earlier attempt stopped.
    Close,
    /// Retrieve and print the published results.
    Results,
    /// Upload and read back a probe document.
    IpfsTest,
    /// Print every state change until Ctrl-C.
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    tally_utils::init_logging(config.log_format, &config.log_level);
    config.validate().context("invalid configuration")?;

    let coordinator = build_coordinator(&config)?;
    let result = run(cli.command, &coordinator).await;
    coordinator.shutdown();
    result
}

/// File settings first, then CLI flags and environment on top.
fn load_config(cli: &Cli) -> anyhow::Result<ElectionConfig> {
    let mut config = match &cli.config {
        Some(path) => ElectionConfig::from_toml_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ElectionConfig::default(),
    };

    if let Some(raw) = &cli.chain_id {
        config.chain_id = ChainId::parse(raw)?;
    }
    if let Some(raw) = &cli.contract {
        config.contract_address = Some(Address::parse(raw)?);
    }
    if let Some(path) = &cli.contract_abi {
        config.contract_abi = Some(path.clone());
    }
    if let Some(url) = &cli.gateway_url {
        config.gateway_url = url.clone();
    }
    if let Some(url) = &cli.wallet_url {
        config.wallet_url = Some(url.clone());
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    config.apply_credential(cli.pinata_jwt.clone());
    Ok(config)
}

fn build_coordinator(config: &ElectionConfig) -> anyhow::Result<Arc<Coordinator>> {
    let ledger = HttpLedger::new(
        config.gateway_url.clone(),
        config.contract()?.clone(),
        config.receipt_poll_interval(),
    )?;

    let wallet: Option<Arc<dyn WalletProvider>> = match &config.wallet_url {
        Some(url) => Some(Arc::new(HttpWalletProvider::new(
            url.clone(),
            config.receipt_poll_interval(),
        )?)),
        None => None,
    };

    let publisher: Option<Arc<dyn Publisher>> = match PinataClient::new(&config.publication) {
        Ok(client) => Some(Arc::new(client)),
        Err(PublishError::MissingCredential) => {
            tracing::warn!("no publication credential configured, closing is disabled");
            None
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(
        chain = %config.chain_id,
        contract = %ledger.contract(),
        gateway = %ledger.gateway_url(),
        wallet = wallet.is_some(),
        publisher = publisher.is_some(),
        "capabilities configured"
    );

    Ok(Coordinator::new(
        Capabilities {
            wallet,
            ledger: Arc::new(ledger),
            publisher,
            clock: Arc::new(SystemClock),
        },
        CoordinatorSettings::from_config(config),
    ))
}

async fn run(command: Command, coordinator: &Arc<Coordinator>) -> anyhow::Result<()> {
    match command {
        Command::Status => {
            if coordinator.session_manager().has_provider() {
                coordinator.bootstrap().await?;
                print_state(&coordinator.state());
            } else {
                print_election(&coordinator.load().await?);
            }
        }
        Command::RegisterCandidate { name } => {
            coordinator.bootstrap().await?;
            let receipt = coordinator.register_candidate(&name).await?;
            report(coordinator, &receipt.tx_hash.to_string());
        }
        Command::RegisterVoter { address } => {
            coordinator.bootstrap().await?;
            let receipt = coordinator.register_voter(&address).await?;
            report(coordinator, &receipt.tx_hash.to_string());
        }
        Command::Vote { candidate } => {
            coordinator.bootstrap().await?;
            let receipt = coordinator.vote(&candidate).await?;
            report(coordinator, &receipt.tx_hash.to_string());
        }
        Command::Close => {
            coordinator.bootstrap().await?;
            let outcome = coordinator.end_election().await?;
            report(coordinator, &outcome.content_hash);
            for (name, votes) in outcome.final_tally.entries() {
                println!("  {name}: {votes}");
            }
            if !outcome.committed {
                println!("results were already stored on-chain");
            }
        }
        Command::Results => {
            coordinator.load().await?;
            let published = coordinator.results().await?;
            println!("content hash: {}", published.content_hash);
            if let Some(url) = &published.gateway_url {
                println!("gateway:      {url}");
            }
            println!("ended at:     {}", published.document.end_time.to_rfc3339());
            for (name, votes) in published.document.pairs() {
                println!("  {name}: {votes}");
            }
        }
        Command::IpfsTest => {
            let hash = coordinator.test_publication().await?;
            println!("publication OK, probe stored as {hash}");
        }
        Command::Watch => watch(coordinator).await?,
    }
    Ok(())
}

async fn watch(coordinator: &Arc<Coordinator>) -> anyhow::Result<()> {
    if !coordinator.session_manager().has_provider() {
        // Read-only: follow the election without an account.
        coordinator.load().await?;
        coordinator.machine().start_polling();
        let mut rx = coordinator.machine().subscribe();
        print_election(&rx.borrow_and_update());
        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    print_election(&rx.borrow_and_update());
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        tracing::info!("Shutdown signal received, stopping watch");
        return Ok(());
    }

    coordinator.bootstrap().await?;
    let mut rx = coordinator.subscribe();
    print_state(&rx.borrow_and_update());
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                print_state(&rx.borrow_and_update());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    tracing::info!("Shutdown signal received, stopping watch");
    Ok(())
}

fn report(coordinator: &Coordinator, detail: &str) {
    match coordinator.state().notice {
        Some(notice) => println!("{} ({detail})", notice.message()),
        None => println!("{detail}"),
    }
}

fn print_state(state: &CoordinatorState) {
    match state.session.account() {
        Some(account) => println!(
            "account:  {account} on {}",
            state
                .session
                .chain_id()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown network".into())
        ),
        None => println!("account:  not connected"),
    }
    println!(
        "roles:    admin={} registered={} voted={}",
        state.roles.is_admin, state.roles.is_registered_voter, state.roles.has_voted
    );
    if let Some(notice) = &state.notice {
        println!("notice:   {}", notice.message());
    }
    print_election(&state.election);
}

fn print_election(election: &ElectionSnapshot) {
    println!("phase:    {:?}", election.phase.observable());
    let tally = election
        .final_tally
        .as_ref()
        .or(election.live_tally.as_ref());
    for name in &election.candidates {
        match tally.and_then(|t| t.votes_for(name.as_str())) {
            Some(votes) => println!("  {name}: {votes}"),
            None => println!("  {name}"),
        }
    }
    if let Some(hash) = election.publication.content_hash() {
        println!("results:  {hash}");
    }
}
