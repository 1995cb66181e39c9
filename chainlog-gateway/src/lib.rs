pub mod cli;
pub mod config;
pub mod error;
pub mod storage;

use anyhow::Result;
use chainlog_connector::{
    client::TransactionSubmitter,
    storage::EventStore,
    workers::{LedgerClients, SyncManager, SyncManagerHandle},
    SyncKey,
};
use clap::Parser;
use cli::{Cli, Commands, ConfigArgs, EventsCmd, SubmitCmd, SyncCmd};
use config::{load_config, GatewayConfig};
use error::GatewayError;
use serde::Serialize;
use std::sync::Arc;
use storage::SledStorage;
use tokio::signal;

/// The main entry point for running the gateway application logic.
/// This function handles CLI parsing, configuration, logging and dispatch.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config_from_cli(cli.command.config_args())?;
    chainlog_logger::init(&config.gateway.log)?;
    tracing::debug!("Configuration loaded: {:#?}", &config);

    match cli.command {
        Commands::Run(_) => run_scheduler(config).await,
        Commands::Sync(cmd) => sync_once(&config, cmd).await,
        Commands::Submit(cmd) => submit(&config, cmd).await,
        Commands::Events(cmd) => print_events(&config, cmd).await,
        Commands::Health(_) => health(&config).await,
    }
}

/// Loads the gateway configuration based on the provided CLI arguments.
fn load_config_from_cli(args: &ConfigArgs) -> Result<GatewayConfig> {
    if let Some(config_path) = &args.config {
        eprintln!("Loading configuration from '{}'", config_path);
        load_config(config_path)
    } else {
        eprintln!("No config file provided, using default settings.");
        Ok(GatewayConfig::default())
    }
}

/// Builds the sync manager on top of a sled database, which also provides the leases.
pub fn build_manager(
    config: &GatewayConfig,
    storage: Arc<SledStorage>,
) -> Result<(SyncManager, SyncManagerHandle)> {
    let ledgers = LedgerClients::from_config(&config.connector).map_err(GatewayError::from)?;
    Ok(SyncManager::new(
        Arc::new(config.connector.clone()),
        Arc::new(ledgers),
        storage.clone(),
        storage,
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Runs the scheduler and handles graceful shutdown.
async fn run_scheduler(config: GatewayConfig) -> Result<()> {
    let storage = Arc::new(SledStorage::open(&config.gateway.db_path)?);
    let (manager, handle) = build_manager(&config, storage)?;
    let scheduler = tokio::spawn(manager.run());

    match signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
            handle.stop();
            scheduler.await?;
            tracing::info!("Shutdown complete.");
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to listen for shutdown signal.");
        }
    }
    Ok(())
}

async fn sync_once(config: &GatewayConfig, cmd: SyncCmd) -> Result<()> {
    let storage = Arc::new(SledStorage::open(&config.gateway.db_path)?);
    let (_manager, handle) = build_manager(config, storage)?;

    let report = handle
        .synchronize(&cmd.ledger, &cmd.source, cmd.step_size)
        .await
        .map_err(GatewayError::from)?;
    print_json(&report)
}

async fn submit(config: &GatewayConfig, cmd: SubmitCmd) -> Result<()> {
    let raw_tx = hex::decode(cmd.raw_tx.trim_start_matches("0x")).map_err(GatewayError::from)?;
    if raw_tx.is_empty() {
        return Err(GatewayError::InvalidArgument("Raw transaction is empty".to_string()).into());
    }

    let ledgers = LedgerClients::from_config(&config.connector).map_err(GatewayError::from)?;
    let submitter = TransactionSubmitter::new(Arc::new(ledgers), config.connector.confirmation.clone());
    let submission = submitter
        .submit_and_wait(&cmd.ledger, &raw_tx)
        .await
        .map_err(GatewayError::from)?;
    print_json(&submission)
}

async fn print_events(config: &GatewayConfig, cmd: EventsCmd) -> Result<()> {
    if cmd.from_block > cmd.to_block {
        return Err(GatewayError::InvalidArgument(format!(
            "from-block {} is past to-block {}",
            cmd.from_block, cmd.to_block
        ))
        .into());
    }

    let storage = SledStorage::open(&config.gateway.db_path)?;
    let key = SyncKey::new(cmd.ledger, cmd.source);
    for record in storage.events(&key, cmd.from_block, cmd.to_block).await? {
        print_json(&record)?;
    }
    Ok(())
}

/// Prints the head of every configured ledger. Fails if any ledger is unreachable.
async fn health(config: &GatewayConfig) -> Result<()> {
    let ledgers = LedgerClients::from_config(&config.connector).map_err(GatewayError::from)?;

    let mut ledger_ids: Vec<&str> = ledgers.ledger_ids().collect();
    ledger_ids.sort_unstable();

    let mut unreachable = 0;
    for ledger_id in ledger_ids {
        let Some(rpc) = ledgers.get(ledger_id) else {
            continue;
        };
        match rpc.block_number().await {
            Ok(head) => print_json(&serde_json::json!({ "ledger": ledger_id, "head": head }))?,
            Err(e) => {
                tracing::warn!(ledger = ledger_id, "Ledger unreachable: {}", e);
                unreachable += 1;
                print_json(&serde_json::json!({ "ledger": ledger_id, "error": e.to_string() }))?;
            }
        }
    }

    if unreachable > 0 {
        anyhow::bail!("{} ledger(s) unreachable", unreachable);
    }
    Ok(())
}
