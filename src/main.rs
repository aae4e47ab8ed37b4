//! TxnScope Indexer Daemon
//!
//! Scans the configured node, subscribes the addresses listed in
//! `TXNSCOPE_WATCH` and periodically prints their drained transactions to
//! stdout as JSON lines. Stops on Ctrl-C.

use std::process;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use txnscope_indexer::{
    IndexerConfig, Indexer, LedgerError, MemoryStorage, RedisStorage, RpcLedgerClient, Storage,
    StorageError, Transaction,
};

#[derive(Error, Debug)]
enum DaemonError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// One drained transaction as printed to stdout
#[derive(Serialize)]
struct DrainedTransaction<'a> {
    address: &'a str,
    transaction: &'a Transaction,
}

#[tokio::main]
async fn main() {
    let config = match IndexerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(config).await {
        error!("Indexer failed: {}", e);
        process::exit(1);
    }
}

async fn run(config: IndexerConfig) -> Result<(), DaemonError> {
    let ledger = Arc::new(RpcLedgerClient::connect(&config.rpc).await?);
    info!("Using ledger at {}", ledger.endpoint());

    match &config.redis_url {
        Some(url) => {
            let storage = RedisStorage::connect(url, config.redis_prefix.clone()).await?;
            serve(&config, ledger, Arc::new(storage)).await
        }
        None => {
            info!("No Redis URL configured, keeping the index in memory");
            serve(&config, ledger, Arc::new(MemoryStorage::new())).await
        }
    }
}

async fn serve<S: Storage + 'static>(
    config: &IndexerConfig,
    ledger: Arc<RpcLedgerClient>,
    storage: Arc<S>,
) -> Result<(), DaemonError> {
    let indexer = Indexer::new(storage);
    for address in &config.watch {
        if indexer.subscribe(address).await {
            info!("Watching {}", address);
        }
    }
    if config.watch.is_empty() {
        warn!("TXNSCOPE_WATCH is empty, nothing will be printed");
    }

    let handle = indexer.start(ledger, config.scanner.clone());

    let mut drain = interval(config.drain_interval);
    drain.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = drain.tick() => {
                debug!("Cursor at block {}", indexer.current_block().await);
                drain_watched(&indexer, &config.watch).await;
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down");
    if let Err(e) = handle.shutdown().await {
        error!("Scanner task failed: {}", e);
    }
    drain_watched(&indexer, &config.watch).await;
    Ok(())
}

async fn drain_watched<S: Storage + ?Sized>(indexer: &Indexer<S>, watch: &[String]) {
    for address in watch {
        for transaction in indexer.transactions(address).await {
            let line = DrainedTransaction {
                address,
                transaction: &transaction,
            };
            match serde_json::to_string(&line) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Failed to serialize transaction {}: {}", transaction.hash, e),
            }
        }
    }
}
