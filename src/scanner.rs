//! Scan Loop
//!
//! Background task that follows the ledger head. Each tick fetches every
//! block between the cursor and the head in ascending order, matches sender
//! and receiver against the subscriptions and commits the matches together
//! with the new cursor. A failed tick leaves the cursor at the last committed
//! block and the next tick resumes from there.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::ledger::{LedgerClient, LedgerError};
use crate::storage::{BlockCommit, Storage, StorageError};
use crate::types::{Block, Height};

/// Default period between ticks
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default bound on a single ledger call
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10000;

/// Where scanning starts when the loop comes up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartPolicy {
    /// Skip history and start from the current head
    #[default]
    Head,
    /// Keep a non-zero stored cursor, otherwise start from the head
    Resume,
    /// Start from the given height
    Height(Height),
}

/// Configuration for the scan loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub start: StartPolicy,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            start: StartPolicy::default(),
        }
    }
}

impl ScannerConfig {
    /// Create a config polling at the given period
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..Default::default()
        }
    }
}

/// Errors that abort a tick
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Asked for block {expected} but the ledger returned block {got}")]
    UnexpectedBlock { expected: Height, got: Height },
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Number of blocks committed
    pub blocks: u64,
    /// Number of (address, transaction) matches committed
    pub matched: usize,
    /// Cursor after the tick
    pub cursor: Height,
}

/// Scan loop over a ledger and a storage backend
pub struct Scanner<L: ?Sized, S: ?Sized> {
    ledger: Arc<L>,
    storage: Arc<S>,
    config: ScannerConfig,
    seeded: bool,
    stop: Option<watch::Receiver<bool>>,
}

impl<L, S> Scanner<L, S>
where
    L: LedgerClient + ?Sized,
    S: Storage + ?Sized,
{
    pub fn new(ledger: Arc<L>, storage: Arc<S>, config: ScannerConfig) -> Self {
        Self {
            ledger,
            storage,
            config,
            seeded: false,
            stop: None,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Set the starting cursor according to the start policy
    pub async fn seed(&mut self) -> Result<Height, ScanError> {
        let height = match self.config.start {
            StartPolicy::Head => self.head().await?,
            StartPolicy::Resume => match self.storage.load().await? {
                0 => self.head().await?,
                saved => saved,
            },
            StartPolicy::Height(height) => height,
        };

        self.storage.save(height).await?;
        self.seeded = true;
        info!("Scanner seeded at block {} ({:?})", height, self.config.start);
        Ok(height)
    }

    /// Scan every block between the cursor and the current head
    pub async fn tick(&mut self) -> Result<TickReport, ScanError> {
        if !self.seeded {
            self.seed().await?;
        }

        let head = self.head().await?;
        let cursor = self.storage.load().await?;
        let mut report = TickReport {
            cursor,
            ..Default::default()
        };

        if head <= cursor {
            return Ok(report);
        }

        for height in cursor + 1..=head {
            if self.stop_requested() {
                debug!("Stop requested, leaving tick at block {}", report.cursor);
                break;
            }
            report.matched += self.process_block(height).await?;
            report.blocks += 1;
            report.cursor = height;
        }

        Ok(report)
    }

    /// Fetch one block, match it and commit the matches with the cursor
    pub async fn process_block(&self, height: Height) -> Result<usize, ScanError> {
        let block = self.bounded(self.ledger.block_at(height)).await?;
        if block.height != height {
            return Err(ScanError::UnexpectedBlock {
                expected: height,
                got: block.height,
            });
        }

        let subscribed = self.subscribed_parties(&block).await?;
        let mut commit = BlockCommit::new(height);
        for tx in &block.transactions {
            for party in tx.parties() {
                if subscribed.contains(party) {
                    commit.push(party, tx);
                }
            }
        }

        let matched = commit.matched();
        self.storage.commit_block(commit).await?;
        debug!(
            "Committed block {} ({} transaction(s), {} match(es))",
            height,
            block.transactions.len(),
            matched
        );
        Ok(matched)
    }

    /// Addresses in the block that are subscribed, looked up in one batch
    async fn subscribed_parties<'a>(
        &self,
        block: &'a Block,
    ) -> Result<HashSet<&'a str>, StorageError> {
        let mut seen = HashSet::new();
        let parties: Vec<&str> = block
            .transactions
            .iter()
            .flat_map(|tx| tx.parties())
            .filter(|party| seen.insert(*party))
            .collect();
        if parties.is_empty() {
            return Ok(HashSet::new());
        }

        let found = self.storage.exists_many(&parties).await?;
        if found.len() != parties.len() {
            return Err(StorageError::Corrupt(format!(
                "membership check returned {} answers for {} addresses",
                found.len(),
                parties.len()
            )));
        }
        Ok(parties
            .into_iter()
            .zip(found)
            .filter_map(|(party, subscribed)| subscribed.then_some(party))
            .collect())
    }

    async fn head(&self) -> Result<Height, LedgerError> {
        self.bounded(self.ledger.current_height()).await
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        match timeout(self.config.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(millis(self.config.request_timeout))),
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|stop| *stop.borrow())
    }

    /// Tick until the stop signal is raised or its sender is dropped
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(
            "Scanner started (poll interval {:?}, request timeout {:?})",
            self.config.poll_interval, self.config.request_timeout
        );
        self.stop = Some(stop.clone());

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) if report.blocks > 0 => info!(
                            "Scanned {} block(s) up to {}, {} match(es)",
                            report.blocks, report.cursor, report.matched
                        ),
                        Ok(_) => {}
                        Err(e) if !self.seeded => warn!("Failed to seed scanner, retrying next tick: {}", e),
                        Err(e) => error!("Scan tick failed: {}", e),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Scanner stopped");
    }
}

impl<L, S> Scanner<L, S>
where
    L: LedgerClient + ?Sized + 'static,
    S: Storage + ?Sized + 'static,
{
    /// Run the loop on a background task
    pub fn spawn(self) -> ScannerHandle {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        ScannerHandle { stop, task }
    }
}

/// Whole milliseconds in a duration, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Owner side of a running scan loop
pub struct ScannerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ScannerHandle {
    /// Raise the stop signal without waiting
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Raise the stop signal and wait for the loop to exit
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.stop();
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
