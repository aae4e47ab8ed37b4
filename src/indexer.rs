//! Index Facade
//!
//! Caller-facing surface of the indexer. None of these calls fail: storage
//! errors are logged and a safe default is returned instead.

use std::sync::Arc;

use tracing::{error, warn};

use crate::ledger::LedgerClient;
use crate::scanner::{Scanner, ScannerConfig, ScannerHandle};
use crate::storage::Storage;
use crate::types::{Height, Transaction};

/// Facade over a storage backend shared with the scan loop
pub struct Indexer<S: ?Sized> {
    storage: Arc<S>,
}

impl<S: ?Sized> Clone for Indexer<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
        }
    }
}

impl<S: Storage + ?Sized> Indexer<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Last fully processed block height, 0 before the scanner has seeded
    pub async fn current_block(&self) -> Height {
        match self.storage.load().await {
            Ok(height) => height,
            Err(e) => {
                error!("Failed to read cursor: {}", e);
                0
            }
        }
    }

    /// Start watching an address. Returns false only if storage failed.
    pub async fn subscribe(&self, address: &str) -> bool {
        match self.storage.add(address).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to subscribe {}: {}", address, e);
                false
            }
        }
    }

    /// Hand over and clear everything collected for an address
    ///
    /// A second call returns only what was indexed in between. Unknown and
    /// unsubscribed addresses yield an empty list.
    pub async fn transactions(&self, address: &str) -> Vec<Transaction> {
        match self.storage.take(address).await {
            Ok(transactions) => transactions,
            Err(e) => {
                error!("Failed to read transactions for {}: {}", address, e);
                Vec::new()
            }
        }
    }

    /// Build a scan loop writing into this facade's storage
    pub fn scanner<L: LedgerClient + ?Sized>(&self, ledger: Arc<L>, config: ScannerConfig) -> Scanner<L, S> {
        Scanner::new(ledger, self.storage.clone(), config)
    }
}

impl<S: Storage + ?Sized + 'static> Indexer<S> {
    /// Spawn a scan loop writing into this facade's storage
    pub fn start<L: LedgerClient + ?Sized + 'static>(
        &self,
        ledger: Arc<L>,
        config: ScannerConfig,
    ) -> ScannerHandle {
        self.scanner(ledger, config).spawn()
    }
}
