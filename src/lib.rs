//! TxnScope Indexer Library
//!
//! This crate incrementally scans an Ethereum-style ledger, records the
//! transactions touching a growing set of watched addresses and hands them
//! back to callers on demand.

pub mod config;
pub mod cursor;
pub mod index;
pub mod indexer;
pub mod ledger;
pub mod rpc;
pub mod scanner;
pub mod storage;
pub mod subscriptions;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigError, IndexerConfig};
pub use cursor::CursorStore;
pub use index::{IndexError, TransactionIndex, TxId};
pub use indexer::Indexer;
pub use ledger::{LedgerClient, LedgerError};
pub use rpc::{RpcConfig, RpcLedgerClient};
pub use scanner::{ScanError, Scanner, ScannerConfig, ScannerHandle, StartPolicy, TickReport};
pub use storage::{BlockCommit, MemoryStorage, RedisStorage, Storage, StorageError};
pub use subscriptions::SubscriptionRegistry;
pub use types::{Block, Height, Transaction};
