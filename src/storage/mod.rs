//! Storage Contracts
//!
//! The scanner and the facade only talk to storage through these traits, so
//! the in-memory reference backend and the Redis backend are interchangeable.
//! `Storage::commit_block` is the unit of work that appends every match of a
//! block and advances the cursor; durable backends must apply it atomically.

pub mod redis;

use async_trait::async_trait;
use thiserror::Error;

use crate::cursor::CursorStore;
use crate::index::{IndexError, TransactionIndex};
use crate::subscriptions::SubscriptionRegistry;
use crate::types::{Height, Transaction};

pub use self::redis::RedisStorage;

/// Errors reported by a storage backend
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Corrupt storage data: {0}")]
    Corrupt(String),
}

/// Persistence of the last processed height
#[async_trait]
pub trait CursorStorage: Send + Sync {
    async fn save(&self, height: Height) -> Result<(), StorageError>;

    /// Last saved height, 0 if nothing was saved yet
    async fn load(&self) -> Result<Height, StorageError>;
}

/// Persistence of watched addresses
#[async_trait]
pub trait SubscriptionStorage: Send + Sync {
    async fn add(&self, address: &str) -> Result<(), StorageError>;

    async fn exists(&self, address: &str) -> Result<bool, StorageError>;

    /// Membership of several addresses, answered in input order
    ///
    /// Remote backends should override this to answer in one round trip.
    async fn exists_many(&self, addresses: &[&str]) -> Result<Vec<bool>, StorageError> {
        let mut found = Vec::with_capacity(addresses.len());
        for address in addresses {
            found.push(self.exists(address).await?);
        }
        Ok(found)
    }
}

/// Persistence of per-address transaction buckets
#[async_trait]
pub trait TransactionStorage: Send + Sync {
    /// Append to a bucket, skipping transactions it already holds
    async fn append(&self, address: &str, transactions: &[Transaction]) -> Result<(), StorageError>;

    async fn get(&self, address: &str) -> Result<Vec<Transaction>, StorageError>;

    async fn delete(&self, address: &str) -> Result<(), StorageError>;

    /// Read and delete a bucket
    ///
    /// Backends that can do both in one step should override this so an
    /// append landing between the read and the delete is not lost.
    async fn take(&self, address: &str) -> Result<Vec<Transaction>, StorageError> {
        let transactions = self.get(address).await?;
        self.delete(address).await?;
        Ok(transactions)
    }
}

/// Everything the scanner and the facade need from a backend
#[async_trait]
pub trait Storage: CursorStorage + SubscriptionStorage + TransactionStorage {
    /// Append all matches of one block, then advance the cursor to it
    async fn commit_block(&self, commit: BlockCommit) -> Result<(), StorageError> {
        for (address, transactions) in &commit.matches {
            self.append(address, transactions).await?;
        }
        self.save(commit.height).await
    }
}

/// Matches found in one block, grouped by address in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockCommit {
    pub height: Height,
    pub matches: Vec<(String, Vec<Transaction>)>,
}

impl BlockCommit {
    pub fn new(height: Height) -> Self {
        Self {
            height,
            matches: Vec::new(),
        }
    }

    /// Record that a transaction matched an address
    pub fn push(&mut self, address: &str, transaction: &Transaction) {
        match self.matches.iter_mut().find(|(a, _)| a == address) {
            Some((_, transactions)) => transactions.push(transaction.clone()),
            None => self
                .matches
                .push((address.to_string(), vec![transaction.clone()])),
        }
    }

    /// Number of (address, transaction) matches
    pub fn matched(&self) -> usize {
        self.matches.iter().map(|(_, txs)| txs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// In-memory reference backend
///
/// `commit_block` is the default pass-through: nothing here is durable, so
/// there is nothing to roll back.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    cursor: CursorStore,
    subscriptions: SubscriptionRegistry,
    index: TransactionIndex,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> &CursorStore {
        &self.cursor
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn index(&self) -> &TransactionIndex {
        &self.index
    }
}

#[async_trait]
impl CursorStorage for MemoryStorage {
    async fn save(&self, height: Height) -> Result<(), StorageError> {
        self.cursor.set(height);
        Ok(())
    }

    async fn load(&self) -> Result<Height, StorageError> {
        Ok(self.cursor.get())
    }
}

#[async_trait]
impl SubscriptionStorage for MemoryStorage {
    async fn add(&self, address: &str) -> Result<(), StorageError> {
        self.subscriptions.subscribe(address);
        Ok(())
    }

    async fn exists(&self, address: &str) -> Result<bool, StorageError> {
        Ok(self.subscriptions.is_subscribed(address))
    }
}

#[async_trait]
impl TransactionStorage for MemoryStorage {
    async fn append(&self, address: &str, transactions: &[Transaction]) -> Result<(), StorageError> {
        Ok(self.index.append(address, transactions)?)
    }

    async fn get(&self, address: &str) -> Result<Vec<Transaction>, StorageError> {
        Ok(self.index.get(address))
    }

    async fn delete(&self, address: &str) -> Result<(), StorageError> {
        self.index.drain(address);
        Ok(())
    }

    async fn take(&self, address: &str) -> Result<Vec<Transaction>, StorageError> {
        Ok(self.index.take(address))
    }
}

impl Storage for MemoryStorage {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use std::sync::Mutex;

    fn tx(hash: &str, from: &str, to: &str) -> Transaction {
        Transaction {
            block_number: 3,
            block_hash: "0x03".to_string(),
            hash: hash.to_string(),
            from: from.to_string(),
            to: Some(to.to_string()),
            value: U256::from(1u64),
        }
    }

    // ==================== BlockCommit tests ====================

    #[test]
    fn test_block_commit_groups_by_address_in_first_seen_order() {
        let mut commit = BlockCommit::new(3);
        commit.push("0x123", &tx("0xabc30", "0x456", "0x123"));
        commit.push("0x321", &tx("0xabc31", "0x321", "0x1337"));
        commit.push("0x123", &tx("0xabc32", "0x123", "0x678"));

        assert_eq!(commit.matched(), 3);
        let addresses: Vec<&str> = commit.matches.iter().map(|(a, _)| a.as_str()).collect();
        assert_eq!(addresses, vec!["0x123", "0x321"]);
        let first: Vec<&str> = commit.matches[0].1.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(first, vec!["0xabc30", "0xabc32"]);
    }

    #[test]
    fn test_block_commit_empty() {
        let commit = BlockCommit::new(9);
        assert!(commit.is_empty());
        assert_eq!(commit.matched(), 0);
    }

    // ==================== MemoryStorage tests ====================

    #[tokio::test]
    async fn test_memory_cursor_defaults_to_zero() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.load().await.unwrap(), 0);
        storage.save(12).await.unwrap();
        assert_eq!(storage.load().await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_memory_subscriptions() {
        let storage = MemoryStorage::new();
        assert!(!storage.exists("0x123").await.unwrap());
        storage.add("0x123").await.unwrap();
        storage.add("0x123").await.unwrap();
        assert!(storage.exists("0x123").await.unwrap());
        assert_eq!(storage.subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn test_exists_many_keeps_input_order() {
        let storage = MemoryStorage::new();
        storage.add("0x123").await.unwrap();
        storage.add("0x1337").await.unwrap();

        let found = storage
            .exists_many(&["0x321", "0x123", "0x456", "0x1337"])
            .await
            .unwrap();
        assert_eq!(found, vec![false, true, false, true]);
        assert!(storage.exists_many(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_commit_block_appends_then_advances() {
        let storage = MemoryStorage::new();
        let mut commit = BlockCommit::new(3);
        commit.push("0x123", &tx("0xabc30", "0x456", "0x123"));
        commit.push("0x123", &tx("0xabc32", "0x123", "0x678"));

        storage.commit_block(commit).await.unwrap();

        assert_eq!(storage.load().await.unwrap(), 3);
        assert_eq!(storage.index().bucket_len("0x123"), 2);
    }

    #[tokio::test]
    async fn test_memory_commit_block_with_bad_hash_keeps_cursor() {
        let storage = MemoryStorage::new();
        storage.save(2).await.unwrap();

        let mut commit = BlockCommit::new(3);
        commit.push("0x123", &tx("bogus", "0x456", "0x123"));

        let result = storage.commit_block(commit).await;
        assert!(matches!(result, Err(StorageError::Index(IndexError::InvalidHash(_)))));
        assert_eq!(storage.load().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_memory_take_drains() {
        let storage = MemoryStorage::new();
        storage.append("0x123", &[tx("0xabc20", "0x123", "0x321")]).await.unwrap();

        assert_eq!(storage.take("0x123").await.unwrap().len(), 1);
        assert!(storage.take("0x123").await.unwrap().is_empty());
    }

    /// Backend relying on the default `take`
    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<&'static str>>,
        index: TransactionIndex,
    }

    #[async_trait]
    impl TransactionStorage for RecordingStore {
        async fn append(&self, address: &str, transactions: &[Transaction]) -> Result<(), StorageError> {
            self.calls.lock().unwrap().push("append");
            Ok(self.index.append(address, transactions)?)
        }

        async fn get(&self, address: &str) -> Result<Vec<Transaction>, StorageError> {
            self.calls.lock().unwrap().push("get");
            Ok(self.index.get(address))
        }

        async fn delete(&self, address: &str) -> Result<(), StorageError> {
            self.calls.lock().unwrap().push("delete");
            self.index.drain(address);
            Ok(())
        }
    }

    #[test]
    fn test_default_take_reads_then_deletes() {
        let store = RecordingStore::default();
        tokio_test::block_on(async {
            store.append("0x123", &[tx("0xabc20", "0x123", "0x321")]).await.unwrap();
            let taken = store.take("0x123").await.unwrap();
            assert_eq!(taken.len(), 1);
        });

        assert_eq!(*store.calls.lock().unwrap(), vec!["append", "get", "delete"]);
        assert!(store.index.get("0x123").is_empty());
    }
}
