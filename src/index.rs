//! Transaction Index
//!
//! Maps watched addresses to the ordered bucket of transactions where the
//! address appears as sender or receiver. Buckets live in a sharded map so
//! appends for different addresses proceed in parallel while appends for the
//! same address serialize on that address's entry.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

use alloy::primitives::{B256, U256};
use dashmap::DashMap;
use thiserror::Error;

use crate::types::Transaction;

/// Errors that can occur while indexing transactions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("Invalid transaction hash: {0}")]
    InvalidHash(String),
}

/// Canonical transaction identity
///
/// Hashes are compared by numeric value in a fixed 32-byte big-endian form,
/// so `0xABC`, `0xabc` and `0x0abc` all name the same transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(B256);

impl TxId {
    /// Parse a `0x`-prefixed hex hash
    pub fn parse(hash: &str) -> Result<Self, IndexError> {
        let invalid = || IndexError::InvalidHash(hash.to_string());

        let digits = hash
            .strip_prefix("0x")
            .or_else(|| hash.strip_prefix("0X"))
            .ok_or_else(invalid)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        // Fails only when the value does not fit in 256 bits
        let value = U256::from_str_radix(digits, 16).map_err(|_| invalid())?;
        Ok(Self(B256::from(value.to_be_bytes::<32>())))
    }

    /// The fixed-width hash
    pub fn hash(&self) -> B256 {
        self.0
    }
}

impl From<B256> for TxId {
    fn from(hash: B256) -> Self {
        Self(hash)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[derive(Debug, Default)]
struct Bucket {
    ids: HashSet<TxId>,
    entries: Vec<(TxId, Arc<Transaction>)>,
}

/// Concurrent address → transactions index
#[derive(Debug, Default)]
pub struct TransactionIndex {
    buckets: DashMap<String, Bucket>,
    // Shared by every bucket holding the transaction; dead entries are
    // pruned when the last bucket referencing them is drained.
    transactions: DashMap<TxId, Weak<Transaction>>,
}

impl TransactionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append transactions to an address's bucket
    ///
    /// Transactions already in the bucket are skipped. If any hash is invalid
    /// nothing is written.
    pub fn append(&self, address: &str, transactions: &[Transaction]) -> Result<(), IndexError> {
        let ids = transactions
            .iter()
            .map(Transaction::id)
            .collect::<Result<Vec<_>, _>>()?;
        if ids.is_empty() {
            return Ok(());
        }

        let mut bucket = self.buckets.entry(address.to_string()).or_default();
        for (id, tx) in ids.into_iter().zip(transactions) {
            if !bucket.ids.insert(id) {
                continue;
            }
            let shared = self.intern(id, tx);
            bucket.entries.push((id, shared));
        }

        Ok(())
    }

    /// Current bucket contents in append order
    pub fn get(&self, address: &str) -> Vec<Transaction> {
        self.buckets
            .get(address)
            .map(|bucket| {
                bucket
                    .entries
                    .iter()
                    .map(|(_, tx)| Transaction::clone(tx))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove an address's bucket
    pub fn drain(&self, address: &str) {
        self.take(address);
    }

    /// Remove an address's bucket and return what it held
    pub fn take(&self, address: &str) -> Vec<Transaction> {
        let Some((_, bucket)) = self.buckets.remove(address) else {
            return Vec::new();
        };

        let (ids, transactions): (Vec<TxId>, Vec<Transaction>) = bucket
            .entries
            .into_iter()
            .map(|(id, tx)| (id, Arc::unwrap_or_clone(tx)))
            .unzip();

        for id in ids {
            self.transactions
                .remove_if(&id, |_, tx| tx.strong_count() == 0);
        }

        transactions
    }

    /// Look up a transaction held by any bucket
    pub fn lookup(&self, id: &TxId) -> Option<Transaction> {
        self.transactions
            .get(id)
            .and_then(|tx| tx.upgrade())
            .map(Arc::unwrap_or_clone)
    }

    /// Number of transactions in an address's bucket
    pub fn bucket_len(&self, address: &str) -> usize {
        self.buckets
            .get(address)
            .map(|bucket| bucket.entries.len())
            .unwrap_or(0)
    }

    /// Number of distinct transactions held across all buckets
    pub fn transaction_count(&self) -> usize {
        self.transactions
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    fn intern(&self, id: TxId, tx: &Transaction) -> Arc<Transaction> {
        let mut slot = self.transactions.entry(id).or_default();
        if let Some(existing) = slot.upgrade() {
            return existing;
        }
        let shared = Arc::new(tx.clone());
        *slot = Arc::downgrade(&shared);
        shared
    }
}
