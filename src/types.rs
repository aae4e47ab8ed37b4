//! Ledger Data Model
//!
//! Blocks and transactions as the indexer sees them. Only the fields needed
//! for address matching and for handing transactions back to callers are kept.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::index::{IndexError, TxId};

/// Position of a block in the ledger
pub type Height = u64;

/// A fetched block with its transactions in canonical order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block height
    pub height: Height,
    /// Block hash with 0x prefix
    pub hash: String,
    /// Transactions in the order the ledger returned them
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(height: Height, hash: impl Into<String>, transactions: Vec<Transaction>) -> Self {
        Self {
            height,
            hash: hash.into(),
            transactions,
        }
    }
}

/// Transaction as stored in the index and returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Height of the containing block
    pub block_number: Height,
    /// Hash of the containing block
    pub block_hash: String,
    /// Transaction hash as reported by the ledger
    pub hash: String,
    /// Sender address
    pub from: String,
    /// Receiver address, None for contract creation
    pub to: Option<String>,
    /// Transferred value in the ledger's base unit
    pub value: U256,
}

impl Transaction {
    /// Canonical identity of this transaction
    pub fn id(&self) -> Result<TxId, IndexError> {
        TxId::parse(&self.hash)
    }

    /// Addresses this transaction touches: the sender, then the receiver if
    /// it differs from the sender.
    pub fn parties(&self) -> impl Iterator<Item = &str> + '_ {
        let receiver = self
            .to
            .as_deref()
            .filter(|to| *to != self.from.as_str());
        std::iter::once(self.from.as_str()).chain(receiver)
    }

    /// Whether the given address is the sender or the receiver
    pub fn touches(&self, address: &str) -> bool {
        self.parties().any(|party| party == address)
    }
}
