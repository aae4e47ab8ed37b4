//! Ledger Client
//!
//! Read-only access to the remote chain. The scanner only needs the current
//! head and the contents of a block at a given height.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Block, Height};

/// Errors that can occur while talking to the ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Max connection attempts ({0}) exceeded")]
    MaxConnectAttemptsExceeded(u32),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Block {0} not found")]
    BlockNotFound(Height),

    #[error("Malformed ledger response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Height of the newest block
    async fn current_height(&self) -> Result<Height, LedgerError>;

    /// Block at the given height with its transactions in canonical order
    async fn block_at(&self, height: Height) -> Result<Block, LedgerError>;
}

#[async_trait]
impl<L: LedgerClient + ?Sized> LedgerClient for Arc<L> {
    async fn current_height(&self) -> Result<Height, LedgerError> {
        (**self).current_height().await
    }

    async fn block_at(&self, height: Height) -> Result<Block, LedgerError> {
        (**self).block_at(height).await
    }
}
