//! JSON-RPC Ledger Client
//!
//! Connects to an Ethereum-style node over HTTP, WebSocket or IPC and serves
//! the ledger capability the scanner needs. Block responses are decoded into
//! a strict schema: a missing or malformed field is an error, never a default.

use std::path::Path;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256, U64};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::transports::BoxTransport;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::ledger::{LedgerClient, LedgerError};
use crate::types::{Block, Height, Transaction};

/// Default node endpoint
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8545";

/// Maximum number of connection attempts before giving up
pub const MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Initial backoff delay between connection attempts
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay between connection attempts
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Configuration for the RPC connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    /// Node endpoint: `http(s)://`, `ws(s)://` or an IPC socket path
    pub endpoint: String,
    /// Maximum connection attempts
    pub max_connect_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_connect_attempts: MAX_CONNECT_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

impl RpcConfig {
    /// Create a new config for the given endpoint
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .initial_backoff_ms
            .saturating_mul(2u64.pow(attempt.min(10)));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

/// Whether an endpoint names an IPC socket rather than a URL
pub fn is_ipc_endpoint(endpoint: &str) -> bool {
    !endpoint.contains("://")
}

/// Format a height as a JSON-RPC quantity
pub fn format_height(height: Height) -> String {
    format!("0x{:x}", height)
}

/// Format an address as lowercase hex string with 0x prefix
pub fn format_address(address: Address) -> String {
    format!("{:#x}", address)
}

/// Format a 32-byte hash as lowercase hex string with 0x prefix
pub fn format_hash(hash: B256) -> String {
    format!("{:#x}", hash)
}

/// Ledger client backed by an alloy provider
pub struct RpcLedgerClient {
    provider: RootProvider<BoxTransport>,
    endpoint: String,
}

impl RpcLedgerClient {
    /// Connect to the configured endpoint, retrying with exponential backoff
    pub async fn connect(config: &RpcConfig) -> Result<Self, LedgerError> {
        let endpoint = expand_path(&config.endpoint);
        if is_ipc_endpoint(&endpoint) && !Path::new(&endpoint).exists() {
            warn!("IPC socket '{}' does not exist yet", endpoint);
        }

        let mut attempt = 0;
        loop {
            info!("Connecting to ledger node at {}", endpoint);
            match ProviderBuilder::new().on_builtin(&endpoint).await {
                Ok(provider) => {
                    info!("Successfully connected to ledger node");
                    return Ok(Self { provider, endpoint });
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= config.max_connect_attempts {
                        error!("Connection attempt {} failed: {}", attempt, e);
                        return Err(LedgerError::MaxConnectAttemptsExceeded(
                            config.max_connect_attempts,
                        ));
                    }

                    let delay = config.backoff_delay(attempt - 1);
                    warn!(
                        "Connection attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, config.max_connect_attempts, e, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn current_height(&self) -> Result<Height, LedgerError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))
    }

    async fn block_at(&self, height: Height) -> Result<Block, LedgerError> {
        let raw: serde_json::Value = self
            .provider
            .raw_request("eth_getBlockByNumber".into(), (format_height(height), true))
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let block = decode_block(height, raw)?;
        debug!(
            "Fetched block {} with {} transaction(s)",
            block.height,
            block.transactions.len()
        );
        Ok(block)
    }
}

/// Block as returned by `eth_getBlockByNumber` with hydrated transactions
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: U64,
    hash: B256,
    transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: B256,
    from: Address,
    to: Option<Address>,
    value: U256,
    block_number: U64,
    block_hash: B256,
}

impl From<RpcTransaction> for Transaction {
    fn from(tx: RpcTransaction) -> Self {
        Transaction {
            block_number: tx.block_number.to::<u64>(),
            block_hash: format_hash(tx.block_hash),
            hash: format_hash(tx.hash),
            from: format_address(tx.from),
            to: tx.to.map(format_address),
            value: tx.value,
        }
    }
}

/// Decode an `eth_getBlockByNumber` result
///
/// # Arguments
/// * `requested` - The height that was asked for, reported if the node has no such block
/// * `raw` - The JSON-RPC `result` value
pub fn decode_block(requested: Height, raw: serde_json::Value) -> Result<Block, LedgerError> {
    if raw.is_null() {
        return Err(LedgerError::BlockNotFound(requested));
    }

    let block: RpcBlock =
        serde_json::from_value(raw).map_err(|e| LedgerError::Decode(e.to_string()))?;

    Ok(Block {
        height: block.number.to::<u64>(),
        hash: format_hash(block.hash),
        transactions: block.transactions.into_iter().map(Transaction::from).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BLOCK_HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
    const TX_HASH: &str = "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";
    const SENDER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
    const ROUTER: &str = "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D";

    fn raw_tx(to: serde_json::Value) -> serde_json::Value {
        json!({
            "hash": TX_HASH,
            "from": SENDER,
            "to": to,
            "value": "0xde0b6b3a7640000",
            "blockNumber": "0x2a",
            "blockHash": BLOCK_HASH,
            "nonce": "0x0",
            "input": "0x"
        })
    }

    fn raw_block(transactions: serde_json::Value) -> serde_json::Value {
        json!({
            "number": "0x2a",
            "hash": BLOCK_HASH,
            "parentHash": BLOCK_HASH,
            "transactions": transactions
        })
    }

    // ==================== RpcConfig tests ====================

    #[test]
    fn test_rpc_config_default() {
        let config = RpcConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.max_connect_attempts, MAX_CONNECT_ATTEMPTS);
        assert_eq!(config.initial_backoff_ms, INITIAL_BACKOFF_MS);
        assert_eq!(config.max_backoff_ms, MAX_BACKOFF_MS);
    }

    #[test]
    fn test_rpc_config_with_endpoint() {
        let config = RpcConfig::with_endpoint("/tmp/anvil.ipc");
        assert_eq!(config.endpoint, "/tmp/anvil.ipc");
        assert_eq!(config.max_connect_attempts, MAX_CONNECT_ATTEMPTS);
    }

    #[test]
    fn test_rpc_config_backoff_delay() {
        let config = RpcConfig::default();
        assert_eq!(config.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_rpc_config_backoff_delay_saturates_large_initial() {
        let config = RpcConfig {
            initial_backoff_ms: u64::MAX / 2,
            ..Default::default()
        };
        assert_eq!(config.backoff_delay(10), Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[test]
    fn test_rpc_config_backoff_delay_caps_at_max() {
        let config = RpcConfig {
            max_backoff_ms: 1000,
            ..Default::default()
        };
        assert_eq!(config.backoff_delay(10), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(20), Duration::from_millis(1000));
    }

    // ==================== Endpoint helper tests ====================

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = expand_path("~/test/path.ipc");
        assert!(!expanded.starts_with("~/"));
        assert!(expanded.contains("test/path.ipc"));
    }

    #[test]
    fn test_expand_path_leaves_urls_alone() {
        assert_eq!(expand_path("http://127.0.0.1:8545"), "http://127.0.0.1:8545");
        assert_eq!(expand_path("/some/~path/test.ipc"), "/some/~path/test.ipc");
    }

    #[test]
    fn test_is_ipc_endpoint() {
        assert!(is_ipc_endpoint("/tmp/anvil.ipc"));
        assert!(!is_ipc_endpoint("http://127.0.0.1:8545"));
        assert!(!is_ipc_endpoint("ws://127.0.0.1:8546"));
    }

    #[test]
    fn test_format_height() {
        assert_eq!(format_height(0), "0x0");
        assert_eq!(format_height(17948861), "0x111e0bd");
    }

    #[test]
    fn test_format_address_is_lowercase() {
        let formatted = format_address(SENDER.parse().unwrap());
        assert_eq!(formatted, SENDER.to_lowercase());
        assert_eq!(formatted.len(), 42);
    }

    // ==================== decode_block tests ====================

    #[test]
    fn test_decode_block_with_transactions() {
        let block = decode_block(42, raw_block(json!([raw_tx(json!(ROUTER))]))).unwrap();

        assert_eq!(block.height, 42);
        assert_eq!(block.hash, BLOCK_HASH);
        assert_eq!(block.transactions.len(), 1);

        let tx = &block.transactions[0];
        assert_eq!(tx.hash, TX_HASH);
        assert_eq!(tx.from, SENDER.to_lowercase());
        assert_eq!(tx.to.as_deref(), Some(ROUTER.to_lowercase().as_str()));
        assert_eq!(tx.value, U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(tx.block_number, 42);
        assert_eq!(tx.block_hash, BLOCK_HASH);
    }

    #[test]
    fn test_decode_block_empty() {
        let block = decode_block(42, raw_block(json!([]))).unwrap();
        assert!(block.transactions.is_empty());
    }

    #[test]
    fn test_decode_block_contract_creation() {
        let block = decode_block(42, raw_block(json!([raw_tx(serde_json::Value::Null)]))).unwrap();
        assert_eq!(block.transactions[0].to, None);
    }

    #[test]
    fn test_decode_null_block_is_not_found() {
        let result = decode_block(99, serde_json::Value::Null);
        assert!(matches!(result, Err(LedgerError::BlockNotFound(99))));
    }

    #[test]
    fn test_decode_block_missing_hash() {
        let mut raw = raw_block(json!([]));
        raw.as_object_mut().unwrap().remove("hash");
        assert!(matches!(decode_block(42, raw), Err(LedgerError::Decode(_))));
    }

    #[test]
    fn test_decode_block_missing_transactions() {
        let mut raw = raw_block(json!([]));
        raw.as_object_mut().unwrap().remove("transactions");
        assert!(matches!(decode_block(42, raw), Err(LedgerError::Decode(_))));
    }

    #[test]
    fn test_decode_transaction_missing_sender() {
        let mut tx = raw_tx(json!(ROUTER));
        tx.as_object_mut().unwrap().remove("from");
        let result = decode_block(42, raw_block(json!([tx])));
        assert!(matches!(result, Err(LedgerError::Decode(_))));
    }

    #[test]
    fn test_decode_transaction_malformed_value() {
        let mut tx = raw_tx(json!(ROUTER));
        tx["value"] = json!({"amount": 1});
        let result = decode_block(42, raw_block(json!([tx])));
        assert!(matches!(result, Err(LedgerError::Decode(_))));
    }

    #[test]
    fn test_decode_block_with_hash_only_transactions() {
        // Non-hydrated response: transactions are bare hashes
        let result = decode_block(42, raw_block(json!([TX_HASH])));
        assert!(matches!(result, Err(LedgerError::Decode(_))));
    }

    #[test]
    fn test_decode_block_not_an_object() {
        let result = decode_block(42, json!("0x2a"));
        assert!(matches!(result, Err(LedgerError::Decode(_))));
    }

    // ==================== Async tests (require tokio runtime) ====================

    #[tokio::test]
    async fn test_connect_gives_up_after_max_attempts() {
        let config = RpcConfig {
            endpoint: "/nonexistent/path/to/node.ipc".to_string(),
            max_connect_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        };
        let result = RpcLedgerClient::connect(&config).await;
        assert!(matches!(result, Err(LedgerError::MaxConnectAttemptsExceeded(2))));
    }
}
