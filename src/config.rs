//! Daemon Configuration
//!
//! Everything has a default; `TXNSCOPE_*` environment variables override it.
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `TXNSCOPE_RPC_URL` | node endpoint (URL or IPC path) | `http://127.0.0.1:8545` |
//! | `TXNSCOPE_MAX_CONNECT_ATTEMPTS` | connection attempts before giving up | `10` |
//! | `TXNSCOPE_POLL_INTERVAL_MS` | period between scan ticks | `1000` |
//! | `TXNSCOPE_REQUEST_TIMEOUT_MS` | bound on one ledger call | `10000` |
//! | `TXNSCOPE_START` | `head`, `resume` or a block height | `head` |
//! | `TXNSCOPE_REDIS_URL` | Redis storage, in-memory when unset | unset |
//! | `TXNSCOPE_REDIS_PREFIX` | Redis key prefix | `txnscope` |
//! | `TXNSCOPE_WATCH` | comma-separated addresses to subscribe, any case | empty |
//! | `TXNSCOPE_DRAIN_INTERVAL_MS` | period between drains of watched addresses | `5000` |
//! | `TXNSCOPE_LOG_LEVEL` | `trace` to `error` | `info` |

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use thiserror::Error;
use tracing::Level;

use crate::rpc::{format_address, RpcConfig};
use crate::scanner::{ScannerConfig, StartPolicy};
use crate::storage::redis::DEFAULT_PREFIX;

/// Default period between drains of watched addresses
pub const DEFAULT_DRAIN_INTERVAL_MS: u64 = 5000;

/// Errors raised while loading configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Full daemon configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    pub rpc: RpcConfig,
    pub scanner: ScannerConfig,
    /// Redis connection URL, None for in-memory storage
    pub redis_url: Option<String>,
    pub redis_prefix: String,
    /// Addresses subscribed at startup, lowercase as the RPC client reports them
    pub watch: Vec<String>,
    pub drain_interval: Duration,
    pub log_level: Level,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            scanner: ScannerConfig::default(),
            redis_url: None,
            redis_prefix: DEFAULT_PREFIX.to_string(),
            watch: Vec::new(),
            drain_interval: Duration::from_millis(DEFAULT_DRAIN_INTERVAL_MS),
            log_level: Level::INFO,
        }
    }
}

impl IndexerConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(url) = get("TXNSCOPE_RPC_URL") {
            config.rpc.endpoint = url;
        }
        if let Some(raw) = get("TXNSCOPE_MAX_CONNECT_ATTEMPTS") {
            config.rpc.max_connect_attempts = parse("TXNSCOPE_MAX_CONNECT_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = get("TXNSCOPE_POLL_INTERVAL_MS") {
            config.scanner.poll_interval = parse_millis("TXNSCOPE_POLL_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = get("TXNSCOPE_REQUEST_TIMEOUT_MS") {
            config.scanner.request_timeout = parse_millis("TXNSCOPE_REQUEST_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = get("TXNSCOPE_START") {
            config.scanner.start = parse_start(&raw)?;
        }

        config.redis_url = get("TXNSCOPE_REDIS_URL");
        if let Some(prefix) = get("TXNSCOPE_REDIS_PREFIX") {
            config.redis_prefix = prefix;
        }

        if let Some(raw) = get("TXNSCOPE_WATCH") {
            config.watch = raw
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(parse_address)
                .collect::<Result<_, _>>()?;
        }
        if let Some(raw) = get("TXNSCOPE_DRAIN_INTERVAL_MS") {
            config.drain_interval = parse_millis("TXNSCOPE_DRAIN_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = get("TXNSCOPE_LOG_LEVEL") {
            config.log_level = parse("TXNSCOPE_LOG_LEVEL", &raw)?;
        }

        Ok(config)
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let millis: u64 = parse(key, raw)?;
    if millis == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_millis(millis))
}

/// Parse an address in any case and render it the way blocks report it
fn parse_address(raw: &str) -> Result<String, ConfigError> {
    let address: Address = parse("TXNSCOPE_WATCH", raw)?;
    Ok(format_address(address))
}

fn parse_start(raw: &str) -> Result<StartPolicy, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "head" => Ok(StartPolicy::Head),
        "resume" => Ok(StartPolicy::Resume),
        _ => parse("TXNSCOPE_START", raw).map(StartPolicy::Height),
    }
}
