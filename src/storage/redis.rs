//! Redis Storage
//!
//! Durable backend for the cursor, the subscriptions and the transaction
//! buckets. Bucket appends and block commits run as Lua scripts so that
//! per-hash deduplication and the cursor update happen in one atomic step.
//!
//! Key layout under the configured prefix:
//! - `<prefix>:cursor` - last committed height
//! - `<prefix>:subscriptions` - set of watched addresses
//! - `<prefix>:bucket:<address>` - list of JSON transactions in append order
//! - `<prefix>:seen:<address>` - set of canonical ids held by the bucket

use std::sync::LazyLock;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use super::{BlockCommit, CursorStorage, Storage, StorageError, SubscriptionStorage, TransactionStorage};
use crate::types::{Height, Transaction};

/// Default key prefix
pub const DEFAULT_PREFIX: &str = "txnscope";

/// Appends deduplicated entries to each bucket, then sets the cursor
///
/// KEYS[1] is the cursor key, followed by (bucket, seen) key pairs.
/// ARGV[1] is the new height or an empty string to leave the cursor alone,
/// followed by one JSON array of `[id, transaction]` pairs per key pair.
const APPLY_SCRIPT: &str = r#"
for k = 1, (#KEYS - 1) / 2 do
  local bucket = KEYS[2 * k]
  local seen = KEYS[2 * k + 1]
  for _, entry in ipairs(cjson.decode(ARGV[k + 1])) do
    if redis.call('SADD', seen, entry[1]) == 1 then
      redis.call('RPUSH', bucket, entry[2])
    end
  end
end
if ARGV[1] ~= '' then
  redis.call('SET', KEYS[1], ARGV[1])
end
return 0
"#;

static APPLY: LazyLock<Script> = LazyLock::new(|| Script::new(APPLY_SCRIPT));

/// Redis-backed storage
#[derive(Clone)]
pub struct RedisStorage {
    connection: MultiplexedConnection,
    prefix: String,
}

impl RedisStorage {
    /// Create a storage over an established Redis multiplexed connection
    pub fn new(connection: MultiplexedConnection, prefix: impl Into<String>) -> Self {
        Self {
            connection,
            prefix: prefix.into(),
        }
    }

    /// Open a connection and create a storage with the given key prefix
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StorageError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        let storage = Self::new(connection, prefix);
        info!("Connected to Redis storage at {} (prefix '{}')", url, storage.prefix);
        Ok(storage)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn cursor_key(&self) -> String {
        cursor_key(&self.prefix)
    }

    fn subscriptions_key(&self) -> String {
        subscriptions_key(&self.prefix)
    }

    async fn apply(
        &self,
        height: Option<Height>,
        groups: &[(String, Vec<Transaction>)],
    ) -> Result<(), StorageError> {
        let mut invocation = APPLY.prepare_invoke();
        invocation.key(self.cursor_key());
        invocation.arg(height.map(|h| h.to_string()).unwrap_or_default());

        for (address, transactions) in groups {
            invocation.key(bucket_key(&self.prefix, address));
            invocation.key(seen_key(&self.prefix, address));
            invocation.arg(encode_entries(transactions)?);
        }

        let mut conn = self.connection.clone();
        let _: () = invocation.invoke_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl CursorStorage for RedisStorage {
    async fn save(&self, height: Height) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(self.cursor_key(), height).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Height, StorageError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(self.cursor_key()).await?;
        match raw {
            None => Ok(0),
            Some(raw) => raw
                .parse()
                .map_err(|_| StorageError::Corrupt(format!("cursor value '{}' is not a height", raw))),
        }
    }
}

#[async_trait]
impl SubscriptionStorage for RedisStorage {
    async fn add(&self, address: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = conn.sadd(self.subscriptions_key(), address).await?;
        Ok(())
    }

    async fn exists(&self, address: &str) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();
        Ok(conn.sismember(self.subscriptions_key(), address).await?)
    }

    async fn exists_many(&self, addresses: &[&str]) -> Result<Vec<bool>, StorageError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        Ok(redis::cmd("SMISMEMBER")
            .arg(self.subscriptions_key())
            .arg(addresses.to_vec())
            .query_async(&mut conn)
            .await?)
    }
}

#[async_trait]
impl TransactionStorage for RedisStorage {
    async fn append(&self, address: &str, transactions: &[Transaction]) -> Result<(), StorageError> {
        if transactions.is_empty() {
            return Ok(());
        }
        self.apply(None, &[(address.to_string(), transactions.to_vec())]).await
    }

    async fn get(&self, address: &str) -> Result<Vec<Transaction>, StorageError> {
        let mut conn = self.connection.clone();
        let raw: Vec<String> = conn.lrange(bucket_key(&self.prefix, address), 0, -1).await?;
        decode_bucket(&raw)
    }

    async fn delete(&self, address: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(vec![bucket_key(&self.prefix, address), seen_key(&self.prefix, address)])
            .await?;
        Ok(())
    }

    async fn take(&self, address: &str) -> Result<Vec<Transaction>, StorageError> {
        let bucket = bucket_key(&self.prefix, address);
        let seen = seen_key(&self.prefix, address);

        let mut conn = self.connection.clone();
        let (raw,): (Vec<String>,) = redis::pipe()
            .atomic()
            .lrange(&bucket, 0, -1)
            .del(vec![&bucket, &seen])
            .ignore()
            .query_async(&mut conn)
            .await?;
        decode_bucket(&raw)
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn commit_block(&self, commit: BlockCommit) -> Result<(), StorageError> {
        debug!(
            "Committing block {} with {} match(es) to Redis",
            commit.height,
            commit.matched()
        );
        self.apply(Some(commit.height), &commit.matches).await
    }
}

/// Key holding the cursor
pub fn cursor_key(prefix: &str) -> String {
    format!("{}:cursor", prefix)
}

/// Key holding the subscription set
pub fn subscriptions_key(prefix: &str) -> String {
    format!("{}:subscriptions", prefix)
}

/// Key holding an address's bucket
pub fn bucket_key(prefix: &str, address: &str) -> String {
    format!("{}:bucket:{}", prefix, address)
}

/// Key holding the ids already in an address's bucket
pub fn seen_key(prefix: &str, address: &str) -> String {
    format!("{}:seen:{}", prefix, address)
}

/// Encode transactions as the `[id, transaction]` pairs the apply script expects
fn encode_entries(transactions: &[Transaction]) -> Result<String, StorageError> {
    let entries = transactions
        .iter()
        .map(|tx| -> Result<(String, String), StorageError> {
            Ok((tx.id()?.to_string(), serde_json::to_string(tx)?))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(serde_json::to_string(&entries)?)
}

fn decode_bucket(raw: &[String]) -> Result<Vec<Transaction>, StorageError> {
    raw.iter()
        .map(|entry| {
            serde_json::from_str(entry)
                .map_err(|e| StorageError::Corrupt(format!("bucket entry is not a transaction: {}", e)))
        })
        .collect()
}
