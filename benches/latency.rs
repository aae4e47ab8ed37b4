//! Latency benchmarks for the indexing hot path
//!
//! Covers the per-transaction work done while a block is processed:
//! subscription lookups, hash canonicalisation, bucket appends and a full
//! in-memory block commit.

use std::sync::Arc;

use alloy::primitives::U256;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tokio::runtime::Runtime;

use txnscope_indexer::{
    Block, Height, LedgerClient, LedgerError, MemoryStorage, Scanner, ScannerConfig,
    SubscriptionRegistry, Transaction, TransactionIndex, TxId,
};

fn transfer(i: u64) -> Transaction {
    Transaction {
        block_number: 7,
        block_hash: format!("0x{:064x}", 7),
        hash: format!("0x{:064x}", i),
        from: format!("0x{:040x}", i % 64),
        to: Some(format!("0x{:040x}", (i + 1) % 64)),
        value: U256::from(i),
    }
}

/// Benchmark subscription membership checks
fn bench_subscription_lookup(c: &mut Criterion) {
    let registry = SubscriptionRegistry::new();
    for i in 0..10_000u64 {
        registry.subscribe(&format!("0x{:040x}", i));
    }
    let hit = format!("0x{:040x}", 4_242);
    let miss = format!("0x{:040x}", 99_999);

    c.bench_function("subscription_hit", |b| {
        b.iter(|| black_box(registry.is_subscribed(black_box(&hit))))
    });
    c.bench_function("subscription_miss", |b| {
        b.iter(|| black_box(registry.is_subscribed(black_box(&miss))))
    });
}

/// Benchmark transaction hash canonicalisation
fn bench_parse_tx_id(c: &mut Criterion) {
    let hash = "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";

    c.bench_function("parse_tx_id", |b| {
        b.iter(|| black_box(TxId::parse(black_box(hash)).unwrap()))
    });
}

/// Benchmark appending a block's worth of transactions to one bucket
fn bench_index_append(c: &mut Criterion) {
    let batch: Vec<Transaction> = (0..200).map(transfer).collect();

    c.bench_function("index_append_200", |b| {
        b.iter_batched(
            TransactionIndex::new,
            |index| {
                index.append("0x123", black_box(&batch)).unwrap();
                index
            },
            BatchSize::SmallInput,
        )
    });
}

struct StaticLedger {
    block: Block,
}

#[async_trait::async_trait]
impl LedgerClient for StaticLedger {
    async fn current_height(&self) -> Result<Height, LedgerError> {
        Ok(self.block.height)
    }

    async fn block_at(&self, _height: Height) -> Result<Block, LedgerError> {
        Ok(self.block.clone())
    }
}

/// Benchmark fetching, matching and committing one block in memory
fn bench_process_block(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let ledger = Arc::new(StaticLedger {
        block: Block::new(7, format!("0x{:064x}", 7), (0..200).map(transfer).collect()),
    });

    c.bench_function("process_block_200", |b| {
        b.to_async(&rt).iter_batched(
            || {
                let storage = Arc::new(MemoryStorage::new());
                for i in 0..8u64 {
                    storage.subscriptions().subscribe(&format!("0x{:040x}", i));
                }
                Scanner::new(ledger.clone(), storage, ScannerConfig::default())
            },
            |scanner| async move {
                black_box(scanner.process_block(7).await.unwrap());
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_subscription_lookup,
    bench_parse_tx_id,
    bench_index_append,
    bench_process_block
);

criterion_main!(benches);
