//! Cursor Store
//!
//! Highest block height whose transactions are fully indexed.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Height;

/// Last processed height, 0 until first set
#[derive(Debug, Default)]
pub struct CursorStore {
    height: AtomicU64,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed height. Only the scanner writes here.
    pub fn set(&self, height: Height) {
        self.height.store(height, Ordering::Release);
    }

    pub fn get(&self) -> Height {
        self.height.load(Ordering::Acquire)
    }
}
