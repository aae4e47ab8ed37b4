//! Subscription Registry
//!
//! The set of watched addresses. Membership is tested once per side of every
//! transaction in every scanned block, so lookups must stay cheap while
//! callers keep subscribing concurrently.

use dashmap::DashSet;

/// Concurrent set of watched addresses
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    addresses: DashSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching an address. Re-adding is a no-op success.
    pub fn subscribe(&self, address: &str) -> bool {
        self.addresses.insert(address.to_string());
        true
    }

    /// Check whether an address is watched
    pub fn is_subscribed(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Snapshot of the watched addresses, in no particular order
    pub fn addresses(&self) -> Vec<String> {
        self.addresses.iter().map(|a| a.key().clone()).collect()
    }
}
