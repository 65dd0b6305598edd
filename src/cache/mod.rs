//! Cache / lock service
//!
//! Strongly-consistent key-value operations behind the [`CacheStore`] port:
//! read-through balance cache, distributed request locks (atomic
//! set-if-absent with TTL), consumer idempotency markers, and the sliding
//! window counters used by fraud detection.
//!
//! Production deployments use [`RedisCache`]; [`MemoryCache`] backs tests
//! and single-replica runs.

mod memory;
mod redis;

pub use memory::MemoryCache;
pub use redis::RedisCache;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("cache error: {0}")]
pub struct CacheError(pub String);

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Atomic set-if-absent with TTL. Returns `true` when the key was set,
    /// `false` when it already existed.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Add a member to a sorted set with the given score.
    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<(), CacheError>;

    /// Remove all members with score strictly below `min_score`.
    async fn sorted_trim_below(&self, key: &str, min_score: f64) -> Result<(), CacheError>;

    /// Cardinality of the sorted set.
    async fn sorted_count(&self, key: &str) -> Result<u64, CacheError>;

    /// Set a key's TTL.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// Key for the read-through balance cache (30s TTL).
pub fn balance_key(wallet_id: &str) -> String {
    format!("wallet:balance:{}", wallet_id)
}

/// Key for the distributed per-request lock (60s TTL).
pub fn request_lock_key(request_id: &str) -> String {
    format!("lock:req:{}", request_id)
}

/// Key marking a consumed event (24h TTL).
pub fn processed_event_key(hash: &str) -> String {
    format!("processed_event:{}", hash)
}

/// Sorted-set key for the per-wallet withdrawal sliding window.
pub fn withdrawals_key(wallet_id: &str) -> String {
    format!("withdrawals:{}", wallet_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(balance_key("alice"), "wallet:balance:alice");
        assert_eq!(request_lock_key("req-1"), "lock:req:req-1");
        assert_eq!(processed_event_key("abcd"), "processed_event:abcd");
        assert_eq!(withdrawals_key("alice"), "withdrawals:alice");
    }
}
