//! Counter store: the shared, TTL-capable key-value service that holds
//! every client's window counter.
//!
//! Each operation is a single round-trip and atomic on its own. Nothing
//! here composes operations into a transaction; the rate limiter's
//! read-then-create sequence is deliberately two calls.

mod memory;
mod redis;

pub use self::memory::{MemoryCounterStore, StoreOp};
pub use self::redis::RedisCounterStore;

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Expires(Duration),
    /// The key exists but has no expiry.
    Persistent,
    Missing,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current counter value, `None` when the key does not exist.
    async fn get_value(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Set `key` to `initial` with the given expiry, overwriting any value.
    async fn create_with_expiry(
        &self,
        key: &str,
        initial: i64,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Add one and return the new value. An absent key is created at 1
    /// without an expiry.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError>;

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub(crate) fn parse_counter(key: &str, raw: String) -> Result<i64, StoreError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| StoreError::MalformedValue {
            key: key.to_string(),
            value: raw,
        })
}

/// Store expiries are millisecond-granular; never send 0.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_counter("k", "42".to_string()).unwrap(), 42);
        assert_eq!(parse_counter("k", " 7\n".to_string()).unwrap(), 7);
        assert!(matches!(
            parse_counter("k", "1.5".to_string()),
            Err(StoreError::MalformedValue { .. })
        ));
    }

    #[test]
    fn test_ttl_millis_floor() {
        assert_eq!(ttl_millis(Duration::from_secs(60)), 60_000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(u64::MAX)), u64::MAX);
    }
}
