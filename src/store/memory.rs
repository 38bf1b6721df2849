//! In-process counter store.
//!
//! Mirrors the Redis command semantics the limiter relies on, including
//! `INCR` creating keys without an expiry. Counters are local to the
//! process, so this is only correct for a single instance. Expiry runs on
//! `tokio::time::Instant`, which lets paused-clock tests step through
//! windows.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{parse_counter, CounterStore, KeyTtl};
use crate::error::StoreError;

/// Store operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Increment,
    Ttl,
    SetExpiry,
    Ping,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
    failing: Mutex<HashSet<StoreOp>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `op` fail with a connection error.
    pub fn fail_on(&self, op: StoreOp) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(op);
        }
    }

    /// Make every operation fail, as if the store were unreachable.
    pub fn fail_all(&self) {
        for op in [
            StoreOp::Get,
            StoreOp::Create,
            StoreOp::Increment,
            StoreOp::Ttl,
            StoreOp::SetExpiry,
            StoreOp::Ping,
        ] {
            self.fail_on(op);
        }
    }

    pub fn heal(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
    }

    /// Write a raw value, bypassing counter semantics.
    pub fn insert_raw(&self, key: &str, value: &str, ttl: Option<Duration>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
        }
    }

    /// Raw value of a live key.
    pub fn raw(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .ok()?
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| StoreError::Command("fault set lock poisoned".into()))?;

        if failing.contains(&op) {
            return Err(StoreError::Connection(format!(
                "injected failure on {:?}",
                op
            )));
        }
        Ok(())
    }

    /// Lock the table and drop `key` if it has expired.
    fn live_entries(&self, key: &str) -> Result<MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Command("counter table lock poisoned".into()))?;

        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        Ok(entries)
    }
}

fn expiry_from_now(ttl: Duration) -> Result<Instant, StoreError> {
    Instant::now()
        .checked_add(ttl)
        .ok_or_else(|| StoreError::Command(format!("expiry {:?} out of range", ttl)))
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get_value(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.check(StoreOp::Get)?;
        let raw = self.live_entries(key)?.get(key).map(|e| e.value.clone());
        raw.map(|value| parse_counter(key, value)).transpose()
    }

    async fn create_with_expiry(
        &self,
        key: &str,
        initial: i64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check(StoreOp::Create)?;
        let expires_at = expiry_from_now(ttl)?;
        self.live_entries(key)?.insert(
            key.to_string(),
            Entry {
                value: initial.to_string(),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.check(StoreOp::Increment)?;
        let mut entries = self.live_entries(key)?;

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: None,
        });

        let next = entry
            .value
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|current| current.checked_add(1))
            .ok_or_else(|| {
                StoreError::Command("value is not an integer or out of range".into())
            })?;

        entry.value = next.to_string();
        Ok(next)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        self.check(StoreOp::Ttl)?;
        let now = Instant::now();

        Ok(match self.live_entries(key)?.get(key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(now)),
        })
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check(StoreOp::SetExpiry)?;
        let expires_at = expiry_from_now(ttl)?;
        if let Some(entry) = self.live_entries(key)?.get_mut(key) {
            entry.expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check(StoreOp::Ping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_increment() {
        let store = MemoryCounterStore::new();

        assert_eq!(store.get_value("k").await.unwrap(), None);
        store
            .create_with_expiry("k", 1, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get_value("k").await.unwrap(), Some(1));
        assert_eq!(store.increment("k").await.unwrap(), 2);
        assert_eq!(store.increment("k").await.unwrap(), 3);
        assert_eq!(store.raw("k").as_deref(), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_absent_key_has_no_expiry() {
        let store = MemoryCounterStore::new();

        assert_eq!(store.increment("k").await.unwrap(), 1);
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Persistent);

        store.set_expiry("k", Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            store.ttl("k").await.unwrap(),
            KeyTtl::Expires(Duration::from_secs(5))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_expire() {
        let store = MemoryCounterStore::new();
        store
            .create_with_expiry("k", 1, Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(
            store.ttl("k").await.unwrap(),
            KeyTtl::Expires(Duration::from_secs(1))
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get_value("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Missing);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_create_overwrites() {
        let store = MemoryCounterStore::new();
        store.insert_raw("k", "41", None);

        store
            .create_with_expiry("k", 1, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get_value("k").await.unwrap(), Some(1));
        assert!(matches!(store.ttl("k").await.unwrap(), KeyTtl::Expires(_)));
    }

    #[tokio::test]
    async fn test_malformed_value() {
        let store = MemoryCounterStore::new();
        store.insert_raw("k", "not-a-number", None);

        assert!(matches!(
            store.get_value("k").await,
            Err(StoreError::MalformedValue { .. })
        ));
        assert!(matches!(
            store.increment("k").await,
            Err(StoreError::Command(_))
        ));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryCounterStore::new();
        store.fail_on(StoreOp::Increment);

        assert!(store.get_value("k").await.is_ok());
        assert!(matches!(
            store.increment("k").await,
            Err(StoreError::Connection(_))
        ));

        store.fail_all();
        assert!(store.ping().await.is_err());

        store.heal();
        assert!(store.ping().await.is_ok());
        assert_eq!(store.increment("k").await.unwrap(), 1);
    }
}
