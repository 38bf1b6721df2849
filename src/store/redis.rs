//! Redis-backed counter store.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use tracing::{debug, info};

use super::{parse_counter, ttl_millis, CounterStore, KeyTtl};
use crate::config::RedisConfig;
use crate::error::StoreError;

/// Counter store over a small set of multiplexed Redis connections.
///
/// Handles are cloned out round-robin per call, so concurrent requests
/// never wait on each other for a connection. Each command is bounded by
/// `command_timeout` and is never retried; reconnects happen inside the
/// connection manager with the configured backoff.
pub struct RedisCounterStore {
    pool: Vec<ConnectionManager>,
    cursor: AtomicUsize,
    command_timeout: Duration,
}

impl RedisCounterStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.connection_url())?;
        let backoff = config.reconnect_backoff();
        let size = config.pool_size.max(1);

        let mut pool = Vec::with_capacity(size);
        for _ in 0..size {
            let manager = ConnectionManager::new_with_backoff(
                client.clone(),
                backoff.exponent_base,
                backoff.factor,
                backoff.retries,
            );
            let conn = tokio::time::timeout(config.connect_timeout, manager)
                .await
                .map_err(|_| StoreError::Timeout(config.connect_timeout))??;
            pool.push(conn);
        }

        let store = Self {
            pool,
            cursor: AtomicUsize::new(0),
            command_timeout: config.command_timeout,
        };
        store.ping().await?;

        info!(
            url = %config.redacted_url(),
            pool_size = size,
            "Connected to Redis counter store"
        );

        Ok(store)
    }

    fn connection(&self) -> ConnectionManager {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        self.pool[idx].clone()
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => result.map_err(|e| {
                debug!(op, error = %e, "Redis command failed");
                StoreError::from(e)
            }),
            Err(_) => {
                debug!(op, timeout = ?self.command_timeout, "Redis command timed out");
                Err(StoreError::Timeout(self.command_timeout))
            }
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get_value(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.connection();
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);

        let raw: Option<String> = self
            .bounded("GET", cmd.query_async::<_, Option<String>>(&mut conn))
            .await?;

        raw.map(|value| parse_counter(key, value)).transpose()
    }

    async fn create_with_expiry(
        &self,
        key: &str,
        initial: i64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(key)
            .arg(initial)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .ignore();

        self.bounded("SET PX", pipe.query_async::<_, ()>(&mut conn))
            .await
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection();
        let mut cmd = redis::cmd("INCR");
        cmd.arg(key);

        self.bounded("INCR", cmd.query_async::<_, i64>(&mut conn))
            .await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let mut conn = self.connection();
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(key);

        let millis: i64 = self
            .bounded("PTTL", cmd.query_async::<_, i64>(&mut conn))
            .await?;

        Ok(match millis {
            -1 => KeyTtl::Persistent,
            ms if ms < 0 => KeyTtl::Missing,
            ms => KeyTtl::Expires(Duration::from_millis(ms as u64)),
        })
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(key).arg(ttl_millis(ttl));

        self.bounded("PEXPIRE", cmd.query_async::<_, i64>(&mut conn))
            .await
            .map(|_| ())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let cmd = redis::cmd("PING");

        self.bounded("PING", cmd.query_async::<_, String>(&mut conn))
            .await
            .map(|_| ())
    }
}
