//! Distributed fixed-window rate limiter.
//!
//! All state lives in the [`CounterStore`]; the limiter itself only holds
//! configuration. A window opens when a client's counter key is created
//! and closes when the store expires it.
//!
//! The first request of a window is a read followed by a separate create.
//! Two requests from a new client can both read "absent" and both create;
//! the last write wins and the window admits at most one extra request.
//! This is accepted rather than locked around.
//!
//! Store failures at any step admit the request unmetered.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::store::{CounterStore, KeyTtl};

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Counted and allowed. `reset_at` is only known when this request
    /// opened the window.
    Admit {
        limit: u64,
        remaining: u64,
        reset_at: Option<u64>,
    },
    /// Over the limit for the current window.
    Reject {
        limit: u64,
        retry_after: u64,
        reset_at: u64,
    },
    /// The store failed; allowed without counting.
    Unmetered,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Reject { .. })
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    limit: u64,
    window: Duration,
    key_prefix: String,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            limit: config.limit,
            window: config.window,
            key_prefix: config.key_prefix.clone(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn counter_key(&self, client: &str) -> String {
        format!("{}:{}", self.key_prefix, client)
    }

    /// Count one request from `client` and decide whether it may proceed.
    pub async fn check(&self, client: &str) -> Decision {
        let key = self.counter_key(client);

        let current = match self.store.get_value(&key).await {
            Ok(current) => current,
            Err(e) => {
                warn!(key = %key, error = %e, "Counter read failed, admitting unmetered");
                return Decision::Unmetered;
            }
        };

        match current {
            None => self.open_window(&key).await,
            Some(count) if count_reached(count, self.limit) => self.reject(&key).await,
            Some(_) => self.count(&key).await,
        }
    }

    async fn open_window(&self, key: &str) -> Decision {
        if let Err(e) = self.store.create_with_expiry(key, 1, self.window).await {
            warn!(key = %key, error = %e, "Counter create failed, admitting unmetered");
            return Decision::Unmetered;
        }

        debug!(key = %key, "Opened rate limit window");
        Decision::Admit {
            limit: self.limit,
            remaining: self.limit.saturating_sub(1),
            reset_at: Some(self.clock.unix_seconds().saturating_add(self.window.as_secs())),
        }
    }

    /// Reject path. The TTL is looked up again here rather than reused
    /// from the read, so `retry_after` reflects the store at reject time.
    async fn reject(&self, key: &str) -> Decision {
        let remaining = match self.store.ttl(key).await {
            Ok(KeyTtl::Expires(left)) if !left.is_zero() => left,
            Ok(other) => {
                debug!(key = %key, ttl = ?other, "No usable TTL, using full window");
                self.window
            }
            Err(e) => {
                warn!(key = %key, error = %e, "TTL lookup failed, using full window");
                self.window
            }
        };

        let retry_after = ceil_secs(remaining);
        info!(key = %key, limit = self.limit, retry_after, "Rate limit exceeded");

        Decision::Reject {
            limit: self.limit,
            retry_after,
            reset_at: self.clock.unix_seconds().saturating_add(retry_after),
        }
    }

    async fn count(&self, key: &str) -> Decision {
        let count = match self.store.increment(key).await {
            Ok(count) => count,
            Err(e) => {
                warn!(key = %key, error = %e, "Counter increment failed, admitting unmetered");
                return Decision::Unmetered;
            }
        };

        self.repair_expiry(key).await;

        Decision::Admit {
            limit: self.limit,
            remaining: self.limit.saturating_sub(count.max(0) as u64),
            reset_at: None,
        }
    }

    /// A counter without an expiry would never close its window. That
    /// happens when an increment lands on a key that vanished or was
    /// never given a TTL, so put one back.
    async fn repair_expiry(&self, key: &str) {
        match self.store.ttl(key).await {
            Ok(KeyTtl::Persistent) => {
                warn!(key = %key, "Counter has no expiry, restoring window");
                if let Err(e) = self.store.set_expiry(key, self.window).await {
                    warn!(key = %key, error = %e, "Failed to restore counter expiry");
                }
            }
            Ok(_) => {}
            Err(e) => {
                debug!(key = %key, error = %e, "TTL check after increment failed");
            }
        }
    }
}

fn count_reached(count: i64, limit: u64) -> bool {
    count >= 0 && count as u64 >= limit
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
