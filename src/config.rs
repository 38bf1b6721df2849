use crate::error::TurnstileError;
use envconfig::Envconfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Process-wide configuration, immutable once the server has started.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub rate_limit: RateLimitConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Resolve client identity from `X-Forwarded-For` / `X-Real-IP` before
    /// falling back to the peer address.
    pub trust_proxy_headers: bool,
}

/// Counter store connection parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Full connection URL; takes precedence over host/port/password/db.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    pub pool_size: usize,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Upper bound for every rate-limit command.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Reconnect backoff bounds. Only connection establishment retries.
    #[serde(with = "humantime_serde")]
    pub min_retry_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_retry_backoff: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests admitted per client per window.
    pub limit: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub key_prefix: String,
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    /// Process-local counters; only correct for a single instance.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown rate limit backend '{}'", other)),
        }
    }
}

/// Exponential reconnect schedule in the shape `ConnectionManager` expects:
/// delays of `factor * exponent_base^n` milliseconds, `retries` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    pub exponent_base: u64,
    pub factor: u64,
    pub retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            rate_limit: RateLimitConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            trust_proxy_headers: true,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            pool_size: 10,
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(3),
            min_retry_backoff: Duration::from_millis(8),
            max_retry_backoff: Duration::from_millis(512),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 120,
            window: Duration::from_secs(60),
            key_prefix: "rate_limit".to_string(),
            backend: StoreBackend::Redis,
        }
    }
}

impl RedisConfig {
    /// Connection URL, built from the discrete fields unless `url` is set.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        match &self.password {
            Some(password) if !password.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Connection URL with any password masked, for logs.
    pub fn redacted_url(&self) -> String {
        let url = self.connection_url();
        match (url.find("://"), url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://***{}", &url[..scheme_end], &url[at..])
            }
            _ => url,
        }
    }

    pub fn reconnect_backoff(&self) -> ReconnectBackoff {
        let min_ms = (self.min_retry_backoff.as_millis() as u64).max(1);
        let max_ms = (self.max_retry_backoff.as_millis() as u64).max(min_ms);

        // First delay is exponent_base * factor, so halve the floor.
        let factor = (min_ms / 2).max(1);

        let mut retries = 0;
        let mut delay = factor * 2;
        while delay <= max_ms {
            retries += 1;
            delay = delay.saturating_mul(2);
        }

        ReconnectBackoff {
            exponent_base: 2,
            factor,
            retries: retries.max(1),
        }
    }
}

/// Flat environment view of [`Config`].
#[derive(Debug, Envconfig)]
struct EnvConfig {
    #[envconfig(from = "BIND_ADDR", default = "0.0.0.0:8080")]
    bind_addr: SocketAddr,

    #[envconfig(from = "TRUST_PROXY_HEADERS", default = "true")]
    trust_proxy_headers: bool,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    log_level: String,

    #[envconfig(from = "REDIS_URL")]
    redis_url: Option<String>,

    #[envconfig(from = "REDIS_HOST", default = "127.0.0.1")]
    redis_host: String,

    #[envconfig(from = "REDIS_PORT", default = "6379")]
    redis_port: u16,

    #[envconfig(from = "REDIS_PASSWORD")]
    redis_password: Option<String>,

    #[envconfig(from = "REDIS_DB", default = "0")]
    redis_db: i64,

    #[envconfig(from = "REDIS_POOL_SIZE", default = "10")]
    redis_pool_size: usize,

    #[envconfig(from = "REDIS_CONNECT_TIMEOUT_MS", default = "5000")]
    redis_connect_timeout_ms: u64,

    #[envconfig(from = "REDIS_COMMAND_TIMEOUT_MS", default = "3000")]
    redis_command_timeout_ms: u64,

    #[envconfig(from = "REDIS_MIN_RETRY_BACKOFF_MS", default = "8")]
    redis_min_retry_backoff_ms: u64,

    #[envconfig(from = "REDIS_MAX_RETRY_BACKOFF_MS", default = "512")]
    redis_max_retry_backoff_ms: u64,

    #[envconfig(from = "RATE_LIMIT", default = "120")]
    rate_limit: u64,

    #[envconfig(from = "RATE_LIMIT_WINDOW_SECS", default = "60")]
    rate_limit_window_secs: u64,

    #[envconfig(from = "RATE_LIMIT_KEY_PREFIX", default = "rate_limit")]
    rate_limit_key_prefix: String,

    #[envconfig(from = "RATE_LIMIT_BACKEND", default = "redis")]
    rate_limit_backend: StoreBackend,
}

impl From<EnvConfig> for Config {
    fn from(env: EnvConfig) -> Self {
        Self {
            server: ServerConfig {
                bind_addr: env.bind_addr,
                trust_proxy_headers: env.trust_proxy_headers,
            },
            redis: RedisConfig {
                url: env.redis_url.filter(|url| !url.is_empty()),
                host: env.redis_host,
                port: env.redis_port,
                password: env.redis_password,
                db: env.redis_db,
                pool_size: env.redis_pool_size,
                connect_timeout: Duration::from_millis(env.redis_connect_timeout_ms),
                command_timeout: Duration::from_millis(env.redis_command_timeout_ms),
                min_retry_backoff: Duration::from_millis(env.redis_min_retry_backoff_ms),
                max_retry_backoff: Duration::from_millis(env.redis_max_retry_backoff_ms),
            },
            rate_limit: RateLimitConfig {
                limit: env.rate_limit,
                window: Duration::from_secs(env.rate_limit_window_secs),
                key_prefix: env.rate_limit_key_prefix,
                backend: env.rate_limit_backend,
            },
            log_level: env.log_level,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        EnvConfig::init_from_env().map(Config::from)
    }

    /// Load configuration from a JSON file. Missing sections take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TurnstileError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TurnstileError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&raw).map_err(|e| {
            TurnstileError::Config(format!("cannot parse {}: {}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_defaults() {
        let config = Config::from(EnvConfig::init_from_hashmap(&HashMap::new()).unwrap());

        assert_eq!(config.server.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert!(config.server.trust_proxy_headers);
        assert_eq!(config.rate_limit.limit, 120);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.rate_limit.key_prefix, "rate_limit");
        assert_eq!(config.rate_limit.backend, StoreBackend::Redis);
        assert_eq!(config.redis.pool_size, 10);
        assert_eq!(config.redis.command_timeout, Duration::from_secs(3));
        assert_eq!(config.redis.connection_url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_env_overrides() {
        let mut vars = HashMap::new();
        vars.insert("RATE_LIMIT".to_string(), "2".to_string());
        vars.insert("RATE_LIMIT_WINDOW_SECS".to_string(), "10".to_string());
        vars.insert("RATE_LIMIT_BACKEND".to_string(), "Memory".to_string());
        vars.insert("REDIS_PASSWORD".to_string(), "s3cret".to_string());
        vars.insert("REDIS_DB".to_string(), "3".to_string());

        let config = Config::from(EnvConfig::init_from_hashmap(&vars).unwrap());

        assert_eq!(config.rate_limit.limit, 2);
        assert_eq!(config.rate_limit.window, Duration::from_secs(10));
        assert_eq!(config.rate_limit.backend, StoreBackend::Memory);
        assert_eq!(
            config.redis.connection_url(),
            "redis://:s3cret@127.0.0.1:6379/3"
        );
        assert_eq!(config.redis.redacted_url(), "redis://***@127.0.0.1:6379/3");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut vars = HashMap::new();
        vars.insert("RATE_LIMIT_BACKEND".to_string(), "memcached".to_string());
        assert!(EnvConfig::init_from_hashmap(&vars).is_err());
    }

    #[test]
    fn test_json_with_humantime_durations() {
        let config: Config = serde_json::from_str(
            r#"{
                "server": { "bind_addr": "127.0.0.1:9000" },
                "redis": { "host": "cache", "command_timeout": "250ms" },
                "rate_limit": { "limit": 5, "window": "2m", "backend": "memory" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.server.bind_addr.port(), 9000);
        assert_eq!(config.redis.host, "cache");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis.command_timeout, Duration::from_millis(250));
        assert_eq!(config.rate_limit.limit, 5);
        assert_eq!(config.rate_limit.window, Duration::from_secs(120));
        assert_eq!(config.rate_limit.backend, StoreBackend::Memory);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_url_override_wins() {
        let redis = RedisConfig {
            url: Some("rediss://cache.internal:6380/1".to_string()),
            password: Some("ignored".to_string()),
            ..RedisConfig::default()
        };
        assert_eq!(redis.connection_url(), "rediss://cache.internal:6380/1");
        assert_eq!(redis.redacted_url(), "rediss://cache.internal:6380/1");
    }

    #[test]
    fn test_reconnect_backoff_spans_bounds() {
        let backoff = RedisConfig::default().reconnect_backoff();
        // 8, 16, 32, 64, 128, 256, 512 ms
        assert_eq!(
            backoff,
            ReconnectBackoff {
                exponent_base: 2,
                factor: 4,
                retries: 7,
            }
        );

        let tight = RedisConfig {
            min_retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_millis(100),
            ..RedisConfig::default()
        };
        assert_eq!(tight.reconnect_backoff().retries, 1);
    }
}
