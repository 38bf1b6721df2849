use crate::config::{Config, RateLimitConfig, RedisConfig, StoreBackend};
use crate::error::TurnstileError;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static KEY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_:\-]+$").expect("valid key prefix pattern"));

const MAX_POOL_SIZE: usize = 256;
const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the whole configuration before the server starts.
    pub fn validate(config: &Config) -> Result<(), TurnstileError> {
        Self::validate_rate_limit(&config.rate_limit)?;

        // The memory backend never opens a connection.
        if config.rate_limit.backend == StoreBackend::Redis {
            Self::validate_redis(&config.redis)?;
        }

        Ok(())
    }

    pub fn validate_rate_limit(rate_limit: &RateLimitConfig) -> Result<(), TurnstileError> {
        if rate_limit.limit == 0 {
            return Err(invalid("Rate limit must be greater than 0"));
        }

        if rate_limit.limit > i64::MAX as u64 {
            return Err(invalid("Rate limit exceeds the counter range"));
        }

        if rate_limit.window < Duration::from_secs(1) {
            return Err(invalid("Rate limit window must be at least 1 second"));
        }

        if rate_limit.window > MAX_WINDOW {
            return Err(invalid("Rate limit window cannot exceed 365 days"));
        }

        if !KEY_PREFIX.is_match(&rate_limit.key_prefix) {
            return Err(invalid(
                "Rate limit key prefix can only contain alphanumeric characters, ':', '-' and '_'",
            ));
        }

        Ok(())
    }

    pub fn validate_redis(redis: &RedisConfig) -> Result<(), TurnstileError> {
        Self::validate_redis_url(&redis.connection_url())?;

        if redis.pool_size == 0 || redis.pool_size > MAX_POOL_SIZE {
            return Err(invalid(&format!(
                "Redis pool size must be between 1 and {}",
                MAX_POOL_SIZE
            )));
        }

        if redis.connect_timeout.is_zero() || redis.command_timeout.is_zero() {
            return Err(invalid("Redis timeouts must be greater than 0"));
        }

        if redis.min_retry_backoff > redis.max_retry_backoff {
            return Err(invalid(
                "Redis min retry backoff cannot exceed max retry backoff",
            ));
        }

        Ok(())
    }

    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), TurnstileError> {
        if url.is_empty() {
            return Err(invalid("Redis URL cannot be empty"));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(invalid(
                "Redis URL must start with 'redis://' or 'rediss://'",
            ));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> TurnstileError {
    TurnstileError::Config(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let mut config = Config::default();
        config.rate_limit.limit = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_sub_second_window_rejected() {
        let mut config = Config::default();
        config.rate_limit.window = Duration::from_millis(500);
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_window_upper_bound() {
        let mut config = Config::default();
        config.rate_limit.window = MAX_WINDOW;
        assert!(ConfigValidator::validate(&config).is_ok());

        config.rate_limit.window = MAX_WINDOW + Duration::from_secs(1);
        assert!(ConfigValidator::validate(&config).is_err());

        config.rate_limit.window = Duration::from_secs(u64::MAX);
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_key_prefix_charset() {
        let mut config = Config::default();
        config.rate_limit.key_prefix = "api:v1_rate-limit".to_string();
        assert!(ConfigValidator::validate(&config).is_ok());

        config.rate_limit.key_prefix = "rate limit".to_string();
        assert!(ConfigValidator::validate(&config).is_err());

        config.rate_limit.key_prefix = String::new();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_redis_url_validation() {
        assert!(ConfigValidator::validate_redis_url("redis://localhost:6379").is_ok());
        assert!(ConfigValidator::validate_redis_url("rediss://localhost:6380").is_ok());
        assert!(ConfigValidator::validate_redis_url("http://localhost").is_err());
        assert!(ConfigValidator::validate_redis_url("").is_err());
    }

    #[test]
    fn test_pool_and_backoff_bounds() {
        let mut config = Config::default();
        config.redis.pool_size = 0;
        assert!(ConfigValidator::validate(&config).is_err());

        let mut config = Config::default();
        config.redis.min_retry_backoff = Duration::from_secs(1);
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_memory_backend_skips_redis_checks() {
        let mut config = Config::default();
        config.rate_limit.backend = StoreBackend::Memory;
        config.redis.pool_size = 0;
        assert!(ConfigValidator::validate(&config).is_ok());
    }
}
