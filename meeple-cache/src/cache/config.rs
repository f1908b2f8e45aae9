//! Configuration for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Hard ceiling on keys requested per `SCAN` iteration.
pub const MAX_SCAN_BATCH: usize = 1000;

/// Configuration for the answer cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live applied to entry, metadata and tag-index membership
    pub default_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0)
    /// One jittered TTL is drawn per write and shared by everything it touches
    pub ttl_jitter: f64,

    /// Upper bound for a single backend round-trip
    pub operation_timeout: Duration,

    /// Keys requested per SCAN iteration and per batched delete
    pub scan_batch_size: usize,

    /// Pause between replayed tokens
    pub replay_token_delay: Duration,

    /// Number of hot queries reported by `GetStats`
    pub top_questions_limit: usize,

    /// Enumerate live keys to compute `totalKeys` / `cacheSizeBytes`
    pub size_scan_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // 24 hours
            default_ttl: Duration::from_secs(24 * 3600),
            ttl_jitter: 0.0,
            operation_timeout: Duration::from_secs(2),
            scan_batch_size: MAX_SCAN_BATCH,
            replay_token_delay: Duration::from_millis(10),
            top_questions_limit: 10,
            size_scan_enabled: true,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Defaults overlaid with `CACHE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("CACHE_TTL_SECONDS")? {
            config.default_ttl = Duration::from_secs(secs);
        }
        if let Some(jitter) = env_parse::<f64>("CACHE_TTL_JITTER")? {
            config.ttl_jitter = jitter;
        }
        if let Some(ms) = env_parse::<u64>("CACHE_OPERATION_TIMEOUT_MS")? {
            config.operation_timeout = Duration::from_millis(ms);
        }
        if let Some(batch) = env_parse::<usize>("CACHE_SCAN_BATCH_SIZE")? {
            config.scan_batch_size = batch;
        }
        if let Some(ms) = env_parse::<u64>("CACHE_REPLAY_DELAY_MS")? {
            config.replay_token_delay = Duration::from_millis(ms);
        }
        if let Some(limit) = env_parse::<usize>("CACHE_TOP_QUESTIONS")? {
            config.top_questions_limit = limit;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(CacheError::ConfigError(
                "default_ttl must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::ConfigError(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.operation_timeout.is_zero() {
            return Err(CacheError::ConfigError(
                "operation_timeout must be greater than 0".to_string(),
            ));
        }

        if self.scan_batch_size == 0 || self.scan_batch_size > MAX_SCAN_BATCH {
            return Err(CacheError::ConfigError(format!(
                "scan_batch_size must be between 1 and {}",
                MAX_SCAN_BATCH
            )));
        }

        if self.top_questions_limit == 0 {
            return Err(CacheError::ConfigError(
                "top_questions_limit must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Calculate actual TTL with jitter applied
    pub fn ttl_with_jitter(&self, base: Duration) -> Duration {
        if self.ttl_jitter == 0.0 {
            return base;
        }

        let base_secs = base.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::from_secs_f64(final_secs)
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    default_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    operation_timeout: Option<Duration>,
    scan_batch_size: Option<usize>,
    replay_token_delay: Option<Duration>,
    top_questions_limit: Option<usize>,
    size_scan_enabled: Option<bool>,
}

impl CacheConfigBuilder {
    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set the per-round-trip backend timeout
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Set keys per SCAN iteration
    pub fn scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = Some(size);
        self
    }

    /// Set the pause between replayed tokens
    pub fn replay_token_delay(mut self, delay: Duration) -> Self {
        self.replay_token_delay = Some(delay);
        self
    }

    /// Set how many hot queries `GetStats` reports
    pub fn top_questions_limit(mut self, limit: usize) -> Self {
        self.top_questions_limit = Some(limit);
        self
    }

    /// Enable or disable live key enumeration in `GetStats`
    pub fn size_scan_enabled(mut self, enable: bool) -> Self {
        self.size_scan_enabled = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            operation_timeout: self.operation_timeout.unwrap_or(defaults.operation_timeout),
            scan_batch_size: self.scan_batch_size.unwrap_or(defaults.scan_batch_size),
            replay_token_delay: self
                .replay_token_delay
                .unwrap_or(defaults.replay_token_delay),
            top_questions_limit: self
                .top_questions_limit
                .unwrap_or(defaults.top_questions_limit),
            size_scan_enabled: self.size_scan_enabled.unwrap_or(defaults.size_scan_enabled),
        }
    }
}

/// Connection settings for the Redis cache and the Neo4j stats store
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub redis_url: String,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub neo4j_database: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: "password".to_string(),
            neo4j_database: "neo4j".to_string(),
        }
    }
}

impl BackendSettings {
    /// Read `REDIS_URL` and `NEO4J_*`, falling back to local defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str, fallback: String| std::env::var(name).unwrap_or(fallback);

        Self {
            redis_url: var("REDIS_URL", defaults.redis_url),
            neo4j_uri: var("NEO4J_URI", defaults.neo4j_uri),
            neo4j_user: var("NEO4J_USER", defaults.neo4j_user),
            neo4j_password: var("NEO4J_PASSWORD", defaults.neo4j_password),
            neo4j_database: var("NEO4J_DATABASE", defaults.neo4j_database),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| CacheError::ConfigError(format!("{} has invalid value '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(86_400));
        assert_eq!(config.replay_token_delay, Duration::from_millis(10));
        assert_eq!(config.scan_batch_size, 1000);
        assert_eq!(config.top_questions_limit, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid_config = CacheConfig::default();
        invalid_config.scan_batch_size = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.scan_batch_size = 5000;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.ttl_jitter = 1.5;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.default_ttl = Duration::ZERO;
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::builder()
            .default_ttl(Duration::from_secs(600))
            .scan_batch_size(50)
            .replay_token_delay(Duration::ZERO)
            .build();

        assert_eq!(config.default_ttl, Duration::from_secs(600));
        assert_eq!(config.scan_batch_size, 50);
        assert_eq!(config.replay_token_delay, Duration::ZERO);
        assert_eq!(config.top_questions_limit, 10);
    }

    #[test]
    fn test_ttl_with_jitter() {
        let config = CacheConfig {
            ttl_jitter: 0.1,
            ..Default::default()
        };

        let base = Duration::from_secs(3600);
        let ttl = config.ttl_with_jitter(base);

        assert!(ttl.as_secs_f64() >= 3600.0 - 360.0);
        assert!(ttl.as_secs_f64() <= 3600.0 + 360.0);
    }

    #[test]
    fn test_ttl_without_jitter_is_exact() {
        let config = CacheConfig::default();
        let base = Duration::from_secs(42);
        assert_eq!(config.ttl_with_jitter(base), base);
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        std::env::set_var("MEEPLE_TEST_BAD_NUMBER", "twelve");
        let parsed = env_parse::<u64>("MEEPLE_TEST_BAD_NUMBER");
        assert!(matches!(parsed, Err(CacheError::ConfigError(_))));

        std::env::set_var("MEEPLE_TEST_GOOD_NUMBER", " 12 ");
        assert_eq!(env_parse::<u64>("MEEPLE_TEST_GOOD_NUMBER").unwrap(), Some(12));

        assert_eq!(env_parse::<u64>("MEEPLE_TEST_UNSET_NUMBER").unwrap(), None);
    }
}
