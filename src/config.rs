use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Rusty Docs server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Backoff settings shared by every stage's retry handler.
    pub retry: RetrySettings,
    /// Breaker settings for calls into the extraction collaborator.
    pub extraction_breaker: BreakerSettings,
    /// Breaker settings for calls into the recognition collaborator.
    pub recognition_breaker: BreakerSettings,
    /// Breaker settings for calls into the indexing collaborator.
    pub indexing_breaker: BreakerSettings,
    /// Upper bound for a single stage attempt before it counts as a failure.
    pub stage_timeout: Duration,
    /// Time-to-live applied to cached pipeline and search results.
    pub cache_ttl: Duration,
    /// Maximum number of entries each result cache retains.
    pub cache_capacity: usize,
    /// Per-client admission limits.
    pub rate_limit: RateLimitSettings,
    /// Number of items allowed to run the pipeline at the same time.
    pub worker_pool_size: usize,
    /// Largest declared source size accepted by validation, in bytes.
    pub max_file_size: u64,
    /// Lowercase file extensions (with leading dot) accepted by validation.
    pub allowed_extensions: Vec<String>,
    /// Which indexing collaborator the server wires up.
    pub index_backend: IndexBackend,
    /// Base URL of the Qdrant instance used by the `qdrant` backend.
    pub qdrant_url: String,
    /// Name of the Qdrant collection used for document vectors.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Dimensionality of the vectors produced by the hashing embedder.
    pub embedding_dimension: usize,
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied before jitter is added.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub exponential_base: f64,
}

/// Failure threshold and cool-down for one circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is allowed.
    pub recovery_timeout: Duration,
}

/// Fixed-window admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Requests admitted per client per calendar minute.
    pub per_minute: u32,
    /// Requests admitted per client per calendar hour.
    pub per_hour: u32,
    /// Age after which counters are purged.
    pub retention: Duration,
}

/// Supported indexing backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// In-process vector index, lost on restart.
    Memory,
    /// Remote Qdrant collection.
    Qdrant,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
        }
    }
}

impl BreakerSettings {
    /// Build breaker settings from a threshold and a recovery timeout in seconds.
    pub const fn new(failure_threshold: u32, recovery_secs: u64) -> Self {
        Self {
            failure_threshold,
            recovery_timeout: Duration::from_secs(recovery_secs),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1000,
            retention: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: None,
            retry: RetrySettings::default(),
            extraction_breaker: BreakerSettings::new(3, 30),
            recognition_breaker: BreakerSettings::new(3, 30),
            indexing_breaker: BreakerSettings::new(5, 60),
            stage_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(60 * 60),
            cache_capacity: 1024,
            rate_limit: RateLimitSettings::default(),
            worker_pool_size: default_worker_pool_size(),
            max_file_size: 50 * 1024 * 1024,
            allowed_extensions: [".pdf", ".jpg", ".jpeg", ".png", ".tiff", ".bmp", ".txt", ".md"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            index_backend: IndexBackend::Memory,
            qdrant_url: "http://127.0.0.1:6333".to_string(),
            qdrant_collection_name: "documents".to_string(),
            qdrant_api_key: None,
            embedding_dimension: 768,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults for
    /// anything unset and rejecting values that fail to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let retry = RetrySettings {
            max_attempts: parse_env("RETRY_MAX_ATTEMPTS")?.unwrap_or(defaults.retry.max_attempts),
            base_delay: parse_env("RETRY_BASE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_delay),
            max_delay: parse_env("RETRY_MAX_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_delay),
            exponential_base: parse_env("RETRY_EXPONENTIAL_BASE")?
                .unwrap_or(defaults.retry.exponential_base),
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("RETRY_MAX_ATTEMPTS".into()));
        }
        if !retry.exponential_base.is_finite() || retry.exponential_base < 1.0 {
            return Err(ConfigError::InvalidValue("RETRY_EXPONENTIAL_BASE".into()));
        }

        let rate_limit = RateLimitSettings {
            per_minute: parse_env("RATE_LIMIT_PER_MINUTE")?
                .unwrap_or(defaults.rate_limit.per_minute),
            per_hour: parse_env("RATE_LIMIT_PER_HOUR")?.unwrap_or(defaults.rate_limit.per_hour),
            retention: parse_env("RATE_LIMIT_RETENTION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit.retention),
        };

        let worker_pool_size = parse_env("WORKER_POOL_SIZE")?.unwrap_or(defaults.worker_pool_size);
        if worker_pool_size == 0 {
            return Err(ConfigError::InvalidValue("WORKER_POOL_SIZE".into()));
        }

        let allowed_extensions = load_env_optional("ALLOWED_EXTENSIONS")
            .map(|value| parse_extensions(&value))
            .unwrap_or(defaults.allowed_extensions);

        Ok(Self {
            server_port: parse_env("SERVER_PORT")?,
            retry,
            extraction_breaker: load_breaker("EXTRACTION", defaults.extraction_breaker)?,
            recognition_breaker: load_breaker("RECOGNITION", defaults.recognition_breaker)?,
            indexing_breaker: load_breaker("INDEXING", defaults.indexing_breaker)?,
            stage_timeout: parse_env("STAGE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.stage_timeout),
            cache_ttl: parse_env("CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_capacity: parse_env("CACHE_CAPACITY")?.unwrap_or(defaults.cache_capacity),
            rate_limit,
            worker_pool_size,
            max_file_size: parse_env("MAX_FILE_SIZE")?.unwrap_or(defaults.max_file_size),
            allowed_extensions,
            index_backend: parse_env("INDEX_BACKEND")?.unwrap_or(defaults.index_backend),
            qdrant_url: load_env_optional("QDRANT_URL").unwrap_or(defaults.qdrant_url),
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or(defaults.qdrant_collection_name),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_dimension: parse_env("EMBEDDING_DIMENSION")?
                .unwrap_or(defaults.embedding_dimension),
        })
    }
}

fn load_breaker(prefix: &str, defaults: BreakerSettings) -> Result<BreakerSettings, ConfigError> {
    let threshold_key = format!("{prefix}_BREAKER_THRESHOLD");
    let failure_threshold = parse_env(&threshold_key)?.unwrap_or(defaults.failure_threshold);
    if failure_threshold == 0 {
        return Err(ConfigError::InvalidValue(threshold_key));
    }
    Ok(BreakerSettings {
        failure_threshold,
        recovery_timeout: parse_env(&format!("{prefix}_BREAKER_RECOVERY_SECS"))?
            .map(Duration::from_secs)
            .unwrap_or(defaults.recovery_timeout),
    })
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .map(|ext| {
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{ext}")
            }
        })
        .collect()
}

fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|cores| cores.get() * 2)
        .unwrap_or(4)
}

impl FromStr for IndexBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "qdrant" => Ok(Self::Qdrant),
            _ => Err(()),
        }
    }
}

/// Load `.env` (when present) and build the configuration from the environment.
pub fn init_config() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        server_port = ?config.server_port,
        index_backend = ?config.index_backend,
        worker_pool_size = config.worker_pool_size,
        retry_attempts = config.retry.max_attempts,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        "Loaded configuration"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.rate_limit.per_minute, 60);
        assert_eq!(config.rate_limit.per_hour, 1000);
        assert_eq!(config.extraction_breaker, BreakerSettings::new(3, 30));
        assert_eq!(config.indexing_breaker, BreakerSettings::new(5, 60));
        assert!(config.worker_pool_size >= 1);
        assert!(config.allowed_extensions.contains(&".pdf".to_string()));
    }

    #[test]
    fn extension_list_is_normalized() {
        assert_eq!(
            parse_extensions(" TXT, .Pdf ,,md"),
            vec![".txt".to_string(), ".pdf".to_string(), ".md".to_string()]
        );
    }

    #[test]
    fn index_backend_parses_case_insensitively() {
        assert_eq!("Qdrant".parse::<IndexBackend>(), Ok(IndexBackend::Qdrant));
        assert_eq!("memory".parse::<IndexBackend>(), Ok(IndexBackend::Memory));
        assert!("sqlite".parse::<IndexBackend>().is_err());
    }
}
