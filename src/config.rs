use crate::error::AppError;
use crate::resilience::RetryConfig;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Upper bound for every single storage call
    pub timeout_ms: u64,
    /// How often a conflicting conditional write is re-attempted
    pub max_conflict_retries: u32,
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct BatchingConfig {
    /// Idle time after which the latest batch is closed
    pub window_secs: u64,
    /// Batch size at which the latest batch is closed
    pub max_messages: usize,
}

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Deadline for a single Redis PUBLISH before local delivery takes over
    pub publish_timeout_ms: u64,
    /// Ceiling for the listener's resubscribe backoff
    pub listener_max_backoff_ms: u64,
}

impl FanoutConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Resubscribe schedule for the `chat:*` listener. It never gives up, so
    /// only the backoff fields matter.
    pub fn listener_retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: u32::MAX,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_millis(self.listener_max_backoff_ms),
            ..Default::default()
        }
    }
}

/// Bounds for the global (administrative) conversation listing
#[derive(Debug, Clone)]
pub struct ListingConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// PostgreSQL backend; the in-memory store is used when unset
    pub database_url: Option<String>,
    pub db_max_connections: usize,
    /// Cross-instance fan-out; local-only delivery when unset
    pub redis_url: Option<String>,
    pub storage: StorageConfig,
    pub batching: BatchingConfig,
    pub listing: ListingConfig,
    pub fanout: FanoutConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars<F>(var: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let listing = ListingConfig {
            default_limit: parse_or(&var, "CHAT_LIST_DEFAULT_LIMIT", 50)?,
            max_limit: parse_or(&var, "CHAT_LIST_MAX_LIMIT", 200)?,
        };
        if listing.default_limit == 0 || listing.default_limit > listing.max_limit {
            return Err(AppError::Config(
                "CHAT_LIST_DEFAULT_LIMIT must be between 1 and CHAT_LIST_MAX_LIMIT".into(),
            ));
        }

        let batching = BatchingConfig {
            window_secs: parse_or(&var, "BATCH_WINDOW_SECS", 3600)?,
            max_messages: parse_or(&var, "BATCH_MAX_MESSAGES", 100)?,
        };
        if batching.max_messages == 0 {
            return Err(AppError::Config("BATCH_MAX_MESSAGES must be positive".into()));
        }

        Ok(Self {
            port: parse_or(&var, "PORT", 3000)?,
            database_url: non_empty("DATABASE_URL"),
            db_max_connections: parse_or(&var, "DB_MAX_CONNECTIONS", 10)?,
            redis_url: non_empty("REDIS_URL"),
            storage: StorageConfig {
                timeout_ms: parse_or(&var, "STORAGE_TIMEOUT_MS", 5000)?,
                max_conflict_retries: parse_or(&var, "STORAGE_MAX_CONFLICT_RETRIES", 5)?,
            },
            batching,
            listing,
            fanout: FanoutConfig {
                publish_timeout_ms: parse_or(&var, "REDIS_PUBLISH_TIMEOUT_MS", 500)?,
                listener_max_backoff_ms: parse_or(&var, "REDIS_LISTENER_MAX_BACKOFF_MS", 30_000)?,
            },
        })
    }

    /// Defaults with the in-memory store and no Redis
    pub fn test_defaults() -> Self {
        Self {
            port: 3000,
            database_url: None,
            db_max_connections: 10,
            redis_url: None,
            storage: StorageConfig {
                timeout_ms: 5000,
                max_conflict_retries: 5,
            },
            batching: BatchingConfig {
                window_secs: 3600,
                max_messages: 100,
            },
            listing: ListingConfig {
                default_limit: 50,
                max_limit: 200,
            },
            fanout: FanoutConfig {
                publish_timeout_ms: 500,
                listener_max_backoff_ms: 30_000,
            },
        }
    }
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key}: {e}"))),
        _ => Ok(default),
    }
}
