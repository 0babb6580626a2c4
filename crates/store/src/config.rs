use std::time::Duration;

use qpulse_core::config::{env_or, ConfigError};

use crate::reconnect::ReconnectConfig;

/// Redis connection and scan settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on one full count (all SCAN pages for one pattern).
    pub command_timeout: Duration,
    /// `COUNT` hint passed to every `SCAN` call.
    pub scan_batch: usize,
    pub reconnect: ReconnectConfig,
    /// How long the store stays marked unavailable once reconnection
    /// attempts are exhausted.
    pub retry_cooldown: Duration,
}

impl RedisConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default     |
    /// |----------------------------|-------------|
    /// | `REDIS_HOST`               | `localhost` |
    /// | `REDIS_PORT`               | `6379`      |
    /// | `REDIS_COMMAND_TIMEOUT_MS` | `2000`      |
    /// | `REDIS_SCAN_BATCH`         | `3000`      |
    /// | `REDIS_MAX_RETRIES`        | `10`        |
    /// | `REDIS_RETRY_COOLDOWN_MS`  | `1000`      |
    pub fn from_env() -> Result<Self, ConfigError> {
        let reconnect = ReconnectConfig {
            max_attempts: env_or("REDIS_MAX_RETRIES", 10u32)?.max(1),
            ..ReconnectConfig::default()
        };

        Ok(Self {
            host: env_or("REDIS_HOST", "localhost".to_string())?,
            port: env_or("REDIS_PORT", 6379)?,
            command_timeout: Duration::from_millis(env_or("REDIS_COMMAND_TIMEOUT_MS", 2000)?),
            scan_batch: env_or("REDIS_SCAN_BATCH", 3000usize)?.max(1),
            reconnect,
            retry_cooldown: Duration::from_millis(env_or("REDIS_RETRY_COOLDOWN_MS", 1000)?),
        })
    }

    /// Connection URL understood by the `redis` crate.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            command_timeout: Duration::from_millis(2000),
            scan_batch: 3000,
            reconnect: ReconnectConfig::default(),
            retry_cooldown: Duration::from_millis(1000),
        }
    }
}
