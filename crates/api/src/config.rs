use std::path::PathBuf;
use std::time::Duration;

use qpulse_core::config::{env_opt, env_or, ConfigError};
use qpulse_core::keys::{KeyPatterns, DEFAULT_QUEUE_NAMESPACE};

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    /// A single `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds. Must exceed the long-poll wait.
    pub request_timeout_secs: u64,
    /// How long shutdown waits for background tasks to finish.
    pub shutdown_timeout_secs: u64,
    /// Pre-built dashboard assets served at `/`, if any.
    pub static_dir: Option<PathBuf>,
    pub sampler: SamplerConfig,
    pub transport: TransportConfig,
}

/// Sampling cadence and the key namespaces to count.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Fixed delay between the end of one tick and the start of the next.
    pub interval: Duration,
    pub queue_namespace: String,
    pub worker_namespace: String,
}

/// Viewer transport timings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Longest a `GET /poll` waits for a message before returning empty.
    pub poll_wait: Duration,
    /// A polling session that has not polled for this long is dropped.
    pub poll_timeout: Duration,
    /// Interval between WebSocket Ping frames.
    pub heartbeat_interval: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default           |
    /// |---------------------------|-------------------|
    /// | `HOST`                    | `0.0.0.0`         |
    /// | `PORT`                    | `3000`            |
    /// | `CORS_ORIGINS`            | `*`               |
    /// | `REQUEST_TIMEOUT_SECS`    | `60`              |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `10`              |
    /// | `STATIC_DIR`              | unset             |
    /// | `SAMPLE_INTERVAL_MS`      | `1000`            |
    /// | `QUEUE_NAMESPACE`         | `arq`             |
    /// | `WORKER_NAMESPACE`        | `QUEUE_NAMESPACE` |
    /// | `POLL_WAIT_SECS`          | `25`              |
    /// | `POLL_TIMEOUT_SECS`       | `60`              |
    /// | `HEARTBEAT_INTERVAL_SECS` | `25`              |
    pub fn from_env() -> Result<Self, ConfigError> {
        let cors_origins: Vec<String> = env_opt("CORS_ORIGINS")
            .unwrap_or_else(|| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let queue_namespace =
            env_opt("QUEUE_NAMESPACE").unwrap_or_else(|| DEFAULT_QUEUE_NAMESPACE.to_string());
        let worker_namespace =
            env_opt("WORKER_NAMESPACE").unwrap_or_else(|| queue_namespace.clone());

        let sampler = SamplerConfig {
            interval: Duration::from_millis(env_or("SAMPLE_INTERVAL_MS", 1000)?),
            queue_namespace,
            worker_namespace,
        };

        let transport = TransportConfig {
            poll_wait: Duration::from_secs(env_or("POLL_WAIT_SECS", 25)?),
            poll_timeout: Duration::from_secs(env_or("POLL_TIMEOUT_SECS", 60)?),
            heartbeat_interval: Duration::from_secs(env_or("HEARTBEAT_INTERVAL_SECS", 25)?.max(1)),
        };

        let config = Self {
            host: env_or("HOST", "0.0.0.0".to_string())?,
            port: env_or("PORT", 3000)?,
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 60)?,
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 10)?,
            static_dir: env_opt("STATIC_DIR").map(PathBuf::from),
            sampler,
            transport,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject timeout combinations that would cut long polls short.
    ///
    /// Both the HTTP request timeout and the idle-session timeout must
    /// exceed the poll wait; otherwise a poll that is still waiting gets a
    /// 408, or its session is reaped and the next poll returns 404.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let poll_wait = self.transport.poll_wait;

        if Duration::from_secs(self.request_timeout_secs) <= poll_wait {
            return Err(ConfigError::Invalid {
                key: "REQUEST_TIMEOUT_SECS",
                value: format!("{} (must exceed POLL_WAIT_SECS)", self.request_timeout_secs),
            });
        }
        if self.transport.poll_timeout <= poll_wait {
            return Err(ConfigError::Invalid {
                key: "POLL_TIMEOUT_SECS",
                value: format!(
                    "{} (must exceed POLL_WAIT_SECS)",
                    self.transport.poll_timeout.as_secs()
                ),
            });
        }
        Ok(())
    }
}

impl SamplerConfig {
    pub fn key_patterns(&self) -> KeyPatterns {
        KeyPatterns::new(&self.queue_namespace, &self.worker_namespace)
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            queue_namespace: DEFAULT_QUEUE_NAMESPACE.to_string(),
            worker_namespace: DEFAULT_QUEUE_NAMESPACE.to_string(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_wait: Duration::from_secs(25),
            poll_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(25),
        }
    }
}
