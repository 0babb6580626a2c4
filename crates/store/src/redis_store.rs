//! Redis-backed [`KeyCounter`].
//!
//! Keys are counted with a full `SCAN` cursor walk using the configured
//! `COUNT` hint, so a single count never blocks the server the way `KEYS`
//! would. SCAN may report a key more than once while the keyspace is
//! rehashing; duplicates are not filtered, the result is approximate.
//!
//! One multiplexed connection is shared by all concurrent counts. It is
//! opened lazily with a single attempt bounded by the command timeout. If
//! that attempt fails, the remaining attempts of the backoff series run in
//! a background task while counts fail fast with
//! [`StoreError::Unavailable`], so a down store never stalls a sampling
//! tick. When the series is exhausted the store stays unavailable for
//! [`RedisConfig::retry_cooldown`], after which the next count starts over.

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RedisConfig;
use crate::counter::KeyCounter;
use crate::error::StoreError;
use crate::reconnect::{next_delay, retry_with_backoff, ReconnectConfig};

enum ConnState {
    Idle,
    Ready(MultiplexedConnection),
    /// A background task is working through the backoff series.
    Reconnecting {
        attempts: u32,
        reason: String,
    },
    Unavailable {
        retry_at: Instant,
        attempts: u32,
        reason: String,
    },
}

struct Inner {
    client: redis::Client,
    config: RedisConfig,
    conn: Mutex<ConnState>,
}

pub struct RedisStore {
    inner: Arc<Inner>,
}

impl RedisStore {
    /// Create a store client. No connection is made until the first count.
    pub fn new(config: RedisConfig) -> Result<Self, StoreError> {
        let url = config.url();
        let client = redis::Client::open(url.as_str())
            .map_err(|e| StoreError::InvalidAddress(format!("{url}: {e}")))?;
        tracing::info!(host = %config.host, port = config.port, "Redis store configured");
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                config,
                conn: Mutex::new(ConnState::Idle),
            }),
        })
    }

    /// Return the shared connection, or fail fast while the store is down.
    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut state = self.inner.conn.lock().await;

        match &*state {
            ConnState::Ready(conn) => return Ok(conn.clone()),
            ConnState::Reconnecting { attempts, reason } => {
                return Err(StoreError::Unavailable {
                    attempts: *attempts,
                    reason: reason.clone(),
                });
            }
            ConnState::Unavailable {
                retry_at,
                attempts,
                reason,
            } if Instant::now() < *retry_at => {
                return Err(StoreError::Unavailable {
                    attempts: *attempts,
                    reason: reason.clone(),
                });
            }
            _ => {}
        }

        let config = &self.inner.config;
        match self.inner.connect_once().await {
            Ok(conn) => {
                tracing::info!(host = %config.host, port = config.port, "Connected to Redis");
                *state = ConnState::Ready(conn.clone());
                Ok(conn)
            }
            Err(e) => {
                let reason = e.to_string();
                if config.reconnect.max_attempts > 1 {
                    tracing::warn!(error = %reason, "Redis connection failed, reconnecting in background");
                    *state = ConnState::Reconnecting {
                        attempts: 1,
                        reason: reason.clone(),
                    };
                    tokio::spawn(reconnect(Arc::clone(&self.inner)));
                } else {
                    tracing::error!(error = %reason, "Redis connection failed");
                    *state = ConnState::Unavailable {
                        retry_at: Instant::now() + config.retry_cooldown,
                        attempts: 1,
                        reason: reason.clone(),
                    };
                }
                Err(StoreError::Unavailable {
                    attempts: 1,
                    reason,
                })
            }
        }
    }

    /// Drop the cached connection so the next call reconnects.
    async fn invalidate(&self) {
        let mut state = self.inner.conn.lock().await;
        if matches!(*state, ConnState::Ready(_)) {
            tracing::warn!("Dropping broken Redis connection");
            *state = ConnState::Idle;
        }
    }
}

impl Inner {
    async fn connect_once(&self) -> Result<MultiplexedConnection, StoreError> {
        let timeout = self.config.command_timeout;
        match tokio::time::timeout(timeout, self.client.get_multiplexed_async_connection()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(StoreError::Redis(e)),
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }
}

/// Finish the backoff series after a failed inline attempt, then publish
/// the outcome: a ready connection or a cool-down.
async fn reconnect(inner: Arc<Inner>) {
    let backoff = &inner.config.reconnect;
    let max_attempts = backoff.max_attempts.max(1);
    // The first attempt (and its delay) already happened inline.
    let remaining = ReconnectConfig {
        initial_delay: next_delay(backoff.initial_delay, backoff),
        max_attempts: max_attempts - 1,
        ..backoff.clone()
    };
    tokio::time::sleep(backoff.initial_delay).await;

    let shared: &Inner = &inner;
    let result = retry_with_backoff(&remaining, |attempt| async move {
        let result = shared.connect_once().await;
        if let Err(e) = &result {
            if let ConnState::Reconnecting { attempts, reason } = &mut *shared.conn.lock().await {
                *attempts = attempt + 1;
                *reason = e.to_string();
            }
        }
        result
    })
    .await;

    let mut state = inner.conn.lock().await;
    match result {
        Ok(conn) => {
            tracing::info!(host = %inner.config.host, port = inner.config.port, "Reconnected to Redis");
            *state = ConnState::Ready(conn);
        }
        Err(e) => {
            tracing::error!(
                attempts = max_attempts,
                cooldown_ms = inner.config.retry_cooldown.as_millis() as u64,
                error = %e,
                "Redis unreachable, cooling down",
            );
            *state = ConnState::Unavailable {
                retry_at: Instant::now() + inner.config.retry_cooldown,
                attempts: max_attempts,
                reason: e.to_string(),
            };
        }
    }
}

#[async_trait]
impl KeyCounter for RedisStore {
    async fn count_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let timeout = self.inner.config.command_timeout;
        let batch = self.inner.config.scan_batch;

        match tokio::time::timeout(timeout, scan_count(&mut conn, pattern, batch))
            .await
        {
            Ok(Ok(count)) => Ok(count),
            Ok(Err(e)) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                    self.invalidate().await;
                }
                Err(StoreError::Redis(e))
            }
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }
}

/// Walk the SCAN cursor for `pattern` until it wraps back to 0.
async fn scan_count(
    conn: &mut MultiplexedConnection,
    pattern: &str,
    batch: usize,
) -> redis::RedisResult<u64> {
    let mut cursor: u64 = 0;
    let mut total: u64 = 0;

    loop {
        let (next, keys): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(batch)
            .query_async(conn)
            .await?;

        total += keys.len() as u64;
        if next == 0 {
            return Ok(total);
        }
        cursor = next;
    }
}
