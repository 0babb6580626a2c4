//! Capped exponential backoff for store reconnection.
//!
//! [`retry_with_backoff`] drives any fallible async operation (in practice,
//! opening a Redis connection) until it succeeds or the attempt budget in
//! [`ReconnectConfig`] is spent.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(3),
            multiplier: 2.0,
            max_attempts: 10,
        }
    }
}

/// Calculate the next backoff delay, clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Run `op` until it succeeds or `config.max_attempts` attempts have failed.
///
/// `op` receives the 1-based attempt number. The error of the final attempt
/// is returned when the budget is exhausted.
pub async fn retry_with_backoff<T, E, F, Fut>(config: &ReconnectConfig, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 1u32;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Store reconnected");
                }
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => {
                tracing::error!(attempts = attempt, error = %e, "Store retry attempts exhausted");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Store connection attempt failed, retrying",
                );
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, config);
                attempt += 1;
            }
        }
    }
}
