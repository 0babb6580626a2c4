use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store answered with an error, or the connection broke mid-command.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The command did not complete within the configured timeout.
    #[error("Store command timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Reconnection attempts were exhausted; the store is considered down
    /// until the cool-down elapses.
    #[error("Store unavailable after {attempts} connection attempts: {reason}")]
    Unavailable { attempts: u32, reason: String },

    /// The connection URL could not be parsed.
    #[error("Invalid store address: {0}")]
    InvalidAddress(String),
}
