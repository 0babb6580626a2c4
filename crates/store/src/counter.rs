use async_trait::async_trait;

use crate::error::StoreError;

/// Counts keys in an external key-value store.
///
/// Implementations must not panic on store failures; every failure is an
/// `Err` so the caller can substitute a degraded value. Key enumeration order
/// is irrelevant and the count may be approximate.
#[async_trait]
pub trait KeyCounter: Send + Sync {
    /// Count all keys whose name matches the glob `pattern`.
    async fn count_matching(&self, pattern: &str) -> Result<u64, StoreError>;
}
