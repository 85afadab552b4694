//! Public types for the cache coordinator.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::storage::traits::TierStore;

/// Anything the cache can hold.
///
/// Values live as-is in the local tier and are serialized to JSON for the
/// remote and persistent tiers. Blanket-implemented.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Shared handle to a remote or persistent adapter.
pub type SharedTier = Arc<dyn TierStore>;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_cache_value<T: CacheValue>() {}

    #[test]
    fn test_common_types_are_cache_values() {
        assert_cache_value::<String>();
        assert_cache_value::<u64>();
        assert_cache_value::<Vec<String>>();
        assert_cache_value::<serde_json::Value>();
    }
}
