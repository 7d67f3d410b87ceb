//! Client configuration.

use crate::tree::BatchLimits;
use serde::{Deserialize, Serialize};
use wisp_storage::StorageConfig;

/// Settings shared by every operation of a [`crate::Client`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Storage scope opened per operation.
    pub storage: StorageConfig,
    /// Missing subtrees requested per round trip.
    pub batch_size: usize,
    /// Times a missing subtree is re-requested before giving up.
    pub max_retries: usize,
    /// Round trips allowed while flattening one tree.
    pub max_batches: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let limits = BatchLimits::default();
        Self {
            storage: StorageConfig::default(),
            batch_size: limits.batch_size,
            max_retries: limits.max_retries,
            max_batches: limits.max_batches,
        }
    }
}

impl ClientConfig {
    /// Batch limits for the tree materializer.
    pub fn limits(&self) -> BatchLimits {
        BatchLimits {
            batch_size: self.batch_size.max(1),
            max_retries: self.max_retries,
            max_batches: self.max_batches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wisp_storage::StorageMode;

    #[test]
    fn test_defaults_match_batch_limits() {
        let config = ClientConfig::default();
        assert_eq!(config.limits(), BatchLimits::default());
        assert_eq!(config.storage.mode, StorageMode::Auto);
    }

    #[test]
    fn test_partial_json() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"batch_size": 25, "storage": {"mode": "memory"}}"#).unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.storage.mode, StorageMode::Memory);
    }

    #[test]
    fn test_zero_batch_size_clamped() {
        let config = ClientConfig {
            batch_size: 0,
            ..ClientConfig::default()
        };
        assert_eq!(config.limits().batch_size, 1);
    }
}
