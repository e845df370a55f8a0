//! Configuration for the document store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a `DocStore` instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocStoreConfig {
    /// Data directory for snapshots, block files, and the journal.
    pub data_dir: PathBuf,

    pub index: IndexConfig,
    pub transaction: TransactionConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
}

impl Default for DocStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./docstore_data"),
            index: IndexConfig::default(),
            transaction: TransactionConfig::default(),
            cache: CacheConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Index manager feature toggles and sizing knobs (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub enable_ref_indexing: bool,
    pub enable_compound_indexes: bool,
    pub enable_partial_indexes: bool,
    pub enable_text_search: bool,
    pub enable_async_updates: bool,
    pub enable_usage_statistics: bool,
    pub async_update_queue_size: usize,
    pub text_search_language: String,
    /// B+ tree order (`m`) used by every keyed/ref index.
    pub btree_order: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enable_ref_indexing: true,
            enable_compound_indexes: false,
            enable_partial_indexes: false,
            enable_text_search: true,
            enable_async_updates: false,
            enable_usage_statistics: false,
            async_update_queue_size: 1000,
            text_search_language: "english".to_string(),
            btree_order: 64,
        }
    }
}

/// Transaction manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    #[serde(with = "humantime_secs")]
    pub timeout: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// In-memory cache capacities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries held in the document LRU cache.
    pub document_cache_capacity: usize,
    /// Maximum entries held in the block LRU cache.
    pub block_cache_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            document_cache_capacity: 10_000,
            block_cache_capacity: 1_000,
        }
    }
}

/// Block store sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub small_block_size: usize,
    pub medium_block_size: usize,
    pub large_block_size: usize,
    /// Documents whose serialized size exceeds this are compressed.
    pub compression_threshold: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            small_block_size: 4 * 1024,
            medium_block_size: 64 * 1024,
            large_block_size: 1024 * 1024,
            compression_threshold: 4 * 1024,
        }
    }
}

impl DocStoreConfig {
    /// Validate configuration, rejecting values that would leave the
    /// store unable to function (spec §10.3).
    pub fn validate(&self) -> Result<(), String> {
        if self.index.async_update_queue_size == 0 {
            return Err("async_update_queue_size must be > 0".to_string());
        }
        if self.index.btree_order < 3 {
            return Err("btree_order must be >= 3".to_string());
        }
        if self.transaction.timeout.is_zero() {
            return Err("transaction.timeout must be > 0".to_string());
        }
        if self.cache.document_cache_capacity == 0 {
            return Err("document_cache_capacity must be > 0".to_string());
        }
        if self.cache.block_cache_capacity == 0 {
            return Err("block_cache_capacity must be > 0".to_string());
        }
        if self.storage.small_block_size == 0
            || self.storage.medium_block_size == 0
            || self.storage.large_block_size == 0
        {
            return Err("block sizes must be > 0".to_string());
        }
        if self.storage.small_block_size >= self.storage.medium_block_size
            || self.storage.medium_block_size >= self.storage.large_block_size
        {
            return Err("block sizes must be strictly increasing".to_string());
        }
        Ok(())
    }
}

mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DocStoreConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_queue_size() {
        let mut config = DocStoreConfig::default();
        config.index.async_update_queue_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unordered_block_sizes() {
        let mut config = DocStoreConfig::default();
        config.storage.medium_block_size = config.storage.small_block_size;
        assert!(config.validate().is_err());
    }
}
