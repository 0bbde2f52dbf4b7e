//! Configuration structures for Ridgeline.

use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the index engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for index data files.
    pub data_dir: PathBuf,
    /// Directory for WAL files.
    pub wal_dir: PathBuf,
    /// Page size in bytes.
    pub page_size: usize,
    /// Page cache size in number of frames.
    pub cache_frames: usize,
    /// WAL segment size in bytes.
    pub wal_segment_size: u32,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
    /// Maximum serialized key size in bytes.
    pub max_key_size: usize,
    /// Maximum tree descent depth before the index is considered corrupted.
    pub max_depth: usize,
    /// Upper bound applied to cursor prefetch sizes.
    pub cursor_prefetch_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_dir: PathBuf::from("./data/wal"),
            page_size: PAGE_SIZE,
            cache_frames: 8192, // 128 MB with 16 KB pages
            wal_segment_size: 16 * 1024 * 1024, // 16 MB
            fsync_enabled: true,
            max_key_size: PAGE_SIZE / 4,
            max_depth: 64,
            cursor_prefetch_limit: 4096,
        }
    }
}

impl StorageConfig {
    /// Returns the total page cache size in bytes.
    pub fn cache_size_bytes(&self) -> usize {
        self.cache_frames * self.page_size
    }

    /// Clamps a caller-supplied prefetch size to the configured bounds.
    ///
    /// A prefetch of zero becomes one so that cursors always make progress.
    pub fn clamp_prefetch(&self, prefetch: usize) -> usize {
        match prefetch {
            0 => 1,
            n if n > self.cursor_prefetch_limit => self.cursor_prefetch_limit,
            n => n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.wal_dir, PathBuf::from("./data/wal"));
        assert_eq!(config.page_size, PAGE_SIZE);
        assert_eq!(config.cache_frames, 8192);
        assert!(config.fsync_enabled);
        assert_eq!(config.max_key_size, 4096);
        assert_eq!(config.max_depth, 64);
    }

    #[test]
    fn test_cache_size_bytes() {
        let config = StorageConfig::default();
        assert_eq!(config.cache_size_bytes(), 8192 * 16384);
    }

    #[test]
    fn test_clamp_prefetch() {
        let config = StorageConfig::default();
        assert_eq!(config.clamp_prefetch(0), 1);
        assert_eq!(config.clamp_prefetch(17), 17);
        assert_eq!(config.clamp_prefetch(1_000_000), config.cursor_prefetch_limit);
    }

    #[test]
    fn test_storage_config_serde_roundtrip() {
        let original = StorageConfig::default();
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: StorageConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(original.data_dir, deserialized.data_dir);
        assert_eq!(original.page_size, deserialized.page_size);
        assert_eq!(original.cache_frames, deserialized.cache_frames);
        assert_eq!(original.max_key_size, deserialized.max_key_size);
    }

    #[test]
    fn test_storage_config_custom() {
        let config = StorageConfig {
            data_dir: PathBuf::from("/var/lib/ridgeline"),
            cache_frames: 1024,
            fsync_enabled: false,
            ..Default::default()
        };
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/ridgeline"));
        assert_eq!(config.cache_size_bytes(), 1024 * PAGE_SIZE);
        assert!(!config.fsync_enabled);
    }
}
