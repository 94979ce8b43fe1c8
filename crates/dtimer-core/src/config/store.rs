use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the schedule store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the store directory
    pub path: PathBuf,

    /// Maximum map size for LMDB (in bytes)
    /// Default: 1GB
    #[serde(default = "default_map_size")]
    pub map_size: usize,

    /// Sync mode for durability
    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Maximum number of readers (LMDB specific)
    /// Default: 126
    #[serde(default = "default_max_readers")]
    pub max_readers: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Calls `fsync()` on every commit.
    Full,

    /// Skips syncing the meta-page on each commit (default).
    ///
    /// Committed data survives a process crash. An OS crash may lose the last
    /// transaction but leaves the store consistent.
    #[default]
    NoMetaSync,

    /// Disables `fsync()` entirely. Only for ephemeral or test stores.
    NoSync,
}

fn default_map_size() -> usize {
    1024 * 1024 * 1024 // 1GB
}

fn default_max_readers() -> u32 {
    126
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map_size: default_map_size(),
            sync_mode: SyncMode::default(),
            max_readers: default_max_readers(),
        }
    }

    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_max_readers(mut self, max_readers: u32) -> Self {
        self.max_readers = max_readers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_partial_json() {
        let cfg: StoreConfig = serde_json::from_str(r#"{"path": "/tmp/dtimer"}"#).unwrap();
        assert_eq!(cfg.map_size, 1024 * 1024 * 1024);
        assert_eq!(cfg.max_readers, 126);
        assert_eq!(cfg.sync_mode, SyncMode::NoMetaSync);
    }

    #[test]
    fn test_builder_setters() {
        let cfg = StoreConfig::new("/tmp/dtimer")
            .with_map_size(4096 * 16)
            .with_sync_mode(SyncMode::NoSync)
            .with_max_readers(8);
        assert_eq!(cfg.map_size, 4096 * 16);
        assert_eq!(cfg.sync_mode, SyncMode::NoSync);
        assert_eq!(cfg.max_readers, 8);
    }
}
