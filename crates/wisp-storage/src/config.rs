//! Storage selection.

use crate::{AutoStorage, DiskStorage, MemoryStorage, ObjectStorage, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Which backend a storage scope uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Keep everything in memory.
    Memory,
    /// Write loose objects to a temporary directory.
    Disk,
    /// Start in memory and spill to disk past a threshold.
    #[default]
    Auto,
}

/// Storage configuration for one fetch scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selection.
    pub mode: StorageMode,
    /// Object count above which `Auto` spills to disk.
    pub threshold: usize,
    /// Parent directory for temporary disk scopes. Defaults to the system temp dir.
    pub directory: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Auto,
            threshold: 10_000,
            directory: None,
        }
    }
}

impl StorageConfig {
    /// Opens a fresh, empty storage scope.
    pub fn open(&self) -> Result<Arc<dyn ObjectStorage>> {
        Ok(match self.mode {
            StorageMode::Memory => Arc::new(MemoryStorage::new()),
            StorageMode::Disk => match &self.directory {
                Some(dir) => Arc::new(DiskStorage::temporary_in(dir)?),
                None => Arc::new(DiskStorage::temporary()?),
            },
            StorageMode::Auto => {
                let auto = AutoStorage::new(self.threshold);
                match &self.directory {
                    Some(dir) => Arc::new(auto.with_directory(dir)),
                    None => Arc::new(auto),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GitObject;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.mode, StorageMode::Auto);
        assert_eq!(config.threshold, 10_000);
        assert!(config.directory.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: StorageConfig = serde_json::from_str(r#"{"mode":"disk"}"#).unwrap();
        assert_eq!(config.mode, StorageMode::Disk);
        assert_eq!(config.threshold, 10_000);
    }

    #[test]
    fn test_open_each_mode() {
        let dir = tempfile::tempdir().unwrap();
        for mode in [StorageMode::Memory, StorageMode::Disk, StorageMode::Auto] {
            let config = StorageConfig {
                mode,
                threshold: 1,
                directory: Some(dir.path().to_path_buf()),
            };
            let storage = config.open().unwrap();
            let objects = [GitObject::blob(b"a".to_vec()), GitObject::blob(b"b".to_vec())];
            storage.add(&objects).unwrap();
            assert_eq!(storage.len().unwrap(), 2);
            assert!(storage.has(&objects[1].id).unwrap());
        }
    }

    #[test]
    fn test_scopes_are_independent() {
        let config = StorageConfig {
            mode: StorageMode::Memory,
            ..Default::default()
        };
        let first = config.open().unwrap();
        first.add(&[GitObject::blob(b"only here".to_vec())]).unwrap();
        let second = config.open().unwrap();
        assert!(second.is_empty().unwrap());
    }
}
