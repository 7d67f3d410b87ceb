//! Storage that starts in memory and spills to disk.

use crate::{DiskStorage, GitObject, MemoryStorage, ObjectId, ObjectStorage, Result};
use parking_lot::RwLock;
use std::path::PathBuf;
use tracing::info;

enum Tier {
    Memory(MemoryStorage),
    Disk(DiskStorage),
}

impl Tier {
    fn backend(&self) -> &dyn ObjectStorage {
        match self {
            Tier::Memory(storage) => storage,
            Tier::Disk(storage) => storage,
        }
    }
}

/// Memory-first storage that moves every object to a temporary
/// [`DiskStorage`] once it holds more than `threshold` objects.
pub struct AutoStorage {
    tier: RwLock<Tier>,
    threshold: usize,
    directory: Option<PathBuf>,
}

impl AutoStorage {
    /// Creates a store that spills into the system temporary directory.
    pub fn new(threshold: usize) -> Self {
        Self {
            tier: RwLock::new(Tier::Memory(MemoryStorage::new())),
            threshold,
            directory: None,
        }
    }

    /// Spills into a temporary directory created under `directory`.
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Returns true once the objects live on disk.
    pub fn is_spilled(&self) -> bool {
        matches!(*self.tier.read(), Tier::Disk(_))
    }

    fn spill(&self, tier: &mut Tier) -> Result<()> {
        let Tier::Memory(memory) = tier else {
            return Ok(());
        };
        let disk = match &self.directory {
            Some(dir) => DiskStorage::temporary_in(dir)?,
            None => DiskStorage::temporary()?,
        };
        let objects = memory.snapshot();
        disk.add(&objects)?;
        info!(
            objects = objects.len(),
            threshold = self.threshold,
            root = %disk.root().display(),
            "spilled object storage to disk"
        );
        *tier = Tier::Disk(disk);
        Ok(())
    }
}

impl std::fmt::Debug for AutoStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoStorage")
            .field("threshold", &self.threshold)
            .field("spilled", &self.is_spilled())
            .finish()
    }
}

impl ObjectStorage for AutoStorage {
    fn add(&self, objects: &[GitObject]) -> Result<()> {
        let mut tier = self.tier.write();
        tier.backend().add(objects)?;
        if matches!(*tier, Tier::Memory(_)) && tier.backend().len()? > self.threshold {
            self.spill(&mut tier)?;
        }
        Ok(())
    }

    fn get(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        self.tier.read().backend().get(id)
    }

    fn has(&self, id: &ObjectId) -> Result<bool> {
        self.tier.read().backend().has(id)
    }

    fn len(&self) -> Result<usize> {
        self.tier.read().backend().len()
    }
}
