//! In-memory storage backend.

use crate::{GitObject, ObjectId, ObjectStorage, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Keeps every object in a hash map guarded by a read-write lock.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<ObjectId, GitObject>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every stored object.
    pub fn snapshot(&self) -> Vec<GitObject> {
        self.objects.read().values().cloned().collect()
    }
}

impl ObjectStorage for MemoryStorage {
    fn add(&self, objects: &[GitObject]) -> Result<()> {
        let mut map = self.objects.write();
        for object in objects {
            map.entry(object.id).or_insert_with(|| object.clone());
        }
        Ok(())
    }

    fn get(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        Ok(self.objects.read().get(id).cloned())
    }

    fn has(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.objects.read().contains_key(id))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.objects.read().len())
    }
}
