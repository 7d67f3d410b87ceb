//! Storage backend trait.
//!
//! Every backend holds objects for the lifetime of one logical fetch
//! operation and is shared behind an `Arc` by the stages of that operation.

use crate::{GitObject, ObjectId, Result};
use std::sync::Arc;

/// Content-addressed object storage.
///
/// `add` is an idempotent upsert keyed by the object's hash. All
/// implementations are safe for concurrent `add`, `get` and `has`.
pub trait ObjectStorage: Send + Sync {
    /// Stores a batch of objects.
    fn add(&self, objects: &[GitObject]) -> Result<()>;

    /// Retrieves an object by id.
    fn get(&self, id: &ObjectId) -> Result<Option<GitObject>>;

    /// Checks if an object exists.
    fn has(&self, id: &ObjectId) -> Result<bool>;

    /// Returns the number of stored objects.
    fn len(&self) -> Result<usize>;

    /// Returns true if nothing is stored.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl<T: ObjectStorage + ?Sized> ObjectStorage for Arc<T> {
    fn add(&self, objects: &[GitObject]) -> Result<()> {
        (**self).add(objects)
    }

    fn get(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        (**self).get(id)
    }

    fn has(&self, id: &ObjectId) -> Result<bool> {
        (**self).has(id)
    }

    fn len(&self) -> Result<usize> {
        (**self).len()
    }

    fn is_empty(&self) -> Result<bool> {
        (**self).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    #[test]
    fn test_is_empty_default() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty().unwrap());
    }

    #[test]
    fn test_arc_dyn_delegates() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(MemoryStorage::new());
        let blob = GitObject::blob(b"shared".to_vec());
        storage.add(std::slice::from_ref(&blob)).unwrap();

        let shared = Arc::clone(&storage);
        assert!(shared.has(&blob.id).unwrap());
        assert_eq!(shared.len().unwrap(), 1);
    }
}
