//! Loose-object storage on the local filesystem.
//!
//! Objects are written the way git writes loose objects: the body
//! `"<kind> <len>\0<data>"` is zlib-compressed into `<root>/xx/yyyy…`, where
//! `xx` is the first byte of the hex id. An in-memory index answers `has`
//! without touching the filesystem and an LRU cache absorbs repeated reads
//! of hot trees during materialization.

use crate::{GitObject, ObjectId, ObjectStorage, ObjectType, Result, StorageError};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Number of decoded objects kept in the read cache.
const DEFAULT_CACHE_OBJECTS: usize = 1024;

/// Filesystem-backed storage.
pub struct DiskStorage {
    root: PathBuf,
    index: RwLock<HashSet<ObjectId>>,
    cache: Mutex<LruCache<ObjectId, GitObject>>,
    // Removes the directory on drop for temporary scopes.
    _scratch: Option<TempDir>,
}

impl DiskStorage {
    /// Opens (or creates) a store rooted at `path`, indexing objects already there.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let index = scan(&root)?;
        debug!(root = %root.display(), objects = index.len(), "opened disk storage");
        Ok(Self::with_root(root, index, None))
    }

    /// Creates a store in a fresh temporary directory that is removed on drop.
    pub fn temporary() -> Result<Self> {
        Self::temporary_in(std::env::temp_dir())
    }

    /// Creates a temporary store under `parent`.
    pub fn temporary_in(parent: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(parent.as_ref())?;
        let scratch = tempfile::Builder::new()
            .prefix("wisp-objects-")
            .tempdir_in(parent)?;
        let root = scratch.path().to_path_buf();
        debug!(root = %root.display(), "created temporary disk storage");
        Ok(Self::with_root(root, HashSet::new(), Some(scratch)))
    }

    fn with_root(root: PathBuf, index: HashSet<ObjectId>, scratch: Option<TempDir>) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_CACHE_OBJECTS).unwrap_or(NonZeroUsize::MIN);
        Self {
            root,
            index: RwLock::new(index),
            cache: Mutex::new(LruCache::new(capacity)),
            _scratch: scratch,
        }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    fn write_object(&self, object: &GitObject) -> Result<()> {
        let path = self.object_path(&object.id);
        if path.exists() {
            return Ok(());
        }
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::NotFound(path.display().to_string()))?;
        fs::create_dir_all(dir)?;

        // Write to a sibling file and rename so readers never see a partial object.
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(&encode_loose(object)?)?;
        staged.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn read_object(&self, id: &ObjectId) -> Result<GitObject> {
        let compressed = fs::read(self.object_path(id))?;
        let object = decode_loose(&compressed)?;
        if object.id != *id {
            return Err(StorageError::Corruption(format!(
                "object stored as {} hashes to {}",
                id, object.id
            )));
        }
        Ok(object)
    }
}

impl std::fmt::Debug for DiskStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStorage")
            .field("root", &self.root)
            .field("objects", &self.index.read().len())
            .finish()
    }
}

impl ObjectStorage for DiskStorage {
    fn add(&self, objects: &[GitObject]) -> Result<()> {
        for object in objects {
            if self.index.read().contains(&object.id) {
                continue;
            }
            self.write_object(object)?;
            self.index.write().insert(object.id);
        }
        Ok(())
    }

    fn get(&self, id: &ObjectId) -> Result<Option<GitObject>> {
        if let Some(object) = self.cache.lock().get(id) {
            return Ok(Some(object.clone()));
        }
        if !self.index.read().contains(id) {
            return Ok(None);
        }
        let object = self.read_object(id)?;
        self.cache.lock().put(*id, object.clone());
        Ok(Some(object))
    }

    fn has(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.index.read().contains(id))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.index.read().len())
    }
}

/// Compresses an object into the loose format.
fn encode_loose(object: &GitObject) -> Result<Vec<u8>> {
    let header = format!("{} {}\0", object.object_type.as_str(), object.data.len());
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(header.as_bytes())?;
    encoder.write_all(&object.data)?;
    Ok(encoder.finish()?)
}

/// Decompresses a loose object and recomputes its id.
fn decode_loose(compressed: &[u8]) -> Result<GitObject> {
    let mut decompressed = Vec::new();
    ZlibDecoder::new(compressed)
        .read_to_end(&mut decompressed)
        .map_err(|e| StorageError::Corruption(format!("zlib: {}", e)))?;

    let nul = decompressed
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| StorageError::Corruption("missing null byte in header".to_string()))?;
    let header = String::from_utf8_lossy(&decompressed[..nul]);
    let (kind, size) = header
        .split_once(' ')
        .ok_or_else(|| StorageError::Corruption(format!("invalid header: {}", header)))?;

    let object_type = ObjectType::parse(kind)?;
    let size: usize = size
        .parse()
        .map_err(|_| StorageError::Corruption(format!("invalid size: {}", size)))?;
    let data = &decompressed[nul + 1..];
    if data.len() != size {
        return Err(StorageError::Corruption(format!(
            "header declares {} bytes, found {}",
            size,
            data.len()
        )));
    }

    Ok(GitObject::new(object_type, Bytes::copy_from_slice(data)))
}

/// Collects the ids of loose objects under `root`.
fn scan(root: &Path) -> Result<HashSet<ObjectId>> {
    let mut index = HashSet::new();
    for fan in fs::read_dir(root)? {
        let fan = fan?;
        let prefix = fan.file_name().to_string_lossy().into_owned();
        if prefix.len() != 2 || !fan.file_type()?.is_dir() {
            continue;
        }
        for entry in fs::read_dir(fan.path())? {
            let rest = entry?.file_name().to_string_lossy().into_owned();
            if let Ok(id) = ObjectId::from_hex(&format!("{}{}", prefix, rest)) {
                index.insert(id);
            }
        }
    }
    Ok(index)
}
