//! Tree materialization.
//!
//! Turns a root tree into a flat, path-sorted listing. Subtrees the server
//! did not send are fetched in bounded batches; submodule entries (gitlinks)
//! point into other repositories and are never listed or fetched.

use crate::{GitError, ObjectMap, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wisp_storage::{EntryKind, GitObject, ObjectId, ObjectStorage, ObjectType};

/// Something that can fetch objects by id into a storage scope.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Fetches `ids`, returning every object the response carried.
    async fn fetch_objects(
        &self,
        ids: &[ObjectId],
        storage: &dyn ObjectStorage,
        cancel: &CancellationToken,
    ) -> Result<ObjectMap>;
}

/// One file or directory in a flattened tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatTreeEntry {
    /// Last path component.
    pub name: String,
    /// Slash-separated path from the root.
    pub path: String,
    /// Mode bits.
    pub mode: u32,
    /// Object id.
    pub id: ObjectId,
    /// Blob or tree; never a gitlink.
    pub kind: EntryKind,
}

/// Every blob and tree reachable from a root tree, sorted by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatTree {
    /// Root tree id.
    pub id: ObjectId,
    /// Entries sorted by `path`.
    pub entries: Vec<FlatTreeEntry>,
}

impl FlatTree {
    /// Looks an entry up by its full path.
    pub fn get(&self, path: &str) -> Option<&FlatTreeEntry> {
        self.entries
            .binary_search_by(|entry| entry.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true for an empty root.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over blob entries only.
    pub fn files(&self) -> impl Iterator<Item = &FlatTreeEntry> {
        self.entries.iter().filter(|e| e.kind == EntryKind::Blob)
    }
}

/// Bounds on missing-subtree fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Subtrees requested per round trip.
    pub batch_size: usize,
    /// Times a hash may come back missing before giving up.
    pub max_retries: usize,
    /// Round trips allowed for one flatten.
    pub max_batches: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retries: 3,
            max_batches: 1000,
        }
    }
}

/// Flattens tree graphs, fetching missing subtrees through an [`ObjectSource`].
pub struct TreeMaterializer<'a> {
    source: &'a dyn ObjectSource,
    storage: &'a dyn ObjectStorage,
    limits: BatchLimits,
}

impl<'a> TreeMaterializer<'a> {
    /// Creates a materializer with default limits.
    pub fn new(source: &'a dyn ObjectSource, storage: &'a dyn ObjectStorage) -> Self {
        Self {
            source,
            storage,
            limits: BatchLimits::default(),
        }
    }

    /// Overrides the batch limits.
    pub fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Flattens the tree `root`.
    ///
    /// The root must already be in `objects` or storage. Trees fetched along
    /// the way are added to `objects`.
    pub async fn flatten(
        &self,
        root: ObjectId,
        objects: &mut ObjectMap,
        cancel: &CancellationToken,
    ) -> Result<FlatTree> {
        let root_obj = self
            .lookup(&root, objects)?
            .ok_or(GitError::TreeNotFound(root))?;
        expect_tree(&root_obj)?;

        self.collect(root, objects, cancel).await?;
        let entries = emit(root, objects, cancel)?;

        debug!(root = %root, entries = entries.len(), "flattened tree");
        Ok(FlatTree { id: root, entries })
    }

    /// Makes every tree reachable from `root` available in `objects`.
    async fn collect(
        &self,
        root: ObjectId,
        objects: &mut ObjectMap,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut walk = Discovery::new(root);
        let mut misses: HashMap<ObjectId, usize> = HashMap::new();
        let mut batches = 0usize;

        loop {
            self.discover(&mut walk, objects)?;
            if walk.pending.is_empty() && walk.retries.is_empty() {
                break;
            }
            if cancel.is_cancelled() {
                return Err(GitError::Cancelled);
            }

            batches += 1;
            if batches > self.limits.max_batches {
                return Err(GitError::Protocol(format!(
                    "exceeded {} tree batches with {} trees still missing",
                    self.limits.max_batches,
                    walk.pending.len() + walk.retries.len()
                )));
            }

            let (kind, queue) = if walk.retries.is_empty() {
                ("normal", &mut walk.pending)
            } else {
                ("retry", &mut walk.retries)
            };
            let take = self.limits.batch_size.max(1).min(queue.len());
            let batch: Vec<ObjectId> = queue.drain(..take).collect();

            debug!(
                batch = batches,
                kind,
                size = batch.len(),
                pending = walk.pending.len(),
                retries = walk.retries.len(),
                "fetching missing trees"
            );

            let fetched = self.source.fetch_objects(&batch, self.storage, cancel).await?;
            let received = fetched.len();
            objects.extend(fetched);

            for id in batch {
                if self.lookup(&id, objects)?.is_some() {
                    walk.requested.remove(&id);
                    walk.queue.push_back(id);
                    continue;
                }
                let count = misses.entry(id).or_insert(0);
                *count += 1;
                if *count > self.limits.max_retries {
                    warn!(tree = %id, attempts = *count, "tree not returned after retries");
                    return Err(GitError::ObjectNotFound(id));
                }
                walk.retries.push_back(id);
            }

            debug!(batch = batches, received, "tree batch completed");
        }

        debug!(trees = walk.processed.len(), batches, "tree collection completed");
        Ok(())
    }

    /// Drains the worklist, queueing unavailable subtrees for fetching.
    fn discover(&self, walk: &mut Discovery, objects: &mut ObjectMap) -> Result<()> {
        while let Some(id) = walk.queue.pop_front() {
            if !walk.processed.insert(id) {
                continue;
            }
            let Some(tree) = self.lookup(&id, objects)? else {
                walk.processed.remove(&id);
                if walk.requested.insert(id) {
                    walk.pending.push_back(id);
                }
                continue;
            };
            expect_tree(&tree)?;

            for entry in tree.tree_entries()? {
                if entry.kind != EntryKind::Tree
                    || walk.processed.contains(&entry.id)
                    || walk.requested.contains(&entry.id)
                {
                    continue;
                }
                if self.lookup(&entry.id, objects)?.is_some() {
                    walk.queue.push_back(entry.id);
                } else {
                    walk.requested.insert(entry.id);
                    walk.pending.push_back(entry.id);
                }
            }
        }
        Ok(())
    }

    /// Finds an object in the map, then in storage, caching storage hits in the map.
    fn lookup(&self, id: &ObjectId, objects: &mut ObjectMap) -> Result<Option<GitObject>> {
        if let Some(object) = objects.get(id) {
            return Ok(Some(object.clone()));
        }
        match self.storage.get(id)? {
            Some(object) => {
                objects.insert(*id, object.clone());
                Ok(Some(object))
            }
            None => Ok(None),
        }
    }
}

/// Worklist state of the discovery phase.
struct Discovery {
    queue: VecDeque<ObjectId>,
    processed: HashSet<ObjectId>,
    pending: VecDeque<ObjectId>,
    retries: VecDeque<ObjectId>,
    requested: HashSet<ObjectId>,
}

impl Discovery {
    fn new(root: ObjectId) -> Self {
        Self {
            queue: VecDeque::from([root]),
            processed: HashSet::new(),
            pending: VecDeque::new(),
            retries: VecDeque::new(),
            requested: HashSet::new(),
        }
    }
}

/// Breadth-first listing of every blob and tree under `root`, sorted by path.
fn emit(
    root: ObjectId,
    objects: &ObjectMap,
    cancel: &CancellationToken,
) -> Result<Vec<FlatTreeEntry>> {
    let mut entries = Vec::new();
    let mut queue = VecDeque::from([(root, String::new())]);

    while let Some((id, prefix)) = queue.pop_front() {
        if cancel.is_cancelled() {
            return Err(GitError::Cancelled);
        }
        let tree = objects.get(&id).ok_or(GitError::TreeNotFound(id))?;
        for entry in tree.tree_entries()? {
            if entry.kind == EntryKind::Gitlink {
                continue;
            }
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", prefix, entry.name)
            };
            if entry.kind == EntryKind::Tree {
                queue.push_back((entry.id, path.clone()));
            }
            entries.push(FlatTreeEntry {
                name: entry.name.clone(),
                path,
                mode: entry.mode,
                id: entry.id,
                kind: entry.kind,
            });
        }
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn expect_tree(object: &GitObject) -> Result<()> {
    if object.object_type != ObjectType::Tree {
        return Err(GitError::UnexpectedObjectType {
            id: object.id,
            expected: ObjectType::Tree,
            actual: object.object_type,
        });
    }
    Ok(())
}
