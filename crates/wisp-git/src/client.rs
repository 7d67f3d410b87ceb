//! High-level read API.
//!
//! Each public operation opens its own storage scope, so nothing fetched by
//! one call is visible to the next unless a shared storage was injected.

use crate::compare::{compare_trees, CommitFile};
use crate::config::ClientConfig;
use crate::fetch::{FetchOptions, Fetcher};
use crate::history::{CommitRecord, ListCommitsOptions};
use crate::lsrefs::{parse_ls_refs, LsRefsRequest, Ref};
use crate::transport::Transport;
use crate::tree::{FlatTree, TreeMaterializer};
use crate::{GitError, ObjectMap, Result};
use bytes::{Buf, Bytes};
use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wisp_storage::{Commit, EntryKind, GitObject, ObjectId, ObjectStorage, ObjectType, TreeEntry};

/// Read-only client for one remote repository.
pub struct Client<T> {
    fetcher: Fetcher<T>,
    config: ClientConfig,
    storage: Option<Arc<dyn ObjectStorage>>,
}

impl<T: Transport> Client<T> {
    /// Creates a client over `transport`.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            fetcher: Fetcher::new(transport),
            config,
            storage: None,
        }
    }

    /// Uses `storage` for every operation instead of a fresh scope per call.
    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The underlying fetcher.
    pub fn fetcher(&self) -> &Fetcher<T> {
        &self.fetcher
    }

    fn scope(&self) -> Result<Arc<dyn ObjectStorage>> {
        match &self.storage {
            Some(storage) => Ok(Arc::clone(storage)),
            None => Ok(self.config.storage.open()?),
        }
    }

    /// Runs a raw fetch and returns every object received.
    pub async fn fetch(
        &self,
        wants: &[ObjectId],
        options: FetchOptions,
        cancel: &CancellationToken,
    ) -> Result<ObjectMap> {
        let storage = self.scope()?;
        self.fetcher.fetch(wants, options, storage.as_ref(), cancel).await
    }

    /// Fetches a single object of any kind.
    ///
    /// Blobs other than `id` itself are filtered out of the response.
    pub async fn get_object(&self, id: ObjectId, cancel: &CancellationToken) -> Result<GitObject> {
        let storage = self.scope()?;
        self.object_in(id, FetchOptions::blobless(), storage.as_ref(), cancel)
            .await
    }

    /// Fetches and parses a commit.
    pub async fn get_commit(&self, id: ObjectId, cancel: &CancellationToken) -> Result<Commit> {
        let storage = self.scope()?;
        self.commit_in(id, FetchOptions::shallow_commit(), storage.as_ref(), cancel)
            .await
    }

    /// Fetches a blob's content.
    pub async fn get_blob(&self, id: ObjectId, cancel: &CancellationToken) -> Result<Bytes> {
        let storage = self.scope()?;
        self.blob_in(id, storage.as_ref(), cancel).await
    }

    /// Fetches a tree and returns its direct children.
    pub async fn get_tree(
        &self,
        id: ObjectId,
        cancel: &CancellationToken,
    ) -> Result<Vec<TreeEntry>> {
        let storage = self.scope()?;
        self.tree_in(id, storage.as_ref(), cancel).await
    }

    /// Returns the direct children of the directory at `path` under the tree `root`.
    ///
    /// An empty path or `.` is the root itself.
    pub async fn get_tree_by_path(
        &self,
        root: ObjectId,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<TreeEntry>> {
        let storage = self.scope()?;
        let storage = storage.as_ref();
        let mut entries = self.tree_in(root, storage, cancel).await?;

        if path.is_empty() || path == "." {
            return Ok(entries);
        }

        let parts: Vec<&str> = path.split('/').collect();
        for (depth, part) in parts.iter().enumerate() {
            let current = parts[..=depth].join("/");
            if part.trim().is_empty() {
                return Err(GitError::PathNotFound(current));
            }
            let entry = find_entry(&entries, part, &current)?;
            if entry.kind != EntryKind::Tree {
                return Err(GitError::UnexpectedObjectType {
                    id: entry.id,
                    expected: ObjectType::Tree,
                    actual: entry_type(entry.kind),
                });
            }
            debug!(depth = depth + 1, path = %current, "descending into tree");
            let next = entry.id;
            entries = self.tree_in(next, storage, cancel).await?;
        }
        Ok(entries)
    }

    /// Returns the content of the file at `path` under the tree `root`.
    pub async fn get_blob_by_path(
        &self,
        root: ObjectId,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let Some((file_name, dirs)) = parts.split_last() else {
            return Err(GitError::PathNotFound(path.to_string()));
        };

        let storage = self.scope()?;
        let storage = storage.as_ref();
        let mut entries = self.tree_in(root, storage, cancel).await?;

        for dir in dirs {
            let entry = find_entry(&entries, dir, path)?;
            if entry.kind != EntryKind::Tree {
                return Err(GitError::UnexpectedObjectType {
                    id: entry.id,
                    expected: ObjectType::Tree,
                    actual: entry_type(entry.kind),
                });
            }
            let next = entry.id;
            entries = self.tree_in(next, storage, cancel).await?;
        }

        let entry = find_entry(&entries, file_name, path)?;
        if entry.kind != EntryKind::Blob {
            return Err(GitError::UnexpectedObjectType {
                id: entry.id,
                expected: ObjectType::Blob,
                actual: entry_type(entry.kind),
            });
        }
        let id = entry.id;
        self.blob_in(id, storage, cancel).await
    }

    /// Lists every file and directory of a commit's snapshot, sorted by path.
    ///
    /// Submodules are left out.
    pub async fn get_flat_tree(
        &self,
        commit: ObjectId,
        cancel: &CancellationToken,
    ) -> Result<FlatTree> {
        let storage = self.scope()?;
        let tree = self.flat_tree_in(commit, storage.as_ref(), cancel).await?;
        info!(commit = %commit, tree = %tree.id, entries = tree.len(), "flat tree ready");
        Ok(tree)
    }

    /// Lists the paths that differ between two commits.
    pub async fn compare_commits(
        &self,
        base: ObjectId,
        head: ObjectId,
        cancel: &CancellationToken,
    ) -> Result<Vec<CommitFile>> {
        let storage = self.scope()?;
        let base_tree = self.flat_tree_in(base, storage.as_ref(), cancel).await?;
        let head_tree = self.flat_tree_in(head, storage.as_ref(), cancel).await?;

        let changes = compare_trees(&base_tree, &head_tree);
        info!(base = %base, head = %head, changes = changes.len(), "commits compared");
        Ok(changes)
    }

    /// True when the repository exists, false when the server answers 404.
    pub async fn repo_exists(&self, cancel: &CancellationToken) -> Result<bool> {
        match cancellable(cancel, self.fetcher.transport().advertise()).await {
            Ok(_) => Ok(true),
            Err(GitError::RepositoryNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// True when the credentials are accepted, false when the server answers 401.
    pub async fn is_authorized(&self, cancel: &CancellationToken) -> Result<bool> {
        match cancellable(cancel, self.fetcher.transport().advertise()).await {
            Ok(_) => Ok(true),
            Err(GitError::Unauthorized(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Lists every ref of the repository, including `HEAD`.
    pub async fn list_refs(&self, cancel: &CancellationToken) -> Result<Vec<Ref>> {
        self.ls_refs(LsRefsRequest::all(), cancel).await
    }

    /// Looks up one ref by its full name, e.g. `refs/heads/main`.
    pub async fn get_ref(&self, name: &str, cancel: &CancellationToken) -> Result<Ref> {
        self.ls_refs(LsRefsRequest::with_prefixes([name]), cancel)
            .await?
            .into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| GitError::RefNotFound(name.to_string()))
    }

    /// Turns a revision into a commit id.
    ///
    /// A full hex id is returned as is. Anything else is looked up as a ref
    /// name, then as a branch, then as a tag; annotated tags are peeled.
    pub async fn resolve_revision(
        &self,
        rev: &str,
        cancel: &CancellationToken,
    ) -> Result<ObjectId> {
        let rev = rev.trim();
        if let Ok(id) = ObjectId::from_hex(rev) {
            return Ok(id);
        }
        if rev.is_empty() {
            return Err(GitError::RefNotFound(rev.to_string()));
        }

        let mut candidates = vec![rev.to_string()];
        if !rev.starts_with("refs/") && rev != "HEAD" {
            candidates.push(format!("refs/heads/{}", rev));
            candidates.push(format!("refs/tags/{}", rev));
        }

        let refs = self
            .ls_refs(LsRefsRequest::with_prefixes(candidates.clone()), cancel)
            .await?;
        let found = candidates
            .iter()
            .find_map(|name| refs.iter().find(|r| &r.name == name))
            .ok_or_else(|| GitError::RefNotFound(rev.to_string()))?;

        debug!(rev, name = %found.name, id = %found.target(), "revision resolved");
        Ok(found.target())
    }

    /// Walks first-parent history from `start`, newest first.
    ///
    /// Filters in `options` are applied before pagination.
    pub async fn list_commits(
        &self,
        start: ObjectId,
        options: &ListCommitsOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<CommitRecord>> {
        let storage = self.scope()?;
        let storage = storage.as_ref();
        let (skip, take) = options.window();
        let depth = u32::try_from(options.page_size()).unwrap_or(u32::MAX);

        let mut records = Vec::with_capacity(take);
        let mut matched = 0;
        let mut visited = HashSet::new();
        let mut next = Some(start);

        while let Some(id) = next {
            if matched >= skip + take || !visited.insert(id) {
                break;
            }
            let commit = self
                .commit_in(id, FetchOptions::history(depth), storage, cancel)
                .await?;
            next = (!commit.is_root()).then_some(commit.parent);

            if !self.commit_matches(id, &commit, options, storage, cancel).await? {
                continue;
            }
            if matched >= skip {
                records.push(CommitRecord { id, commit });
            }
            matched += 1;
        }

        info!(
            start = %start,
            walked = visited.len(),
            listed = records.len(),
            "commits listed"
        );
        Ok(records)
    }

    async fn ls_refs(
        &self,
        request: LsRefsRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<Ref>> {
        let body = request.encode()?;
        let response = cancellable(cancel, self.fetcher.transport().upload_pack(body)).await?;
        parse_ls_refs(response.reader())
    }

    async fn commit_in(
        &self,
        id: ObjectId,
        options: FetchOptions,
        storage: &dyn ObjectStorage,
        cancel: &CancellationToken,
    ) -> Result<Commit> {
        let object = self.object_in(id, options, storage, cancel).await?;
        expect_kind(&object, ObjectType::Commit)?;
        Ok(object.commit_info()?.clone())
    }

    async fn commit_matches(
        &self,
        id: ObjectId,
        commit: &Commit,
        options: &ListCommitsOptions,
        storage: &dyn ObjectStorage,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if options.since.is_some() || options.until.is_some() {
            let time = commit.author.time()?.with_timezone(&Utc);
            if !options.in_range(time) {
                return Ok(false);
            }
        }

        let Some(path) = options.path.as_deref() else {
            return Ok(true);
        };
        let current = self.path_id_in(commit.tree, path, storage, cancel).await?;
        if commit.is_root() {
            return Ok(current.is_some());
        }
        let parent = self
            .commit_in(commit.parent, FetchOptions::shallow_commit(), storage, cancel)
            .await?;
        let previous = self.path_id_in(parent.tree, path, storage, cancel).await?;
        debug!(commit = %id, path, changed = current != previous, "path filter");
        Ok(current != previous)
    }

    /// Id of the entry at `path` under `root`, or `None` when nothing is there.
    async fn path_id_in(
        &self,
        root: ObjectId,
        path: &str,
        storage: &dyn ObjectStorage,
        cancel: &CancellationToken,
    ) -> Result<Option<ObjectId>> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let mut current = root;
        for (depth, part) in parts.iter().enumerate() {
            let entries = self.tree_in(current, storage, cancel).await?;
            let Some(entry) = entries.into_iter().find(|e| e.name == *part) else {
                return Ok(None);
            };
            let last = depth + 1 == parts.len();
            match entry.kind {
                EntryKind::Gitlink => return Ok(None),
                EntryKind::Blob if !last => return Ok(None),
                _ => current = entry.id,
            }
        }
        Ok(Some(current))
    }

    async fn object_in(
        &self,
        id: ObjectId,
        options: FetchOptions,
        storage: &dyn ObjectStorage,
        cancel: &CancellationToken,
    ) -> Result<GitObject> {
        let mut objects = self.fetcher.fetch(&[id], options, storage, cancel).await?;
        objects.remove(&id).ok_or(GitError::ObjectNotFound(id))
    }

    async fn blob_in(
        &self,
        id: ObjectId,
        storage: &dyn ObjectStorage,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let object = self
            .object_in(id, FetchOptions::default(), storage, cancel)
            .await?;
        expect_kind(&object, ObjectType::Blob)?;
        Ok(object.data)
    }

    async fn tree_in(
        &self,
        id: ObjectId,
        storage: &dyn ObjectStorage,
        cancel: &CancellationToken,
    ) -> Result<Vec<TreeEntry>> {
        let object = self
            .object_in(id, FetchOptions::blobless(), storage, cancel)
            .await?;
        expect_kind(&object, ObjectType::Tree)?;
        Ok(object.tree_entries()?.to_vec())
    }

    async fn flat_tree_in(
        &self,
        commit: ObjectId,
        storage: &dyn ObjectStorage,
        cancel: &CancellationToken,
    ) -> Result<FlatTree> {
        let mut objects = self
            .fetcher
            .fetch(&[commit], FetchOptions::shallow_commit(), storage, cancel)
            .await?;
        let commit_obj = objects
            .get(&commit)
            .ok_or(GitError::ObjectNotFound(commit))?;
        expect_kind(commit_obj, ObjectType::Commit)?;
        let root = commit_obj.commit_info()?.tree;

        if !objects.contains_key(&root) && !storage.has(&root)? {
            debug!(commit = %commit, tree = %root, "root tree not in commit response");
            let fetched = self
                .fetcher
                .fetch(&[root], FetchOptions::blobless(), storage, cancel)
                .await?;
            objects.extend(fetched);
        }

        TreeMaterializer::new(&self.fetcher, storage)
            .with_limits(self.config.limits())
            .flatten(root, &mut objects, cancel)
            .await
    }
}

/// Races a transport call against cancellation.
async fn cancellable<F>(cancel: &CancellationToken, call: F) -> Result<Bytes>
where
    F: Future<Output = Result<Bytes>>,
{
    if cancel.is_cancelled() {
        return Err(GitError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GitError::Cancelled),
        response = call => response,
    }
}

fn expect_kind(object: &GitObject, expected: ObjectType) -> Result<()> {
    if object.object_type != expected {
        return Err(GitError::UnexpectedObjectType {
            id: object.id,
            expected,
            actual: object.object_type,
        });
    }
    Ok(())
}

fn find_entry<'e>(entries: &'e [TreeEntry], name: &str, path: &str) -> Result<&'e TreeEntry> {
    entries
        .iter()
        .find(|entry| entry.name == name)
        .ok_or_else(|| GitError::PathNotFound(path.to_string()))
}

fn entry_type(kind: EntryKind) -> ObjectType {
    match kind {
        EntryKind::Blob => ObjectType::Blob,
        EntryKind::Tree => ObjectType::Tree,
        EntryKind::Gitlink => ObjectType::Commit,
    }
}
