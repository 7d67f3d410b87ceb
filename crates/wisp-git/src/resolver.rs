//! Reference-delta resolution.
//!
//! Deltas may arrive before their bases, and a base may itself be a delta.
//! Resolution runs in passes: each pass resolves every pending delta whose
//! base is available at the start of the pass, then publishes the results.
//! A chain `A <- B <- C` therefore takes two passes.

use crate::delta::{apply_delta, RefDelta};
use crate::{GitError, ObjectMap, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wisp_storage::{GitObject, ObjectStorage};

/// Outcome of a successful resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Passes run.
    pub passes: usize,
    /// Objects reconstructed.
    pub resolved: usize,
}

/// Resolves reference deltas against an object map and a storage scope.
pub struct DeltaResolver<'a> {
    storage: &'a dyn ObjectStorage,
    cancel: &'a CancellationToken,
}

impl<'a> DeltaResolver<'a> {
    /// Creates a resolver that also looks bases up in `storage`.
    pub fn new(storage: &'a dyn ObjectStorage, cancel: &'a CancellationToken) -> Self {
        Self { storage, cancel }
    }

    /// Resolves every delta in `pending`, inserting results into `objects`
    /// and storage.
    ///
    /// Fails with [`GitError::MissingBaseObjects`] as soon as a pass makes no
    /// progress. On any error `objects` holds only what earlier passes
    /// completed and the caller is expected to discard it.
    pub fn resolve(&self, pending: Vec<RefDelta>, objects: &mut ObjectMap) -> Result<ResolveStats> {
        let max_passes = pending.len() + 1;
        let mut stats = ResolveStats::default();
        let mut remaining = pending;

        while !remaining.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(GitError::Cancelled);
            }
            if stats.passes >= max_passes {
                return Err(missing_bases(&remaining));
            }
            stats.passes += 1;

            let mut produced = Vec::new();
            let mut deferred = Vec::new();
            for item in remaining {
                let base = match objects.get(&item.base) {
                    Some(base) => Some(base.clone()),
                    None => self.storage.get(&item.base)?,
                };
                match base {
                    Some(base) => produced.push(reconstruct(&base, &item)?),
                    None => deferred.push(item),
                }
            }

            debug!(
                pass = stats.passes,
                resolved = produced.len(),
                deferred = deferred.len(),
                "delta resolution pass"
            );

            if produced.is_empty() {
                return Err(missing_bases(&deferred));
            }

            self.storage.add(&produced)?;
            stats.resolved += produced.len();
            for object in produced {
                objects.insert(object.id, object);
            }
            remaining = deferred;
        }

        Ok(stats)
    }
}

/// Applies a delta; the result keeps the base's kind.
fn reconstruct(base: &GitObject, item: &RefDelta) -> Result<GitObject> {
    let data = apply_delta(&base.data, &item.delta)?;
    let object = GitObject::new(base.object_type, data);
    object.parse().map_err(|e| {
        GitError::Decode(format!(
            "delta against {} produced a malformed {}: {}",
            item.base, base.object_type, e
        ))
    })?;
    Ok(object)
}

fn missing_bases(items: &[RefDelta]) -> GitError {
    let mut ids: Vec<_> = items.iter().map(|item| item.base).collect();
    ids.sort();
    ids.dedup();
    GitError::MissingBaseObjects(ids)
}
