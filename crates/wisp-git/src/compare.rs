//! Commit comparison over flattened trees.

use crate::tree::FlatTree;
use serde::Serialize;
use std::collections::HashMap;
use wisp_storage::{EntryKind, ObjectId};

/// How a path changed between two trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Only in head.
    Added,
    /// Only in base.
    Deleted,
    /// In both with different content.
    Modified,
}

impl FileStatus {
    /// Single-letter code as printed by `git diff --name-status`.
    pub fn code(&self) -> char {
        match self {
            Self::Added => 'A',
            Self::Deleted => 'D',
            Self::Modified => 'M',
        }
    }
}

/// A changed path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitFile {
    /// Full path.
    pub path: String,
    /// Kind of change.
    pub status: FileStatus,
    /// Mode in head, or in base for deletions.
    pub mode: u32,
    /// Id in head, or in base for deletions.
    pub id: ObjectId,
    /// Mode in base for modifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_mode: Option<u32>,
    /// Id in base for modifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_id: Option<ObjectId>,
}

/// Lists the paths that differ between `base` and `head`, sorted by path.
///
/// Directories appear as added or deleted entries but never as modified;
/// their content changes surface through the files beneath them.
pub fn compare_trees(base: &FlatTree, head: &FlatTree) -> Vec<CommitFile> {
    let base_by_path: HashMap<&str, _> = base
        .entries
        .iter()
        .map(|entry| (entry.path.as_str(), entry))
        .collect();
    let head_by_path: HashMap<&str, _> = head
        .entries
        .iter()
        .map(|entry| (entry.path.as_str(), entry))
        .collect();

    let mut changes = Vec::new();

    for entry in &head.entries {
        match base_by_path.get(entry.path.as_str()) {
            None => changes.push(CommitFile {
                path: entry.path.clone(),
                status: FileStatus::Added,
                mode: entry.mode,
                id: entry.id,
                old_mode: None,
                old_id: None,
            }),
            Some(old) if old.id != entry.id && entry.kind != EntryKind::Tree => {
                changes.push(CommitFile {
                    path: entry.path.clone(),
                    status: FileStatus::Modified,
                    mode: entry.mode,
                    id: entry.id,
                    old_mode: Some(old.mode),
                    old_id: Some(old.id),
                })
            }
            Some(_) => {}
        }
    }

    for entry in &base.entries {
        if !head_by_path.contains_key(entry.path.as_str()) {
            changes.push(CommitFile {
                path: entry.path.clone(),
                status: FileStatus::Deleted,
                mode: entry.mode,
                id: entry.id,
                old_mode: None,
                old_id: None,
            });
        }
    }

    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}
