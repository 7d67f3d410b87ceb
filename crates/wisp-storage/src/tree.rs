//! Tree object entries.
//!
//! A tree body is a sequence of `<octal mode> SP <name> NUL <20-byte id>`
//! records. The mode's type bits decide what the entry points at.

use crate::{ObjectId, Result, StorageError};
use serde::{Deserialize, Serialize};

/// Mask selecting the object-type bits of a tree entry mode.
const MODE_TYPE_MASK: u32 = 0o170000;
/// Type bits of a subdirectory.
const MODE_TREE: u32 = 0o040000;
/// Type bits of a submodule commit in another repository.
const MODE_GITLINK: u32 = 0o160000;

/// What a tree entry points at, derived from its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file, executable, or symlink.
    Blob,
    /// Subdirectory.
    Tree,
    /// Commit in a foreign repository (submodule).
    Gitlink,
}

impl EntryKind {
    /// Classifies a mode by its type bits.
    pub fn from_mode(mode: u32) -> Self {
        match mode & MODE_TYPE_MASK {
            MODE_TREE => Self::Tree,
            MODE_GITLINK => Self::Gitlink,
            _ => Self::Blob,
        }
    }

    /// Returns the lowercase name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Gitlink => "commit",
        }
    }
}

/// One child reference inside a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// File or directory name (no slashes).
    pub name: String,
    /// File mode bits, e.g. `0o100644` or `0o040000`.
    pub mode: u32,
    /// Id of the referenced object.
    pub id: ObjectId,
    /// Kind inferred from `mode`.
    pub kind: EntryKind,
}

impl TreeEntry {
    /// Creates an entry, inferring its kind from the mode.
    pub fn new(name: impl Into<String>, mode: u32, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            mode,
            id,
            kind: EntryKind::from_mode(mode),
        }
    }
}

/// Parses the binary body of a tree object.
pub fn parse_tree(data: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| invalid("missing space after mode"))?;
        let mode = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|s| u32::from_str_radix(s, 8).ok())
            .ok_or_else(|| invalid("mode is not octal"))?;
        rest = &rest[space + 1..];

        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| invalid("missing NUL after name"))?;
        if nul == 0 {
            return Err(invalid("empty entry name"));
        }
        let name = &rest[..nul];
        if name.contains(&b'/') {
            return Err(invalid("entry name contains a slash"));
        }
        if name == b"." || name == b".." {
            return Err(invalid("entry name is a relative component"));
        }
        let name = String::from_utf8_lossy(name).into_owned();
        rest = &rest[nul + 1..];

        if rest.len() < ObjectId::LEN {
            return Err(invalid("truncated entry id"));
        }
        let id = ObjectId::from_slice(&rest[..ObjectId::LEN])?;
        rest = &rest[ObjectId::LEN..];

        entries.push(TreeEntry::new(name, mode, id));
    }

    Ok(entries)
}

/// Encodes tree entries in the given order.
pub fn encode_tree(entries: &[TreeEntry]) -> Vec<u8> {
    let mut data = Vec::new();
    for entry in entries {
        data.extend_from_slice(format!("{:o} {}\0", entry.mode, entry.name).as_bytes());
        data.extend_from_slice(entry.id.as_bytes());
    }
    data
}

fn invalid(reason: &str) -> StorageError {
    StorageError::InvalidObject(format!("malformed tree: {}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_entry_kind_from_mode() {
        assert_eq!(EntryKind::from_mode(0o100644), EntryKind::Blob);
        assert_eq!(EntryKind::from_mode(0o100755), EntryKind::Blob);
        assert_eq!(EntryKind::from_mode(0o120000), EntryKind::Blob);
        assert_eq!(EntryKind::from_mode(0o040000), EntryKind::Tree);
        assert_eq!(EntryKind::from_mode(0o160000), EntryKind::Gitlink);
    }

    #[test]
    fn test_gitlink_is_not_a_tree() {
        // 0o160000 shares the 0o040000 bit with directories.
        assert_ne!(0o160000 & MODE_TREE, 0);
        assert_eq!(EntryKind::from_mode(0o160000), EntryKind::Gitlink);
    }

    #[test]
    fn test_parse_tree_wire_format() {
        let id = ObjectId::from_bytes([0x11; 20]);
        let mut data = b"40000 subdir\0".to_vec();
        data.extend_from_slice(id.as_bytes());
        data.extend_from_slice(b"100644 README.md\0");
        data.extend_from_slice(&[0x22; 20]);

        let entries = parse_tree(&data).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "subdir");
        assert_eq!(entries[0].mode, 0o040000);
        assert_eq!(entries[0].kind, EntryKind::Tree);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[1].name, "README.md");
        assert_eq!(entries[1].kind, EntryKind::Blob);
    }

    #[test]
    fn test_encode_tree_uses_git_mode_spelling() {
        let entry = TreeEntry::new("dir", 0o040000, ObjectId::ZERO);
        let data = encode_tree(&[entry]);
        assert!(data.starts_with(b"40000 dir\0"));
        assert_eq!(data.len(), 10 + 20);
    }

    #[test]
    fn test_parse_tree_rejects_malformed() {
        assert!(parse_tree(b"100644").is_err());
        assert!(parse_tree(b"10x644 a\0").is_err());
        assert!(parse_tree(b"100644 \0aaaaaaaaaaaaaaaaaaaa").is_err());
        assert!(parse_tree(b"100644 a\0short").is_err());
    }

    #[test]
    fn test_parse_tree_rejects_path_like_names() {
        for name in ["a/b", "/", "..", "."] {
            let mut data = format!("100644 {name}\0").into_bytes();
            data.extend_from_slice(&[0x33; 20]);
            let err = parse_tree(&data).unwrap_err();
            assert!(err.to_string().contains("malformed tree"), "{name}: {err}");
        }

        let mut data = b"100644 ...\0".to_vec();
        data.extend_from_slice(&[0x33; 20]);
        assert_eq!(parse_tree(&data).unwrap()[0].name, "...");
    }

    #[test]
    fn test_parse_empty_tree() {
        assert!(parse_tree(b"").unwrap().is_empty());
    }

    proptest! {
        /// Property: parsing arbitrary bytes never panics
        #[test]
        fn prop_parse_tree_no_panic(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = parse_tree(&data);
        }

        /// Property: encoded entries parse back to the same names, modes and ids
        #[test]
        fn prop_encoded_entries_parse_back(
            names in prop::collection::vec("[a-zA-Z0-9_-][a-zA-Z0-9._-]{0,15}", 1..8),
            seed in any::<u8>(),
        ) {
            let entries: Vec<TreeEntry> = names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let mode = if i % 2 == 0 { 0o100644 } else { 0o040000 };
                    let id = ObjectId::from_bytes([seed.wrapping_add(i as u8); 20]);
                    TreeEntry::new(name.clone(), mode, id)
                })
                .collect();

            let parsed = parse_tree(&encode_tree(&entries)).unwrap();
            prop_assert_eq!(parsed, entries);
        }
    }
}
