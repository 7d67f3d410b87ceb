//! Git object types and utilities.

use crate::commit::Commit;
use crate::tree::{encode_tree, parse_tree, TreeEntry};
use crate::{Result, StorageError};
use bytes::Bytes;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::sync::Arc;

/// A 20-byte SHA-1 object identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl ObjectId {
    /// Length of a raw object id in bytes.
    pub const LEN: usize = 20;

    /// The all-zero id, used for "no parent".
    pub const ZERO: ObjectId = ObjectId([0u8; 20]);

    /// Creates an ObjectId from raw bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an ObjectId from a slice that must be exactly 20 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 20] = bytes.try_into().map_err(|_| {
            StorageError::InvalidObject(format!("invalid object id length: {}", bytes.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Creates an ObjectId from a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 40 {
            return Err(StorageError::InvalidObject(format!(
                "invalid object id length: {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| StorageError::InvalidObject(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns the lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns true for the all-zero id.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Computes the SHA-1 hash of data with a git object header.
    pub fn hash_object(object_type: ObjectType, data: &[u8]) -> Self {
        let header = format!("{} {}\0", object_type.as_str(), data.len());
        let mut hasher = Sha1::new();
        hasher.update(header.as_bytes());
        hasher.update(data);
        let result = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }
}

impl std::str::FromStr for ObjectId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Git object types, numbered as in pack files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectType {
    /// Commit object.
    Commit,
    /// Directory listing.
    Tree,
    /// File content.
    Blob,
    /// Annotated tag.
    Tag,
    /// Instructions against a base object named by its id.
    RefDelta,
}

impl ObjectType {
    /// Returns the string representation used in git object headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
            Self::RefDelta => "ref-delta",
        }
    }

    /// Parses an object type from its header string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "commit" => Ok(Self::Commit),
            "tree" => Ok(Self::Tree),
            "blob" => Ok(Self::Blob),
            "tag" => Ok(Self::Tag),
            _ => Err(StorageError::InvalidObject(format!(
                "unknown object type: {}",
                s
            ))),
        }
    }

    /// Returns the type code used in pack files.
    pub fn pack_type(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
            Self::RefDelta => 7,
        }
    }

    /// Parses an object type from a pack file type code.
    ///
    /// Offset deltas (code 6) are rejected: only reference deltas are decoded.
    pub fn from_pack_type(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Commit),
            2 => Ok(Self::Tree),
            3 => Ok(Self::Blob),
            4 => Ok(Self::Tag),
            6 => Err(StorageError::InvalidObject(
                "offset deltas are not supported".to_string(),
            )),
            7 => Ok(Self::RefDelta),
            _ => Err(StorageError::InvalidObject(format!(
                "unknown pack type: {}",
                code
            ))),
        }
    }

    /// Returns true for the delta representation.
    pub fn is_delta(&self) -> bool {
        matches!(self, Self::RefDelta)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured form of a tree or commit body.
#[derive(Debug, Clone)]
enum Payload {
    Tree(Arc<Vec<TreeEntry>>),
    Commit(Arc<Commit>),
    Opaque,
}

/// A git object (blob, tree, commit, or tag).
#[derive(Debug, Clone)]
pub struct GitObject {
    /// The object's unique identifier (SHA-1 hash).
    pub id: ObjectId,
    /// The type of object.
    pub object_type: ObjectType,
    /// The raw object data (uncompressed).
    pub data: Bytes,
    payload: OnceCell<Payload>,
}

impl GitObject {
    /// Creates a new git object, computing its ID from the data.
    pub fn new(object_type: ObjectType, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let id = ObjectId::hash_object(object_type, &data);
        Self {
            id,
            object_type,
            data,
            payload: OnceCell::new(),
        }
    }

    /// Creates a blob object from file content.
    pub fn blob(content: impl Into<Bytes>) -> Self {
        Self::new(ObjectType::Blob, content)
    }

    /// Creates a tree object from its entries, written in the given order.
    pub fn tree(entries: &[TreeEntry]) -> Self {
        Self::new(ObjectType::Tree, encode_tree(entries))
    }

    /// Creates a commit object with at most one parent.
    pub fn commit(
        tree_id: &ObjectId,
        parent: Option<&ObjectId>,
        author: &str,
        committer: &str,
        message: &str,
    ) -> Self {
        let mut content = format!("tree {}\n", tree_id);
        if let Some(parent) = parent {
            content.push_str(&format!("parent {}\n", parent));
        }
        content.push_str(&format!("author {}\n", author));
        content.push_str(&format!("committer {}\n", committer));
        content.push_str(&format!("\n{}", message));
        Self::new(ObjectType::Commit, content.into_bytes())
    }

    /// Returns the size of the object data.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Parses the structured payload now, caching it.
    ///
    /// Blobs and tags have no structured payload and always succeed.
    pub fn parse(&self) -> Result<()> {
        self.payload().map(|_| ())
    }

    /// Returns the entries of a tree object.
    pub fn tree_entries(&self) -> Result<&[TreeEntry]> {
        match self.payload()? {
            Payload::Tree(entries) => Ok(entries.as_slice()),
            _ => Err(StorageError::InvalidObject(format!(
                "object {} is a {}, not a tree",
                self.id, self.object_type
            ))),
        }
    }

    /// Returns the parsed commit of a commit object.
    pub fn commit_info(&self) -> Result<&Commit> {
        match self.payload()? {
            Payload::Commit(commit) => Ok(commit.as_ref()),
            _ => Err(StorageError::InvalidObject(format!(
                "object {} is a {}, not a commit",
                self.id, self.object_type
            ))),
        }
    }

    fn payload(&self) -> Result<&Payload> {
        self.payload.get_or_try_init(|| match self.object_type {
            ObjectType::Tree => Ok(Payload::Tree(Arc::new(parse_tree(&self.data)?))),
            ObjectType::Commit => Ok(Payload::Commit(Arc::new(Commit::parse(&self.data)?))),
            _ => Ok(Payload::Opaque),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::EntryKind;

    #[test]
    fn test_object_id_hex_roundtrip() {
        let hex = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        let id = ObjectId::from_hex(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
    }

    #[test]
    fn test_object_id_hex_is_canonical_lowercase() {
        let id = ObjectId::from_hex("A94A8FE5CCB19BA61C4C0873D391E987982FBBD3").unwrap();
        assert_eq!(id.to_string(), "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3");
    }

    #[test]
    fn test_blob_hash() {
        let obj = GitObject::blob(b"hello\n".to_vec());
        assert_eq!(obj.id.to_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn test_git_object_empty_blob() {
        let obj = GitObject::blob(b"".to_vec());
        assert_eq!(obj.size(), 0);
        assert_eq!(obj.id.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn test_empty_tree_hash() {
        let tree = GitObject::tree(&[]);
        assert_eq!(tree.id.to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
        assert!(tree.tree_entries().unwrap().is_empty());
    }

    #[test]
    fn test_object_id_invalid_hex() {
        assert!(ObjectId::from_hex("abc").is_err());
        assert!(ObjectId::from_hex("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3ff").is_err());
        assert!(ObjectId::from_hex("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn test_object_id_from_slice() {
        assert!(ObjectId::from_slice(&[1u8; 19]).is_err());
        assert_eq!(
            ObjectId::from_slice(&[7u8; 20]).unwrap(),
            ObjectId::from_bytes([7u8; 20])
        );
    }

    #[test]
    fn test_zero_id() {
        assert!(ObjectId::ZERO.is_zero());
        assert_eq!(ObjectId::ZERO.to_string(), "0".repeat(40));
        assert!(!ObjectId::from_bytes([1u8; 20]).is_zero());
    }

    #[test]
    fn test_object_type_pack_codes() {
        for ot in [
            ObjectType::Commit,
            ObjectType::Tree,
            ObjectType::Blob,
            ObjectType::Tag,
            ObjectType::RefDelta,
        ] {
            assert_eq!(ObjectType::from_pack_type(ot.pack_type()).unwrap(), ot);
        }
        assert!(ObjectType::from_pack_type(0).is_err());
        assert!(ObjectType::from_pack_type(5).is_err());
        assert!(ObjectType::from_pack_type(6).is_err());
    }

    #[test]
    fn test_object_type_parse() {
        assert_eq!(ObjectType::parse("tree").unwrap(), ObjectType::Tree);
        assert!(ObjectType::parse("ref-delta").is_err());
        assert!(ObjectType::parse("invalid").is_err());
    }

    #[test]
    fn test_tree_entries_parsed_lazily_and_cached() {
        let blob = GitObject::blob(b"content".to_vec());
        let tree = GitObject::tree(&[TreeEntry::new("file.txt", 0o100644, blob.id)]);

        let entries = tree.tree_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "file.txt");
        assert_eq!(entries[0].kind, EntryKind::Blob);

        let cloned = tree.clone();
        assert_eq!(cloned.tree_entries().unwrap()[0].id, blob.id);
    }

    #[test]
    fn test_payload_accessors_reject_wrong_kind() {
        let blob = GitObject::blob(b"x".to_vec());
        assert!(blob.parse().is_ok());
        assert!(blob.tree_entries().is_err());
        assert!(blob.commit_info().is_err());
    }

    #[test]
    fn test_malformed_tree_fails_parse() {
        let tree = GitObject::new(ObjectType::Tree, b"100644 truncated".to_vec());
        assert!(tree.parse().is_err());
    }

    #[test]
    fn test_git_object_commit() {
        let tree_id = ObjectId::from_bytes([1u8; 20]);
        let parent = ObjectId::from_bytes([2u8; 20]);
        let author = "Alice <alice@example.com> 1234567890 +0000";
        let obj = GitObject::commit(&tree_id, Some(&parent), author, author, "Initial commit");

        let commit = obj.commit_info().unwrap();
        assert_eq!(commit.tree, tree_id);
        assert_eq!(commit.parent, parent);
        assert_eq!(commit.author.name, "Alice");
        assert_eq!(commit.message, "Initial commit");
    }

    #[test]
    fn test_object_id_serialization() {
        let id = ObjectId::from_bytes([0xab; 20]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(20)));
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
