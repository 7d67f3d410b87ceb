//! Object model and scoped object storage for wisp.
//!
//! This crate provides the content-addressed representation of git objects
//! (blobs, trees, commits, tags) together with the pluggable storage used to
//! hold them for the duration of one fetch operation.

mod auto;
mod commit;
mod config;
mod disk;
mod error;
mod memory;
mod object;
mod traits;
mod tree;

pub use auto::AutoStorage;
pub use commit::{Commit, Identity};
pub use config::{StorageConfig, StorageMode};
pub use disk::DiskStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
pub use object::{GitObject, ObjectId, ObjectType};
pub use traits::ObjectStorage;
pub use tree::{encode_tree, parse_tree, EntryKind, TreeEntry};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
