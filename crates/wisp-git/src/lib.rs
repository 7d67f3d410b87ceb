//! Stateless Git Smart HTTP (protocol v2) object fetcher.
//!
//! This crate speaks the `ls-refs` and `fetch` commands of protocol v2,
//! decodes the returned pack (ref-deltas only), resolves deltas, and
//! materializes trees into flat path listings. Every operation works in a
//! fresh storage scope and keeps no repository state between calls.

mod client;
mod compare;
mod config;
mod delta;
mod error;
mod fetch;
mod history;
mod http;
mod lsrefs;
mod pack;
mod pktline;
mod protocol;
mod resolver;
mod sideband;
mod transport;
mod tree;

use std::collections::HashMap;
use wisp_storage::{GitObject, ObjectId};

pub use client::Client;
pub use compare::{compare_trees, CommitFile, FileStatus};
pub use config::ClientConfig;
pub use delta::{apply_delta, Delta, Instruction, RefDelta};
pub use error::{GitError, ServerMessage};
pub use fetch::{FetchOptions, Fetcher};
pub use history::{CommitRecord, ListCommitsOptions, DEFAULT_PER_PAGE, MAX_PER_PAGE};
pub use http::{Auth, HttpTransport};
pub use lsrefs::{parse_ls_refs, LsRefsRequest, Ref};
pub use pack::{PackBuilder, PackReader, PackedObject};
pub use pktline::{PktLine, PktLineReader, PktLineWriter};
pub use protocol::{open_packfile, FetchRequest};
pub use resolver::{DeltaResolver, ResolveStats};
pub use sideband::{server_message, SideBandReader};
pub use transport::Transport;
pub use tree::{BatchLimits, FlatTree, FlatTreeEntry, ObjectSource, TreeMaterializer};

/// Objects produced by one fetch, keyed by id.
pub type ObjectMap = HashMap<ObjectId, GitObject>;

/// Result type for git protocol operations.
pub type Result<T> = std::result::Result<T, GitError>;
