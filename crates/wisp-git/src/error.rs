//! Git protocol error types.

use std::fmt;
use thiserror::Error;
use wisp_storage::{ObjectId, ObjectType};

/// A fatal message sent by the server inside a response.
///
/// Arrives as an `ERR` packet, a side-band channel 3 packet, or an
/// `error:`/`fatal:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// `ERR`, `error` or `fatal`.
    pub kind: String,
    /// Message text without the prefix.
    pub message: String,
}

impl ServerMessage {
    /// Creates a server message.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into().trim().to_string(),
        }
    }

    /// Classifies a raw packet payload, returning a message if it is a fatal error.
    pub fn detect(data: &[u8]) -> Option<Self> {
        let text = |rest: &[u8]| String::from_utf8_lossy(rest).into_owned();
        if let Some(rest) = data.strip_prefix(b"ERR ") {
            return Some(Self::new("ERR", text(rest)));
        }
        if let Some(rest) = data.strip_prefix(b"error:") {
            return Some(Self::new("error", text(rest)));
        }
        if let Some(rest) = data.strip_prefix(b"fatal:") {
            return Some(Self::new("fatal", text(rest)));
        }
        None
    }

    /// True when the server refused a want it does not have.
    pub fn is_not_our_ref(&self) -> bool {
        self.message.contains("not our ref")
    }

    /// Returns the first object id named in the message, if any.
    pub fn object_id(&self) -> Option<ObjectId> {
        self.message
            .split(|c: char| !c.is_ascii_hexdigit())
            .find(|token| token.len() == 40)
            .and_then(|token| ObjectId::from_hex(token).ok())
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ServerMessage {}

/// Errors that can occur during git protocol operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Malformed pack, entry, delta or payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// Delta base length differs from the delta's declared source length.
    #[error("delta source size mismatch: expected {expected}, base has {actual}")]
    DeltaSizeMismatch {
        /// Declared source length.
        expected: usize,
        /// Actual base length.
        actual: usize,
    },

    /// Copy instruction reaches outside the base.
    #[error("delta copy out of bounds: offset {offset} len {len} base {base_len}")]
    DeltaBounds {
        /// Copy offset.
        offset: usize,
        /// Copy length.
        len: usize,
        /// Length of the base.
        base_len: usize,
    },

    /// Delta resolution stalled on bases that never arrived.
    #[error("missing delta base objects: {}", format_ids(.0))]
    MissingBaseObjects(Vec<ObjectId>),

    /// Object not found.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// Root tree not available.
    #[error("tree not found: {0}")]
    TreeNotFound(ObjectId),

    /// No ref with the requested name.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// No entry at the requested path.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// Object exists but has the wrong kind.
    #[error("object {id} is a {actual}, expected {expected}")]
    UnexpectedObjectType {
        /// Object id.
        id: ObjectId,
        /// Expected kind.
        expected: ObjectType,
        /// Actual kind.
        actual: ObjectType,
    },

    /// Server returned 5xx or 429.
    #[error("server unavailable ({status}): {message}")]
    ServerUnavailable {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// HTTP 401.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP 403.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// HTTP 404.
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Fatal message from the server.
    #[error("server error: {0}")]
    Server(ServerMessage),

    /// Invalid pkt-line format.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The operation's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] wisp_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// True for every flavour of "the thing you asked for does not exist".
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ObjectNotFound(_)
            | Self::TreeNotFound(_)
            | Self::PathNotFound(_)
            | Self::RefNotFound(_) => true,
            Self::Server(msg) => msg.is_not_our_ref(),
            _ => false,
        }
    }

    /// True when repeating the request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerUnavailable { .. })
    }

    /// Maps a "not our ref" server message to [`GitError::ObjectNotFound`].
    ///
    /// The id named in the message wins; `fallback` is used otherwise.
    pub fn from_server(msg: ServerMessage, fallback: Option<ObjectId>) -> Self {
        if msg.is_not_our_ref() {
            if let Some(id) = msg.object_id().or(fallback) {
                return Self::ObjectNotFound(id);
            }
        }
        Self::Server(msg)
    }
}

fn format_ids(ids: &[ObjectId]) -> String {
    ids.iter()
        .map(ObjectId::to_hex)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_server_messages() {
        let err = ServerMessage::detect(b"ERR upload-pack: not our ref abc\n").unwrap();
        assert_eq!(err.kind, "ERR");
        assert_eq!(err.message, "upload-pack: not our ref abc");
        assert!(err.is_not_our_ref());

        assert_eq!(ServerMessage::detect(b"fatal: boom").unwrap().kind, "fatal");
        assert_eq!(ServerMessage::detect(b"error: bad").unwrap().message, "bad");
        assert!(ServerMessage::detect(b"packfile\n").is_none());
    }

    #[test]
    fn test_not_our_ref_names_hash() {
        let hex = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391";
        let msg = ServerMessage::new("ERR", format!("upload-pack: not our ref {}", hex));
        let err = GitError::from_server(msg, None);
        assert!(matches!(err, GitError::ObjectNotFound(id) if id.to_hex() == hex));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_not_our_ref_falls_back_to_request() {
        let want = ObjectId::from_bytes([3u8; 20]);
        let msg = ServerMessage::new("ERR", "not our ref");
        assert!(matches!(
            GitError::from_server(msg.clone(), Some(want)),
            GitError::ObjectNotFound(id) if id == want
        ));
        let err = GitError::from_server(msg, None);
        assert!(matches!(err, GitError::Server(_)));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_other_server_errors_pass_through() {
        let msg = ServerMessage::new("fatal", "the remote end hung up");
        assert!(matches!(
            GitError::from_server(msg, Some(ObjectId::ZERO)),
            GitError::Server(_)
        ));
    }

    #[test]
    fn test_classification() {
        assert!(GitError::TreeNotFound(ObjectId::ZERO).is_not_found());
        assert!(GitError::PathNotFound("a/b".into()).is_not_found());
        assert!(GitError::RefNotFound("refs/heads/gone".into()).is_not_found());
        assert!(!GitError::Cancelled.is_not_found());

        let unavailable = GitError::ServerUnavailable {
            status: 503,
            message: "busy".into(),
        };
        assert!(unavailable.is_retryable());
        assert!(!GitError::Unauthorized("no".into()).is_retryable());
    }

    #[test]
    fn test_missing_bases_display() {
        let err = GitError::MissingBaseObjects(vec![
            ObjectId::from_bytes([1u8; 20]),
            ObjectId::from_bytes([2u8; 20]),
        ]);
        let text = err.to_string();
        assert!(text.contains(&"01".repeat(20)));
        assert!(text.contains(&"02".repeat(20)));
    }
}
