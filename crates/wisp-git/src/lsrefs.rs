//! Protocol v2 `ls-refs` command.
//!
//! Each response line is `<id> <refname>` followed by optional attributes
//! such as `symref-target:<ref>` and `peeled:<id>`. The list ends at a flush.
//! See: https://git-scm.com/docs/protocol-v2#_ls_refs

use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::{GitError, Result, ServerMessage};
use bytes::Bytes;
use serde::Serialize;
use std::io::Read;
use tracing::debug;
use wisp_storage::ObjectId;

/// A reference advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ref {
    /// Full name, e.g. `refs/heads/main` or `HEAD`.
    pub name: String,
    /// Object the ref points at.
    pub id: ObjectId,
    /// Target of a symbolic ref.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symref_target: Option<String>,
    /// Commit an annotated tag points at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peeled: Option<ObjectId>,
}

impl Ref {
    /// The commit this ref ultimately names: the peeled id for annotated tags.
    pub fn target(&self) -> ObjectId {
        self.peeled.unwrap_or(self.id)
    }
}

/// Options of one `command=ls-refs` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LsRefsRequest {
    /// `ref-prefix` arguments; empty lists every ref.
    pub prefixes: Vec<String>,
    /// Send `symrefs`.
    pub symrefs: bool,
    /// Send `peel`.
    pub peel: bool,
}

impl LsRefsRequest {
    /// A request for every ref, with symrefs and peeled tags.
    pub fn all() -> Self {
        Self {
            prefixes: Vec::new(),
            symrefs: true,
            peel: true,
        }
    }

    /// A request limited to refs starting with any of `prefixes`.
    pub fn with_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            ..Self::all()
        }
    }

    /// Encodes the request as pkt-lines.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        let mut writer = PktLineWriter::new(&mut buf);

        writer.write_line("command=ls-refs")?;
        writer.write_line("object-format=sha1")?;
        writer.delim_pkt()?;
        if self.symrefs {
            writer.write_line("symrefs")?;
        }
        if self.peel {
            writer.write_line("peel")?;
        }
        for prefix in &self.prefixes {
            writer.write_line(&format!("ref-prefix {}", prefix))?;
        }
        writer.flush_pkt()?;

        Ok(Bytes::from(buf))
    }
}

/// Parses an `ls-refs` response.
///
/// Unborn refs are skipped. A fatal server line fails the whole listing.
pub fn parse_ls_refs<R: Read>(reader: R) -> Result<Vec<Ref>> {
    let mut packets = PktLineReader::new(reader);
    let mut refs = Vec::new();

    for packet in packets.read_until_flush()? {
        let PktLine::Data(data) = packet else {
            continue;
        };
        if let Some(msg) = ServerMessage::detect(&data) {
            return Err(GitError::Server(msg));
        }
        if let Some(parsed) = parse_ref_line(&data)? {
            refs.push(parsed);
        }
    }

    debug!(refs = refs.len(), "ls-refs parsed");
    Ok(refs)
}

fn parse_ref_line(data: &[u8]) -> Result<Option<Ref>> {
    let line = String::from_utf8_lossy(data);
    let line = line.trim_end_matches('\n');
    let mut fields = line.split(' ');

    let (Some(id), Some(name)) = (fields.next(), fields.next()) else {
        return Err(GitError::Protocol(format!("malformed ref line: {:?}", line)));
    };
    if id == "unborn" {
        debug!(name, "skipping unborn ref");
        return Ok(None);
    }
    if name.is_empty() {
        return Err(GitError::Protocol(format!("ref line without name: {:?}", line)));
    }

    let mut parsed = Ref {
        name: name.to_string(),
        id: ObjectId::from_hex(id)?,
        symref_target: None,
        peeled: None,
    };
    for attribute in fields {
        if let Some(target) = attribute.strip_prefix("symref-target:") {
            parsed.symref_target = Some(target.to_string());
        } else if let Some(peeled) = attribute.strip_prefix("peeled:") {
            parsed.peeled = Some(ObjectId::from_hex(peeled)?);
        }
    }
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn hex(byte: u8) -> String {
        ObjectId::from_bytes([byte; 20]).to_hex()
    }

    fn response(lines: &[String]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = PktLineWriter::new(&mut buf);
        for line in lines {
            writer.write_line(line).unwrap();
        }
        writer.flush_pkt().unwrap();
        buf
    }

    #[test]
    fn test_encode_with_prefixes() {
        let body = LsRefsRequest::with_prefixes(["refs/heads/main"]).encode().unwrap();
        let mut reader = PktLineReader::new(Cursor::new(body.to_vec()));
        let mut lines = Vec::new();
        while let Some(packet) = reader.read().unwrap() {
            lines.push(match packet {
                PktLine::Delimiter => "<delim>".to_string(),
                PktLine::Flush => "<flush>".to_string(),
                other => other.as_str().unwrap().to_string(),
            });
        }
        assert_eq!(
            lines,
            vec![
                "command=ls-refs",
                "object-format=sha1",
                "<delim>",
                "symrefs",
                "peel",
                "ref-prefix refs/heads/main",
                "<flush>",
            ]
        );
    }

    #[test]
    fn test_parse_refs_with_attributes() {
        let body = response(&[
            format!("{} HEAD symref-target:refs/heads/main", hex(1)),
            format!("{} refs/heads/main", hex(1)),
            format!("{} refs/tags/v1.0 peeled:{}", hex(2), hex(3)),
            "unborn refs/heads/empty".to_string(),
        ]);

        let refs = parse_ls_refs(Cursor::new(body)).unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].name, "HEAD");
        assert_eq!(refs[0].symref_target.as_deref(), Some("refs/heads/main"));
        assert_eq!(refs[1].target().to_hex(), hex(1));
        assert_eq!(refs[2].id.to_hex(), hex(2));
        assert_eq!(refs[2].target().to_hex(), hex(3));
    }

    #[test]
    fn test_parse_empty_listing() {
        assert!(parse_ls_refs(Cursor::new(b"0000".to_vec())).unwrap().is_empty());
        assert!(parse_ls_refs(Cursor::new(Vec::new())).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        let body = response(&["not-a-hash refs/heads/main".to_string()]);
        assert!(parse_ls_refs(Cursor::new(body)).is_err());

        let body = response(&[hex(1)]);
        assert!(matches!(
            parse_ls_refs(Cursor::new(body)),
            Err(GitError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_surfaces_server_error() {
        let body = response(&["ERR access denied".to_string()]);
        assert!(matches!(
            parse_ls_refs(Cursor::new(body)),
            Err(GitError::Server(msg)) if msg.message == "access denied"
        ));
    }
}
