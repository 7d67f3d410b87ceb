//! Protocol v2 `fetch` command.
//!
//! Builds the request body sent to `git-upload-pack` and walks the response
//! sections up to the `packfile` header.
//! See: https://git-scm.com/docs/protocol-v2#_fetch

use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::sideband::SideBandReader;
use crate::{GitError, Result, ServerMessage};
use bytes::Bytes;
use std::io::Read;
use tracing::debug;
use wisp_storage::ObjectId;

/// Section headers that may precede the packfile.
const KNOWN_SECTIONS: &[&str] = &["acknowledgments", "shallow-info", "wanted-refs"];

/// Options of one `command=fetch` request.
///
/// Never asks the server to disable deltas and sends no `have` lines, so
/// the server cannot assume it shares any state with the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Objects to fetch.
    pub wants: Vec<ObjectId>,
    /// Send `no-progress`.
    pub no_progress: bool,
    /// Send `filter blob:none`.
    pub blob_filter: bool,
    /// Send a `shallow` line per want.
    pub shallow: bool,
    /// Send `deepen <n>` when non-zero.
    pub deepen: u32,
    /// Send `done`.
    pub done: bool,
}

impl FetchRequest {
    /// A request for `wants` with progress suppressed and negotiation finished.
    pub fn new(wants: Vec<ObjectId>) -> Self {
        Self {
            wants,
            no_progress: true,
            blob_filter: false,
            shallow: false,
            deepen: 0,
            done: true,
        }
    }

    /// Encodes the request as pkt-lines.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        let mut writer = PktLineWriter::new(&mut buf);

        writer.write_line("command=fetch")?;
        writer.write_line("object-format=sha1")?;
        writer.delim_pkt()?;

        if self.no_progress {
            writer.write_line("no-progress")?;
        }
        if self.blob_filter {
            writer.write_line("filter blob:none")?;
        }
        for want in &self.wants {
            writer.write_line(&format!("want {}", want))?;
        }
        if self.shallow {
            for want in &self.wants {
                writer.write_line(&format!("shallow {}", want))?;
            }
        }
        if self.deepen > 0 {
            writer.write_line(&format!("deepen {}", self.deepen))?;
        }
        if self.done {
            writer.write_line("done")?;
        }
        writer.flush_pkt()?;

        Ok(Bytes::from(buf))
    }
}

/// Walks the response sections and returns a reader over the pack data.
///
/// Returns `None` when the response ends without a `packfile` section.
pub fn open_packfile<R: Read>(reader: R) -> Result<Option<SideBandReader<R>>> {
    let mut packets = PktLineReader::new(reader);
    let mut section: Option<String> = None;

    loop {
        match packets.read()? {
            None | Some(PktLine::Flush) | Some(PktLine::ResponseEnd) => {
                debug!("fetch response carried no packfile");
                return Ok(None);
            }
            Some(PktLine::Delimiter) => section = None,
            Some(PktLine::Data(data)) => {
                if let Some(msg) = ServerMessage::detect(&data) {
                    return Err(GitError::Server(msg));
                }
                let line = String::from_utf8_lossy(&data);
                let line = line.trim_end_matches('\n');
                if line == "packfile" {
                    return Ok(Some(SideBandReader::new(packets)));
                }
                if section.is_none() && KNOWN_SECTIONS.contains(&line) {
                    section = Some(line.to_string());
                    continue;
                }
                match &section {
                    Some(name) => debug!(section = %name, line = %line, "fetch response"),
                    None => {
                        return Err(GitError::Protocol(format!(
                            "unexpected line in fetch response: {:?}",
                            line
                        )))
                    }
                }
            }
        }
    }
}
