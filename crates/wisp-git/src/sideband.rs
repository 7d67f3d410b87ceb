//! Side-band demultiplexing of the packfile section.
//!
//! After the `packfile` section header every packet starts with a channel
//! byte: 1 carries pack data, 2 carries progress text and 3 carries a fatal
//! error. [`SideBandReader`] exposes channel 1 as a plain byte stream.

use crate::pktline::{PktLine, PktLineReader};
use crate::{GitError, ServerMessage};
use std::io::{self, Read};
use tracing::debug;

const CHANNEL_DATA: u8 = 1;
const CHANNEL_PROGRESS: u8 = 2;
const CHANNEL_ERROR: u8 = 3;

/// Reads pack bytes out of side-band packets.
///
/// A fatal server message surfaces as an [`io::Error`] wrapping a
/// [`ServerMessage`]; use [`server_message`] to recover it.
pub struct SideBandReader<R> {
    packets: PktLineReader<R>,
    buf: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: Read> SideBandReader<R> {
    /// Wraps a packet reader positioned right after the `packfile` header.
    pub fn new(packets: PktLineReader<R>) -> Self {
        Self {
            packets,
            buf: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    /// Pulls packets until one carries pack data. Returns false at end of data.
    fn fill(&mut self) -> io::Result<bool> {
        while !self.done {
            let packet = self.packets.read().map_err(into_io)?;
            let data = match packet {
                Some(PktLine::Data(data)) => data,
                Some(PktLine::Flush) | Some(PktLine::ResponseEnd) | None => {
                    self.done = true;
                    break;
                }
                Some(PktLine::Delimiter) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "unexpected delimiter inside packfile section",
                    ))
                }
            };

            match data.split_first() {
                Some((&CHANNEL_DATA, payload)) if !payload.is_empty() => {
                    self.buf = payload.to_vec();
                    self.pos = 0;
                    return Ok(true);
                }
                Some((&CHANNEL_DATA, _)) => {}
                Some((&CHANNEL_PROGRESS, payload)) => {
                    if let Some(msg) = ServerMessage::detect(payload) {
                        return Err(fatal(msg));
                    }
                    debug!(progress = %String::from_utf8_lossy(payload).trim_end(), "remote");
                }
                Some((&CHANNEL_ERROR, payload)) => {
                    let msg = ServerMessage::detect(payload).unwrap_or_else(|| {
                        ServerMessage::new("fatal", String::from_utf8_lossy(payload))
                    });
                    return Err(fatal(msg));
                }
                _ => {
                    if let Some(msg) = ServerMessage::detect(&data) {
                        return Err(fatal(msg));
                    }
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid side-band channel in packet of {} bytes", data.len()),
                    ));
                }
            }
        }
        Ok(false)
    }
}

impl<R: Read> Read for SideBandReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.buf.len() && !self.fill()? {
            return Ok(0);
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn fatal(msg: ServerMessage) -> io::Error {
    io::Error::new(io::ErrorKind::Other, msg)
}

fn into_io(err: GitError) -> io::Error {
    match err {
        GitError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

/// Extracts a server message carried by an I/O error, if any.
pub fn server_message(err: &io::Error) -> Option<ServerMessage> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<ServerMessage>())
        .cloned()
}
