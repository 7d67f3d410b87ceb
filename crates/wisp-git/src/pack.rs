//! Git pack file format implementation.
//!
//! Pack files are the format used by git for efficient object transfer.
//! See: https://git-scm.com/docs/pack-format

use crate::delta::{Delta, RefDelta};
use crate::sideband::server_message;
use crate::{GitError, Result};
use flate2::bufread::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use std::io::{self, BufRead, BufReader, Read, Write};
use wisp_storage::{GitObject, ObjectId, ObjectType};

/// Magic bytes at the start of a pack file.
const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Version written by [`PackBuilder`].
const PACK_VERSION: u32 = 2;
/// Pack code of an offset delta, which this decoder does not handle.
const OFS_DELTA: u8 = 6;
/// Upper bound on buffer preallocation driven by untrusted headers.
const MAX_PREALLOC: usize = 1 << 20;

/// One decoded pack entry.
#[derive(Debug, Clone)]
pub enum PackedObject {
    /// A complete object.
    Object(GitObject),
    /// A delta that still needs its base.
    Delta(RefDelta),
}

/// Buffered reader that hashes every byte it hands out.
struct HashingReader<R> {
    inner: R,
    hasher: Sha1,
}

impl<R: BufRead> Read for HashingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = {
            let available = self.inner.fill_buf()?;
            let n = available.len().min(out.len());
            out[..n].copy_from_slice(&available[..n]);
            n
        };
        self.consume(n);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for HashingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        if let Ok(buf) = self.inner.fill_buf() {
            if let Some(consumed) = buf.get(..amt) {
                self.hasher.update(consumed);
            }
        }
        self.inner.consume(amt);
    }
}

/// Streaming pack decoder.
///
/// Validates the header on construction, then yields one
/// [`PackedObject`] per entry. After the last entry the trailing SHA-1
/// checksum is verified; a mismatch is reported as the final item. The
/// iterator stops after the first error.
pub struct PackReader<R> {
    stream: HashingReader<BufReader<R>>,
    version: u32,
    object_count: u32,
    remaining: u32,
    finished: bool,
}

impl<R: Read> PackReader<R> {
    /// Reads and validates the pack header.
    pub fn new(reader: R) -> Result<Self> {
        let mut stream = HashingReader {
            inner: BufReader::new(reader),
            hasher: Sha1::new(),
        };

        let mut header = [0u8; 12];
        stream
            .read_exact(&mut header)
            .map_err(decode_io("pack header"))?;

        if &header[0..4] != PACK_SIGNATURE {
            return Err(GitError::Decode("invalid pack signature".to_string()));
        }
        let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if version != 2 && version != 3 {
            return Err(GitError::Decode(format!(
                "unsupported pack version: {}",
                version
            )));
        }
        let object_count = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);

        Ok(Self {
            stream,
            version,
            object_count,
            remaining: object_count,
            finished: false,
        })
    }

    /// Pack format version (2 or 3).
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of entries announced by the header.
    pub fn object_count(&self) -> u32 {
        self.object_count
    }

    /// Entries not yet read.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    fn read_entry(&mut self) -> Result<PackedObject> {
        let (code, size) = self.read_entry_header()?;

        if code == OFS_DELTA {
            return Err(GitError::Decode(
                "offset deltas are not supported".to_string(),
            ));
        }
        let object_type =
            ObjectType::from_pack_type(code).map_err(|e| GitError::Decode(e.to_string()))?;

        if object_type.is_delta() {
            let mut base = [0u8; 20];
            self.stream
                .read_exact(&mut base)
                .map_err(decode_io("delta base id"))?;
            let body = self.inflate(size)?;
            let delta = Delta::parse(&body)?;
            return Ok(PackedObject::Delta(RefDelta {
                base: ObjectId::from_bytes(base),
                delta,
            }));
        }

        let object = GitObject::new(object_type, self.inflate(size)?);
        object
            .parse()
            .map_err(|e| GitError::Decode(format!("{} {}: {}", object_type, object.id, e)))?;
        Ok(PackedObject::Object(object))
    }

    /// Reads the type code and inflated size of the next entry.
    fn read_entry_header(&mut self) -> Result<(u8, usize)> {
        let mut byte = self.next_byte()?;
        let code = (byte >> 4) & 0x07;
        let mut size = (byte & 0x0f) as u64;
        let mut shift = 4u32;

        while byte & 0x80 != 0 {
            byte = self.next_byte()?;
            if shift > 57 {
                return Err(GitError::Decode("entry size overflows".to_string()));
            }
            size |= ((byte & 0x7f) as u64) << shift;
            shift += 7;
        }

        let size = usize::try_from(size)
            .map_err(|_| GitError::Decode(format!("entry size {} too large", size)))?;
        Ok((code, size))
    }

    fn next_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.stream
            .read_exact(&mut byte)
            .map_err(decode_io("entry header"))?;
        Ok(byte[0])
    }

    /// Inflates one zlib stream that must produce exactly `size` bytes.
    fn inflate(&mut self, size: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(size.min(MAX_PREALLOC));
        let decoder = ZlibDecoder::new(&mut self.stream);
        decoder
            .take(size as u64 + 1)
            .read_to_end(&mut out)
            .map_err(decode_io("inflate"))?;

        if out.len() != size {
            return Err(GitError::Decode(format!(
                "entry inflated to {} bytes, header declared {}",
                out.len(),
                size
            )));
        }
        Ok(out)
    }

    fn verify_trailer(&mut self) -> Result<()> {
        let computed = self.stream.hasher.clone().finalize();
        let mut trailer = [0u8; 20];
        self.stream
            .read_exact(&mut trailer)
            .map_err(decode_io("pack checksum"))?;
        if computed.as_slice() != trailer {
            return Err(GitError::Decode("pack checksum mismatch".to_string()));
        }
        Ok(())
    }
}

impl<R: Read> Iterator for PackReader<R> {
    type Item = Result<PackedObject>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.remaining == 0 {
            self.finished = true;
            return self.verify_trailer().err().map(Err);
        }

        self.remaining -= 1;
        let entry = self.read_entry();
        if entry.is_err() {
            self.finished = true;
        }
        Some(entry)
    }
}

/// Maps a read failure, surfacing server messages that travelled in-band.
fn decode_io(context: &'static str) -> impl Fn(io::Error) -> GitError {
    move |e| match server_message(&e) {
        Some(msg) => GitError::from_server(msg, None),
        None => GitError::Decode(format!("{}: {}", context, e)),
    }
}

enum Entry {
    Object(GitObject),
    RefDelta { base: ObjectId, data: Vec<u8> },
}

/// Builds a version 2 pack file.
pub struct PackBuilder {
    entries: Vec<Entry>,
}

impl PackBuilder {
    /// Creates a new pack builder.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds an object to the pack.
    pub fn add(&mut self, object: GitObject) {
        self.entries.push(Entry::Object(object));
    }

    /// Adds a reference delta against `base`.
    pub fn add_ref_delta(&mut self, base: ObjectId, delta: &Delta) {
        self.entries.push(Entry::RefDelta {
            base,
            data: delta.encode(),
        });
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries were added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the pack file.
    pub fn build(self) -> Result<Vec<u8>> {
        let mut pack = Vec::new();

        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());

        for entry in &self.entries {
            match entry {
                Entry::Object(object) => {
                    let kind = object.object_type.pack_type();
                    write_entry_header(&mut pack, kind, object.data.len());
                    write_compressed(&mut pack, &object.data)?;
                }
                Entry::RefDelta { base, data } => {
                    write_entry_header(&mut pack, ObjectType::RefDelta.pack_type(), data.len());
                    pack.extend_from_slice(base.as_bytes());
                    write_compressed(&mut pack, data)?;
                }
            }
        }

        let checksum = Sha1::digest(&pack);
        pack.extend_from_slice(&checksum);

        Ok(pack)
    }
}

impl Default for PackBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// First byte: continuation bit, 3-bit type, low 4 size bits. Then 7 size bits per byte.
fn write_entry_header(pack: &mut Vec<u8>, code: u8, size: usize) {
    let mut first_byte = (code << 4) | ((size & 0x0f) as u8);
    let mut remaining = size >> 4;
    if remaining > 0 {
        first_byte |= 0x80;
    }
    pack.push(first_byte);

    while remaining > 0 {
        let mut byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        if remaining > 0 {
            byte |= 0x80;
        }
        pack.push(byte);
    }
}

fn write_compressed(pack: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    pack.extend_from_slice(&encoder.finish()?);
    Ok(())
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: Pack roundtrip preserves blob content
        #[test]
        fn prop_pack_roundtrip_blob(data in prop::collection::vec(any::<u8>(), 0..10000)) {
            let blob = GitObject::blob(data.clone());
            let id = blob.id;

            let mut builder = PackBuilder::new();
            builder.add(blob);
            let pack = builder.build().unwrap();

            let entries: Vec<_> = PackReader::new(pack.as_slice())
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
            prop_assert_eq!(entries.len(), 1);
            match &entries[0] {
                PackedObject::Object(obj) => {
                    prop_assert_eq!(obj.id, id);
                    prop_assert_eq!(obj.data.as_ref(), data.as_slice());
                }
                PackedObject::Delta(_) => prop_assert!(false, "unexpected delta"),
            }
        }

        /// Property: Invalid pack data doesn't panic
        #[test]
        fn prop_invalid_pack_no_panic(data in prop::collection::vec(any::<u8>(), 0..1000)) {
            if let Ok(reader) = PackReader::new(data.as_slice()) {
                for entry in reader {
                    let _ = entry;
                }
            }
        }

        /// Property: Corrupted checksum is detected
        #[test]
        fn prop_corrupted_checksum_detected(
            content in prop::collection::vec(any::<u8>(), 1..1000),
            corrupt_byte in 0u8..20
        ) {
            let mut builder = PackBuilder::new();
            builder.add(GitObject::blob(content));
            let mut pack = builder.build().unwrap();

            let len = pack.len();
            pack[len - 1 - (corrupt_byte as usize % 20)] ^= 0xFF;

            let result: Result<Vec<_>> = PackReader::new(pack.as_slice()).unwrap().collect();
            prop_assert!(result.is_err());
        }
    }
}
