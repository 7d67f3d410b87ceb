//! Git delta encoding.
//!
//! A delta body is the source length and target length as little-endian
//! base-128 varints, followed by instructions. A command byte with the high
//! bit set is a copy from the base: bits 0-3 select which of four offset
//! bytes follow and bits 4-6 which of three size bytes follow, with a size
//! of zero meaning 0x10000. Otherwise the command byte (1..=127) is the
//! number of literal bytes to insert. Command byte 0 is reserved.

use crate::{GitError, Result};
use bytes::Bytes;
use wisp_storage::ObjectId;

/// Copy size used when no size bytes are present.
const DEFAULT_COPY_LEN: usize = 0x10000;
/// Longest literal run a single insert command can carry.
const MAX_INSERT: usize = 0x7f;
/// Longest copy a single command can carry.
const MAX_COPY: usize = 0xff_ffff;

/// One delta instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Copy `len` bytes starting at `offset` in the base.
    Copy {
        /// Offset into the base.
        offset: usize,
        /// Number of bytes.
        len: usize,
    },
    /// Append literal bytes.
    Insert(Bytes),
}

/// A parsed delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Exact length the base must have.
    pub source_len: usize,
    /// Length of the reconstructed object.
    pub target_len: usize,
    /// Instructions in application order.
    pub instructions: Vec<Instruction>,
}

/// A pack entry expressed as a delta against the object named `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefDelta {
    /// Id of the base object.
    pub base: ObjectId,
    /// Instructions producing the target from the base.
    pub delta: Delta,
}

impl Delta {
    /// Parses the wire encoding.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let source_len = read_varint(data, &mut pos)?;
        let target_len = read_varint(data, &mut pos)?;
        let mut instructions = Vec::new();

        while pos < data.len() {
            let cmd = data[pos];
            pos += 1;

            if cmd & 0x80 != 0 {
                let mut offset = 0usize;
                for i in 0..4 {
                    if cmd & (1 << i) != 0 {
                        offset |= (next_byte(data, &mut pos)? as usize) << (8 * i);
                    }
                }
                let mut len = 0usize;
                for i in 0..3 {
                    if cmd & (0x10 << i) != 0 {
                        len |= (next_byte(data, &mut pos)? as usize) << (8 * i);
                    }
                }
                if len == 0 {
                    len = DEFAULT_COPY_LEN;
                }
                instructions.push(Instruction::Copy { offset, len });
            } else if cmd != 0 {
                let n = cmd as usize;
                let end = pos
                    .checked_add(n)
                    .filter(|&end| end <= data.len())
                    .ok_or_else(|| GitError::Decode("truncated delta insert".to_string()))?;
                instructions.push(Instruction::Insert(Bytes::copy_from_slice(&data[pos..end])));
                pos = end;
            } else {
                return Err(GitError::Decode("reserved delta command 0".to_string()));
            }
        }

        Ok(Self {
            source_len,
            target_len,
            instructions,
        })
    }

    /// Writes the wire encoding, splitting long runs across commands.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(&mut out, self.source_len);
        write_varint(&mut out, self.target_len);

        for instruction in &self.instructions {
            match instruction {
                Instruction::Insert(data) => {
                    for chunk in data.chunks(MAX_INSERT) {
                        out.push(chunk.len() as u8);
                        out.extend_from_slice(chunk);
                    }
                }
                Instruction::Copy { offset, len } => {
                    let mut offset = *offset;
                    let mut remaining = *len;
                    while remaining > 0 {
                        let step = remaining.min(MAX_COPY);
                        encode_copy(&mut out, offset, step);
                        offset += step;
                        remaining -= step;
                    }
                }
            }
        }
        out
    }

    /// Builds a delta that keeps the common prefix and suffix of `source`
    /// and inserts the differing middle of `target`.
    pub fn compute(source: &[u8], target: &[u8]) -> Self {
        let prefix = source
            .iter()
            .zip(target)
            .take_while(|(a, b)| a == b)
            .count();
        let max_suffix = source.len().min(target.len()) - prefix;
        let suffix = source
            .iter()
            .rev()
            .zip(target.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();

        let mut instructions = Vec::new();
        if prefix > 0 {
            instructions.push(Instruction::Copy {
                offset: 0,
                len: prefix,
            });
        }
        let middle = &target[prefix..target.len() - suffix];
        if !middle.is_empty() {
            instructions.push(Instruction::Insert(Bytes::copy_from_slice(middle)));
        }
        if suffix > 0 {
            instructions.push(Instruction::Copy {
                offset: source.len() - suffix,
                len: suffix,
            });
        }

        Self {
            source_len: source.len(),
            target_len: target.len(),
            instructions,
        }
    }
}

/// Applies a delta to its base.
pub fn apply_delta(base: &[u8], delta: &Delta) -> Result<Vec<u8>> {
    if base.len() != delta.source_len {
        return Err(GitError::DeltaSizeMismatch {
            expected: delta.source_len,
            actual: base.len(),
        });
    }

    let produced = delta
        .instructions
        .iter()
        .map(|instruction| match instruction {
            Instruction::Copy { len, .. } => (*len).min(base.len()),
            Instruction::Insert(data) => data.len(),
        })
        .fold(0usize, usize::saturating_add);
    let mut out = Vec::with_capacity(delta.target_len.min(produced));
    for instruction in &delta.instructions {
        match instruction {
            Instruction::Copy { offset, len } => {
                let slice = offset
                    .checked_add(*len)
                    .and_then(|end| base.get(*offset..end))
                    .ok_or(GitError::DeltaBounds {
                        offset: *offset,
                        len: *len,
                        base_len: base.len(),
                    })?;
                out.extend_from_slice(slice);
            }
            Instruction::Insert(data) => out.extend_from_slice(data),
        }
        if out.len() > delta.target_len {
            break;
        }
    }

    if out.len() != delta.target_len {
        return Err(GitError::Decode(format!(
            "delta produced {} bytes, expected {}",
            out.len(),
            delta.target_len
        )));
    }
    Ok(out)
}

fn encode_copy(out: &mut Vec<u8>, offset: usize, len: usize) {
    let cmd_pos = out.len();
    out.push(0x80);
    let mut cmd = 0x80u8;
    for i in 0..4 {
        let byte = ((offset >> (8 * i)) & 0xff) as u8;
        if byte != 0 {
            cmd |= 1 << i;
            out.push(byte);
        }
    }
    if len != DEFAULT_COPY_LEN {
        for i in 0..3 {
            let byte = ((len >> (8 * i)) & 0xff) as u8;
            if byte != 0 {
                cmd |= 0x10 << i;
                out.push(byte);
            }
        }
    }
    out[cmd_pos] = cmd;
}

fn next_byte(data: &[u8], pos: &mut usize) -> Result<u8> {
    let byte = *data
        .get(*pos)
        .ok_or_else(|| GitError::Decode("truncated delta copy".to_string()))?;
    *pos += 1;
    Ok(byte)
}

fn read_varint(data: &[u8], pos: &mut usize) -> Result<usize> {
    let mut value = 0usize;
    let mut shift = 0u32;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| GitError::Decode("truncated delta header".to_string()))?;
        *pos += 1;
        if shift >= usize::BITS {
            return Err(GitError::Decode("delta size overflows".to_string()));
        }
        value |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: usize) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn insert(data: &[u8]) -> Instruction {
        Instruction::Insert(Bytes::copy_from_slice(data))
    }

    #[test]
    fn test_apply_copy_and_insert() {
        let base = b"hello world";
        let delta = Delta {
            source_len: base.len(),
            target_len: 13,
            instructions: vec![
                Instruction::Copy { offset: 0, len: 6 },
                insert(b"there"),
                Instruction::Copy { offset: 5, len: 1 },
                insert(b"!"),
            ],
        };
        assert_eq!(apply_delta(base, &delta).unwrap(), b"hello there !");
    }

    #[test]
    fn test_apply_replaces_middle_line() {
        let base = b"Line 1\nLine 2\nLine 3\n";
        let delta = Delta {
            source_len: base.len(),
            target_len: 30,
            instructions: vec![
                Instruction::Copy { offset: 0, len: 7 },
                insert(b"Modified Line 2\n"),
                Instruction::Copy { offset: 14, len: 7 },
            ],
        };
        let first = apply_delta(base, &delta).unwrap();
        assert_eq!(first, b"Line 1\nModified Line 2\nLine 3\n");
        assert_eq!(apply_delta(base, &delta).unwrap(), first);
    }

    #[test]
    fn test_source_len_must_match_exactly() {
        let delta = Delta {
            source_len: 4,
            target_len: 1,
            instructions: vec![insert(b"x")],
        };
        assert!(matches!(
            apply_delta(b"abc", &delta),
            Err(GitError::DeltaSizeMismatch { expected: 4, actual: 3 })
        ));
        assert!(matches!(
            apply_delta(b"abcde", &delta),
            Err(GitError::DeltaSizeMismatch { expected: 4, actual: 5 })
        ));
    }

    #[test]
    fn test_copy_out_of_bounds() {
        let delta = Delta {
            source_len: 4,
            target_len: 4,
            instructions: vec![Instruction::Copy { offset: 2, len: 4 }],
        };
        assert!(matches!(apply_delta(b"abcd", &delta), Err(GitError::DeltaBounds { .. })));

        let overflow = Delta {
            source_len: 4,
            target_len: 4,
            instructions: vec![Instruction::Copy { offset: usize::MAX, len: 2 }],
        };
        assert!(matches!(apply_delta(b"abcd", &overflow), Err(GitError::DeltaBounds { .. })));
    }

    #[test]
    fn test_target_len_mismatch() {
        let delta = Delta {
            source_len: 0,
            target_len: 5,
            instructions: vec![insert(b"abc")],
        };
        assert!(matches!(apply_delta(b"", &delta), Err(GitError::Decode(_))));
    }

    #[test]
    fn test_parse_wire_bytes() {
        // source 11, target 8, copy offset 6 len 5, insert "!!!"
        let wire = [0x0b, 0x08, 0x91, 0x06, 0x05, 0x03, b'!', b'!', b'!'];
        let delta = Delta::parse(&wire).unwrap();
        assert_eq!(delta.source_len, 11);
        assert_eq!(delta.target_len, 8);
        assert_eq!(
            delta.instructions,
            vec![Instruction::Copy { offset: 6, len: 5 }, insert(b"!!!")]
        );
        assert_eq!(apply_delta(b"hello world", &delta).unwrap(), b"world!!!");
    }

    #[test]
    fn test_copy_size_zero_means_64k() {
        let delta = Delta::parse(&[0x80, 0x80, 0x04, 0x80, 0x80, 0x04, 0x80]).unwrap();
        assert_eq!(delta.source_len, 0x10000);
        assert_eq!(
            delta.instructions,
            vec![Instruction::Copy { offset: 0, len: 0x10000 }]
        );
        let base = vec![7u8; 0x10000];
        assert_eq!(apply_delta(&base, &delta).unwrap(), base);
    }

    #[test]
    fn test_reserved_command_rejected() {
        assert!(matches!(Delta::parse(&[0x01, 0x01, 0x00]), Err(GitError::Decode(_))));
    }

    #[test]
    fn test_truncated_deltas_rejected() {
        assert!(Delta::parse(&[]).is_err());
        assert!(Delta::parse(&[0x80]).is_err());
        assert!(Delta::parse(&[0x01, 0x05, 0x05, b'a']).is_err());
        assert!(Delta::parse(&[0x01, 0x01, 0x91, 0x00]).is_err());
    }

    #[test]
    fn test_encode_splits_long_inserts() {
        let data = vec![b'z'; 300];
        let delta = Delta {
            source_len: 0,
            target_len: 300,
            instructions: vec![Instruction::Insert(Bytes::from(data.clone()))],
        };
        let parsed = Delta::parse(&delta.encode()).unwrap();
        assert_eq!(parsed.instructions.len(), 3);
        assert_eq!(apply_delta(b"", &parsed).unwrap(), data);
    }

    #[test]
    fn test_compute_prefix_suffix() {
        let source = b"fn main() { old(); }";
        let target = b"fn main() { new_call(); }";
        let delta = Delta::compute(source, target);
        assert_eq!(apply_delta(source, &delta).unwrap(), target);
        assert!(matches!(delta.instructions[0], Instruction::Copy { offset: 0, .. }));
    }

    proptest! {
        /// Property: arbitrary bytes never panic the parser
        #[test]
        fn prop_parse_no_panic(data in prop::collection::vec(any::<u8>(), 0..256)) {
            if let Ok(delta) = Delta::parse(&data) {
                let base = vec![0u8; delta.source_len.min(4096)];
                let _ = apply_delta(&base, &delta);
            }
        }

        /// Property: any base whose length differs from the declared source length is refused
        #[test]
        fn prop_source_len_mismatch_refused(
            base in prop::collection::vec(any::<u8>(), 0..512),
            source_len in 0usize..1024,
        ) {
            prop_assume!(base.len() != source_len);
            let delta = Delta {
                source_len,
                target_len: 1,
                instructions: vec![insert(b"x")],
            };
            let result = apply_delta(&base, &delta);
            let refused = matches!(
                result,
                Err(GitError::DeltaSizeMismatch { expected, actual })
                    if expected == source_len && actual == base.len()
            );
            prop_assert!(refused);
        }

        /// Property: a computed delta rebuilds the target from the source
        #[test]
        fn prop_compute_then_apply(
            source in prop::collection::vec(any::<u8>(), 0..2048),
            target in prop::collection::vec(any::<u8>(), 0..2048),
        ) {
            let delta = Delta::compute(&source, &target);
            let wire = delta.encode();
            let parsed = Delta::parse(&wire).unwrap();
            prop_assert_eq!(apply_delta(&source, &parsed).unwrap(), target);
        }
    }
}
