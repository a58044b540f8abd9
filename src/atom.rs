//! Box header decoding and child traversal over an in-memory buffer.

use std::ops::Range;

use byteorder::{BigEndian, ReadBytesExt};
use tracing::trace;

use crate::FourCC;

/// Decoded box header: `size` covers the whole box including the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomHeader {
    pub kind: FourCC,
    pub size: u64,
    pub header_size: u64,
}

impl AtomHeader {
    /// Decodes the header starting at `offset`. A `size32` of 1 switches to
    /// the 64-bit extended size, a `size32` of 0 means the box runs to the
    /// end of the buffer. Returns `None` when too few bytes remain, which
    /// callers treat as end-of-traversal rather than an error.
    pub fn read_at(buf: &[u8], offset: usize) -> Option<AtomHeader> {
        let mut input = buf.get(offset..)?;
        if input.len() < 8 {
            return None;
        }
        let size32 = input.read_u32::<BigEndian>().ok()?;
        let kind = FourCC(input.read_u32::<BigEndian>().ok()?);
        match size32 {
            1 => {
                let size = input.read_u64::<BigEndian>().ok()?;
                Some(Self {
                    kind,
                    size,
                    header_size: 16,
                })
            }
            0 => Some(Self {
                kind,
                size: (buf.len() - offset) as u64,
                header_size: 8,
            }),
            _ => Some(Self {
                kind,
                size: u64::from(size32),
                header_size: 8,
            }),
        }
    }
}

/// A box located within a buffer.
#[derive(Debug, Clone, Copy)]
pub struct Atom {
    pub offset: usize,
    pub header: AtomHeader,
}

impl Atom {
    /// Byte range of the box payload (past the header).
    pub fn payload(&self) -> Range<usize> {
        self.offset + self.header.header_size as usize..self.end()
    }

    /// Offset one past the last byte of the box.
    pub fn end(&self) -> usize {
        self.offset + self.header.size as usize
    }
}

/// Enumerates every immediate child box within `range`. Traversal stops at
/// a missing header, a box that is not larger than its own header, or a box
/// overrunning the range; whatever was collected up to that point is
/// returned. Truncated or corrupt data never produces an error here.
pub fn scan(buf: &[u8], range: Range<usize>) -> Vec<Atom> {
    let mut atoms = Vec::new();
    let mut pos = range.start;
    while pos + 8 <= range.end {
        let Some(header) = AtomHeader::read_at(buf, pos) else {
            break;
        };
        if header.size <= header.header_size {
            break;
        }
        let Some(end) = (pos as u64).checked_add(header.size) else {
            break;
        };
        if end > range.end as u64 {
            break;
        }
        trace!(kind = %header.kind, offset = pos, size = header.size, "atom");
        atoms.push(Atom { offset: pos, header });
        pos = end as usize;
    }
    atoms
}

/// Immediate children of `range` whose type tag matches `kind`.
pub fn children(buf: &[u8], range: Range<usize>, kind: FourCC) -> Vec<Atom> {
    scan(buf, range)
        .into_iter()
        .filter(|atom| atom.header.kind == kind)
        .collect()
}

/// First immediate child of `range` matching `kind`.
pub fn first_child(buf: &[u8], range: Range<usize>, kind: FourCC) -> Option<Atom> {
    children(buf, range, kind).into_iter().next()
}
