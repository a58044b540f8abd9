//! Top-level box walk over a file to locate the movie metadata box.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::trace;

use crate::FourCC;

const MOOV: FourCC = FourCC::of(b"moov");

/// Walks the top-level boxes of the file and returns the byte range
/// `(offset, size)` of the `moov` box, or `None` when the file has no such
/// box or its structure ends early. Only 8-16 header bytes are read per
/// step; the `moov` box of a multi-gigabyte audiobook is often near the
/// end, so nothing else is pulled in here. Read failures propagate.
pub fn find_moov(input: &mut (impl Read + Seek)) -> std::io::Result<Option<(u64, u64)>> {
    let file_size = input.seek(SeekFrom::End(0))?;
    let mut pos = 0u64;
    while pos < file_size && file_size - pos >= 8 {
        input.seek(SeekFrom::Start(pos))?;
        let size32 = input.read_u32::<BigEndian>()?;
        let kind = FourCC(input.read_u32::<BigEndian>()?);
        let (size, header_size) = match size32 {
            1 => {
                if file_size - pos < 16 {
                    return Ok(None);
                }
                (input.read_u64::<BigEndian>()?, 16)
            }
            // The last top-level box may extend to the end of the file.
            0 => (file_size - pos, 8),
            _ => (u64::from(size32), 8),
        };
        trace!(kind = %kind, offset = pos, size, "top-level atom");
        if size <= header_size {
            return Ok(None);
        }
        if kind == MOOV {
            return Ok(Some((pos, size)));
        }
        // A declared size large enough to wrap the position is malformed;
        // the walk ends the same way as running off the end of the file.
        let Some(next) = pos.checked_add(size) else {
            return Ok(None);
        };
        pos = next;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn atom_bytes(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(tag);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn finds_moov_after_other_boxes() {
        let mut data = atom_bytes(b"ftyp", &[0; 8]);
        data.extend(atom_bytes(b"mdat", &[0; 32]));
        let moov_offset = data.len() as u64;
        data.extend(atom_bytes(b"moov", &[0; 16]));

        let found = find_moov(&mut Cursor::new(data)).unwrap();
        assert_eq!(found, Some((moov_offset, 24)));
    }

    #[test]
    fn finds_moov_with_extended_size_preceding() {
        let mut data = 1u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&26u64.to_be_bytes());
        data.extend_from_slice(&[0; 10]);
        let moov_offset = data.len() as u64;
        data.extend(atom_bytes(b"moov", &[0; 4]));

        let found = find_moov(&mut Cursor::new(data)).unwrap();
        assert_eq!(found, Some((moov_offset, 12)));
    }

    #[test]
    fn tolerates_trailing_size_zero_box() {
        let mut data = atom_bytes(b"ftyp", &[0; 8]);
        let moov_offset = data.len() as u64;
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&[0; 40]);
        let total = data.len() as u64;

        let found = find_moov(&mut Cursor::new(data)).unwrap();
        assert_eq!(found, Some((moov_offset, total - moov_offset)));
    }

    #[test]
    fn missing_moov_is_not_an_error() {
        let mut data = atom_bytes(b"ftyp", &[0; 8]);
        data.extend(atom_bytes(b"mdat", &[0; 8]));
        assert_eq!(find_moov(&mut Cursor::new(data)).unwrap(), None);

        assert_eq!(find_moov(&mut Cursor::new(Vec::new())).unwrap(), None);
    }

    #[test]
    fn wrapping_extended_size_ends_the_walk() {
        // A box declaring u64::MAX would wrap the walk position; the file
        // is malformed, not an error.
        let mut data = 1u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&u64::MAX.to_be_bytes());
        data.extend_from_slice(&[0; 16]);
        assert_eq!(find_moov(&mut Cursor::new(data)).unwrap(), None);
    }

    #[test]
    fn degenerate_box_size_ends_the_walk() {
        let mut data = 4u32.to_be_bytes().to_vec(); // smaller than its own header
        data.extend_from_slice(b"junk");
        data.extend(atom_bytes(b"moov", &[0; 4]));
        assert_eq!(find_moov(&mut Cursor::new(data)).unwrap(), None);
    }
}
