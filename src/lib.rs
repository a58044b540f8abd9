//! Embedded chapter-track extraction for ISO-BMFF ("MP4-family") files.
//!
//! Audiobook containers (m4a/m4b/mp4) can carry their chapter markers as a
//! QuickTime text track referenced through `tref`/`chap` instead of a tag
//! atom. Generic tag readers do not expose that track, so this crate walks
//! the box structure itself: it locates `moov`, resolves the referenced
//! chapter track, rebuilds the track's sample layout from the four
//! compressed sample tables and reads each chapter title from its computed
//! byte offset.
//!
//! The only entry point is [`extract_chapters`]. `Ok(Some(..))` is an
//! ordered chapter list, `Ok(None)` means "this file has no usable embedded
//! chapter track" (missing boxes, truncated tables and implausible results
//! all collapse into this case), and `Err` is reserved for real I/O
//! failures.

use std::fmt::{self, Debug, Display, Formatter, Write as _};

use thiserror::Error;

pub mod atom;
pub mod chapter;
pub mod file;
pub mod sample;
pub mod track;

pub use chapter::{extract_chapters, Chapter};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A 4-character box type tag, stored big-endian like on the wire.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub u32);

impl FourCC {
    pub const fn of(tag: &[u8; 4]) -> Self {
        Self(u32::from_be_bytes(*tag))
    }
}

impl Debug for FourCC {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0.to_be_bytes() {
            f.write_char(if byte.is_ascii_graphic() {
                byte as char
            } else {
                '.'
            })?;
        }
        Ok(())
    }
}

impl Display for FourCC {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::FourCC;

    #[test]
    fn fourcc_formats_as_ascii_tag() {
        assert_eq!(format!("{}", FourCC::of(b"moov")), "moov");
    }

    #[test]
    fn fourcc_masks_non_graphic_bytes() {
        assert_eq!(format!("{}", FourCC(0x6d6f_6f00)), "moo.");
    }
}
