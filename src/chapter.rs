//! Chapter text reading and the extraction pipeline tying the stages
//! together.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::file::find_moov;
use crate::sample;
use crate::track::parse_tracks;
use crate::Result;

/// Keeps a malformed size field in `moov` or a sample table from turning
/// into a multi-gigabyte allocation.
const MAX_MOOV_SIZE: u64 = 100 * 1024 * 1024;
const MAX_TITLE_SAMPLE_SIZE: u64 = 64 * 1024;

/// One chapter marker. `duration_seconds` is absent for the final chapter
/// and whenever the successor's start does not advance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub title: String,
    pub start_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// Reads one QuickTime text sample: a 2-byte big-endian length prefix
/// followed by UTF-8 title bytes. Undersized samples and reads past the
/// end of the file yield an empty title, not an error.
fn read_title_at(input: &mut File, offset: u64, size: u64) -> std::io::Result<String> {
    if size < 2 || size > MAX_TITLE_SAMPLE_SIZE {
        return Ok(String::new());
    }
    input.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size as usize];
    match input.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(String::new()),
        Err(e) => return Err(e),
    }
    let length = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
    if length == 0 {
        return Ok(String::new());
    }
    let end = (2 + length).min(buf.len());
    Ok(String::from_utf8_lossy(&buf[2..end]).trim().to_string())
}

/// Durations are derived from consecutive start times; a successor that
/// does not move forward leaves the duration absent rather than emitting a
/// non-positive value.
fn assign_durations(chapters: &mut [Chapter]) {
    for index in 0..chapters.len() {
        let Some(next_start) = chapters.get(index + 1).map(|next| next.start_seconds) else {
            continue;
        };
        if next_start > chapters[index].start_seconds {
            chapters[index].duration_seconds = Some(next_start - chapters[index].start_seconds);
        }
    }
}

/// Extracts the chapter list embedded as a QuickTime chapter text track.
///
/// `Ok(None)` covers every way a file can fail to carry usable chapters:
/// no `moov`, no `tref`/`chap` reference, a referenced track without the
/// full set of sample tables, zero samples, or a single all-placeholder
/// chapter. Only true I/O failures surface as `Err`, so the caller can
/// fall back to its generic tag reader on `None` without masking a broken
/// file handle as "no chapters".
pub fn extract_chapters(path: impl AsRef<Path>) -> Result<Option<Vec<Chapter>>> {
    let mut file = File::open(path.as_ref())?;

    let Some((moov_offset, moov_size)) = find_moov(&mut file)? else {
        debug!("no moov box");
        return Ok(None);
    };
    if moov_size > MAX_MOOV_SIZE {
        debug!(moov_size, "moov box implausibly large");
        return Ok(None);
    }

    // One bulk read of the whole moov box; everything below the top level
    // is parsed from this buffer. A short read just truncates traversal.
    file.seek(SeekFrom::Start(moov_offset))?;
    let mut moov = Vec::with_capacity(moov_size as usize);
    file.by_ref().take(moov_size).read_to_end(&mut moov)?;

    let tracks = parse_tracks(&moov);

    let chapter_track_id = tracks.iter().find_map(|track| {
        track
            .chapter_ref_ids
            .as_ref()
            .and_then(|ids| ids.first().copied())
    });
    let Some(chapter_track_id) = chapter_track_id else {
        debug!("no track references a chapter track");
        return Ok(None);
    };
    let Some(chapter_track) = tracks.iter().find(|track| track.track_id == chapter_track_id)
    else {
        debug!(chapter_track_id, "referenced chapter track is missing");
        return Ok(None);
    };
    let Some(tables) = chapter_track.chapter_tables() else {
        debug!(chapter_track_id, "chapter track lacks sample tables");
        return Ok(None);
    };

    let count = sample::sample_count(tables.sample_sizes, tables.chunk_offsets);
    if count == 0 {
        debug!(chapter_track_id, "chapter track has no samples");
        return Ok(None);
    }
    let sizes = sample::resolve_sizes(tables.sample_sizes, count);
    let offsets = sample::build_offsets(tables.chunk_offsets, tables.sample_to_chunk, &sizes);
    let starts = sample::build_start_times(tables.time_to_sample, tables.time_scale, count);

    let mut chapters = Vec::with_capacity(count);
    let mut any_real_title = false;
    for index in 0..count {
        let offset = offsets.get(index).copied().unwrap_or(0);
        let size = sizes.get(index).copied().unwrap_or(0);
        let title = read_title_at(&mut file, offset, u64::from(size))?;
        let title = if title.is_empty() {
            format!("Chapter {}", index + 1)
        } else {
            any_real_title = true;
            title
        };
        chapters.push(Chapter {
            title,
            start_seconds: starts.get(index).copied().unwrap_or(0.0),
            duration_seconds: None,
        });
    }
    assign_durations(&mut chapters);

    // A single placeholder chapter is indistinguishable from no chapter
    // data at all.
    if !any_real_title && chapters.len() <= 1 {
        debug!("only a synthetic single chapter, treating as absent");
        return Ok(None);
    }

    debug!(chapters = chapters.len(), "extracted chapter track");
    Ok(Some(chapters))
}
