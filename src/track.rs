//! Track metadata extraction from an in-memory `moov` buffer.

use byteorder::{BigEndian, ReadBytesExt};
use tracing::trace;

use crate::atom::{children, first_child, Atom, AtomHeader};
use crate::FourCC;

const MOOV: FourCC = FourCC::of(b"moov");
const TRAK: FourCC = FourCC::of(b"trak");
const TKHD: FourCC = FourCC::of(b"tkhd");
const TREF: FourCC = FourCC::of(b"tref");
const CHAP: FourCC = FourCC::of(b"chap");
const MDIA: FourCC = FourCC::of(b"mdia");
const MDHD: FourCC = FourCC::of(b"mdhd");
const MINF: FourCC = FourCC::of(b"minf");
const STBL: FourCC = FourCC::of(b"stbl");
const STTS: FourCC = FourCC::of(b"stts");
const STSC: FourCC = FourCC::of(b"stsc");
const STSZ: FourCC = FourCC::of(b"stsz");
const STCO: FourCC = FourCC::of(b"stco");
const CO64: FourCC = FourCC::of(b"co64");

/// One `stts` run: `sample_count` consecutive samples each lasting
/// `sample_delta` timescale ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeToSampleEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

/// One `stsc` run: every chunk from `first_chunk` (1-based) up to the next
/// entry's `first_chunk` holds `samples_per_chunk` samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleToChunkEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
}

/// Decoded `stsz`: either one uniform size for every sample, or a
/// per-sample list when `uniform_size` is 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSizes {
    pub uniform_size: u32,
    pub sizes: Vec<u32>,
}

/// Everything about one `trak` box that the chapter path cares about.
/// Optional fields stay `None` when the corresponding box is absent or
/// unreadably truncated.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub track_id: u32,
    pub time_scale: Option<u32>,
    pub chapter_ref_ids: Option<Vec<u32>>,
    pub time_to_sample: Option<Vec<TimeToSampleEntry>>,
    pub sample_to_chunk: Option<Vec<SampleToChunkEntry>>,
    pub sample_sizes: Option<SampleSizes>,
    pub chunk_offsets: Option<Vec<u64>>,
}

/// The sample tables of a chapter-capable track, borrowed out of a
/// [`TrackInfo`] once their presence has been established.
pub struct ChapterTables<'a> {
    pub time_scale: u32,
    pub time_to_sample: &'a [TimeToSampleEntry],
    pub sample_to_chunk: &'a [SampleToChunkEntry],
    pub sample_sizes: &'a SampleSizes,
    pub chunk_offsets: &'a [u64],
}

impl TrackInfo {
    /// A track can yield chapters only when the timescale and all four
    /// sample tables are present. A zero timescale would make every start
    /// time undefined and counts as absent.
    pub fn chapter_tables(&self) -> Option<ChapterTables<'_>> {
        let time_scale = self.time_scale.filter(|&scale| scale > 0)?;
        Some(ChapterTables {
            time_scale,
            time_to_sample: self.time_to_sample.as_deref()?,
            sample_to_chunk: self.sample_to_chunk.as_deref()?,
            sample_sizes: self.sample_sizes.as_ref()?,
            chunk_offsets: self.chunk_offsets.as_deref()?,
        })
    }
}

fn u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    let mut bytes = buf.get(offset..offset + 4)?;
    bytes.read_u32::<BigEndian>().ok()
}

fn u64_at(buf: &[u8], offset: usize) -> Option<u64> {
    let mut bytes = buf.get(offset..offset + 8)?;
    bytes.read_u64::<BigEndian>().ok()
}

/// Reads the version-shifted 32-bit field shared by `tkhd` (track id) and
/// `mdhd` (timescale): version 1 widens the two leading timestamps to 64
/// bits, pushing the field from payload offset 12 to 20.
fn versioned_u32(buf: &[u8], atom: &Atom) -> Option<u32> {
    let payload = atom.payload();
    let version = *buf.get(payload.start)?;
    let field = payload.start + if version == 1 { 20 } else { 12 };
    if field + 4 > payload.end {
        return None;
    }
    u32_at(buf, field)
}

/// `tref`/`chap` payload is a flat id array with no full-box header.
fn parse_chap_ref_ids(buf: &[u8], atom: &Atom) -> Vec<u32> {
    let payload = atom.payload();
    let mut ids = Vec::new();
    let mut pos = payload.start;
    while pos + 4 <= payload.end {
        if let Some(id) = u32_at(buf, pos) {
            ids.push(id);
        }
        pos += 4;
    }
    ids
}

// The sample tables are all full boxes: 4 bytes version/flags, 4 bytes
// entry count, then fixed-width entries. Every loop below stops early when
// the declared count would run past the box's own byte range.

fn parse_stts(buf: &[u8], atom: &Atom) -> Vec<TimeToSampleEntry> {
    let payload = atom.payload();
    let Some(entry_count) = u32_at(buf, payload.start + 4) else {
        return Vec::new();
    };
    let mut entries = Vec::new();
    let mut pos = payload.start + 8;
    for _ in 0..entry_count {
        if pos + 8 > payload.end {
            break;
        }
        let (Some(sample_count), Some(sample_delta)) = (u32_at(buf, pos), u32_at(buf, pos + 4))
        else {
            break;
        };
        entries.push(TimeToSampleEntry {
            sample_count,
            sample_delta,
        });
        pos += 8;
    }
    entries
}

fn parse_stsc(buf: &[u8], atom: &Atom) -> Vec<SampleToChunkEntry> {
    let payload = atom.payload();
    let Some(entry_count) = u32_at(buf, payload.start + 4) else {
        return Vec::new();
    };
    let mut entries = Vec::new();
    let mut pos = payload.start + 8;
    for _ in 0..entry_count {
        // 12-byte entries; the trailing sample description index is skipped.
        if pos + 12 > payload.end {
            break;
        }
        let (Some(first_chunk), Some(samples_per_chunk)) = (u32_at(buf, pos), u32_at(buf, pos + 4))
        else {
            break;
        };
        entries.push(SampleToChunkEntry {
            first_chunk,
            samples_per_chunk,
        });
        pos += 12;
    }
    entries
}

fn parse_stsz(buf: &[u8], atom: &Atom) -> Option<SampleSizes> {
    let payload = atom.payload();
    let uniform_size = u32_at(buf, payload.start + 4)?;
    let sample_count = u32_at(buf, payload.start + 8)?;
    let mut sizes = Vec::new();
    if uniform_size == 0 {
        let mut pos = payload.start + 12;
        for _ in 0..sample_count {
            if pos + 4 > payload.end {
                break;
            }
            let Some(size) = u32_at(buf, pos) else { break };
            sizes.push(size);
            pos += 4;
        }
    }
    Some(SampleSizes { uniform_size, sizes })
}

fn parse_chunk_offsets(buf: &[u8], atom: &Atom, wide: bool) -> Vec<u64> {
    let payload = atom.payload();
    let Some(entry_count) = u32_at(buf, payload.start + 4) else {
        return Vec::new();
    };
    let width = if wide { 8 } else { 4 };
    let mut offsets = Vec::new();
    let mut pos = payload.start + 8;
    for _ in 0..entry_count {
        if pos + width > payload.end {
            break;
        }
        let offset = if wide {
            u64_at(buf, pos)
        } else {
            u32_at(buf, pos).map(u64::from)
        };
        let Some(offset) = offset else { break };
        offsets.push(offset);
        pos += width;
    }
    offsets
}

fn parse_trak(buf: &[u8], trak: &Atom) -> Option<TrackInfo> {
    let range = trak.payload();

    let tkhd = first_child(buf, range.clone(), TKHD)?;
    let track_id = versioned_u32(buf, &tkhd)?;
    if track_id == 0 {
        return None;
    }

    let mut info = TrackInfo {
        track_id,
        time_scale: None,
        chapter_ref_ids: None,
        time_to_sample: None,
        sample_to_chunk: None,
        sample_sizes: None,
        chunk_offsets: None,
    };

    if let Some(tref) = first_child(buf, range.clone(), TREF) {
        if let Some(chap) = first_child(buf, tref.payload(), CHAP) {
            info.chapter_ref_ids = Some(parse_chap_ref_ids(buf, &chap));
        }
    }

    if let Some(mdia) = first_child(buf, range, MDIA) {
        if let Some(mdhd) = first_child(buf, mdia.payload(), MDHD) {
            info.time_scale = versioned_u32(buf, &mdhd);
        }
        if let Some(stbl) = first_child(buf, mdia.payload(), MINF)
            .and_then(|minf| first_child(buf, minf.payload(), STBL))
        {
            let range = stbl.payload();
            if let Some(stts) = first_child(buf, range.clone(), STTS) {
                info.time_to_sample = Some(parse_stts(buf, &stts));
            }
            if let Some(stsc) = first_child(buf, range.clone(), STSC) {
                info.sample_to_chunk = Some(parse_stsc(buf, &stsc));
            }
            if let Some(stsz) = first_child(buf, range.clone(), STSZ) {
                info.sample_sizes = parse_stsz(buf, &stsz);
            }
            // stco's 32-bit offsets win when both variants are present.
            if let Some(stco) = first_child(buf, range.clone(), STCO) {
                info.chunk_offsets = Some(parse_chunk_offsets(buf, &stco, false));
            } else if let Some(co64) = first_child(buf, range, CO64) {
                info.chunk_offsets = Some(parse_chunk_offsets(buf, &co64, true));
            }
        }
    }

    Some(info)
}

/// Extracts a [`TrackInfo`] from every `trak` child of the given `moov`
/// buffer. The buffer must start with the `moov` box header itself; a
/// buffer that does not is treated as having no tracks.
pub fn parse_tracks(moov: &[u8]) -> Vec<TrackInfo> {
    let Some(header) = AtomHeader::read_at(moov, 0) else {
        return Vec::new();
    };
    if header.kind != MOOV {
        return Vec::new();
    }
    let end = (header.size as usize).min(moov.len());
    let range = (header.header_size as usize).min(end)..end;

    let mut tracks = Vec::new();
    for trak in children(moov, range, TRAK) {
        // Tracks with an unreadable header are skipped, not fatal.
        if let Some(info) = parse_trak(moov, &trak) {
            trace!(track_id = info.track_id, "parsed trak");
            tracks.push(info);
        }
    }
    tracks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom_bytes(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(tag);
        out.extend_from_slice(payload);
        out
    }

    fn full_box(tag: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![version, 0, 0, 0];
        payload.extend_from_slice(body);
        atom_bytes(tag, &payload)
    }

    fn tkhd_v0(track_id: u32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0; 8]); // creation + modification (32-bit)
        body.extend_from_slice(&track_id.to_be_bytes());
        body.extend_from_slice(&[0; 8]); // reserved + duration
        full_box(b"tkhd", 0, &body)
    }

    fn tkhd_v1(track_id: u32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0; 16]); // creation + modification (64-bit)
        body.extend_from_slice(&track_id.to_be_bytes());
        body.extend_from_slice(&[0; 12]); // reserved + duration
        full_box(b"tkhd", 1, &body)
    }

    fn mdhd_v0(time_scale: u32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0; 8]);
        body.extend_from_slice(&time_scale.to_be_bytes());
        body.extend_from_slice(&[0; 8]);
        full_box(b"mdhd", 0, &body)
    }

    fn mdhd_v1(time_scale: u32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0; 16]);
        body.extend_from_slice(&time_scale.to_be_bytes());
        body.extend_from_slice(&[0; 12]);
        full_box(b"mdhd", 1, &body)
    }

    fn table(tag: &[u8; 4], entries: &[&[u8]]) -> Vec<u8> {
        let mut body = (entries.len() as u32).to_be_bytes().to_vec();
        for entry in entries {
            body.extend_from_slice(entry);
        }
        full_box(tag, 0, &body)
    }

    fn wrap_moov(children: Vec<Vec<u8>>) -> Vec<u8> {
        let payload: Vec<u8> = children.into_iter().flatten().collect();
        atom_bytes(b"moov", &payload)
    }

    #[test]
    fn version_byte_selects_track_id_offset() {
        let moov = wrap_moov(vec![atom_bytes(b"trak", &tkhd_v0(7))]);
        assert_eq!(parse_tracks(&moov)[0].track_id, 7);

        let moov = wrap_moov(vec![atom_bytes(b"trak", &tkhd_v1(9))]);
        assert_eq!(parse_tracks(&moov)[0].track_id, 9);
    }

    #[test]
    fn version_byte_selects_timescale_offset() {
        for mdhd in [mdhd_v0(44100), mdhd_v1(44100)] {
            let mdia = atom_bytes(b"mdia", &mdhd);
            let mut trak = tkhd_v0(1);
            trak.extend(mdia);
            let moov = wrap_moov(vec![atom_bytes(b"trak", &trak)]);
            assert_eq!(parse_tracks(&moov)[0].time_scale, Some(44100));
        }
    }

    #[test]
    fn truncated_tkhd_skips_the_track() {
        let trak = atom_bytes(b"trak", &full_box(b"tkhd", 0, &[0; 8]));
        let moov = wrap_moov(vec![trak, atom_bytes(b"trak", &tkhd_v0(3))]);
        let tracks = parse_tracks(&moov);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].track_id, 3);
    }

    #[test]
    fn chap_reference_ids_are_collected_in_order() {
        let chap = atom_bytes(b"chap", &[0, 0, 0, 2, 0, 0, 0, 5]);
        let tref = atom_bytes(b"tref", &chap);
        let mut trak = tkhd_v0(1);
        trak.extend(tref);
        let moov = wrap_moov(vec![atom_bytes(b"trak", &trak)]);
        assert_eq!(parse_tracks(&moov)[0].chapter_ref_ids, Some(vec![2, 5]));
    }

    fn stbl_trak(track_id: u32, stbl_children: Vec<Vec<u8>>) -> Vec<u8> {
        let stbl = atom_bytes(b"stbl", &stbl_children.concat());
        let minf = atom_bytes(b"minf", &stbl);
        let mut mdia_payload = mdhd_v0(1000);
        mdia_payload.extend(minf);
        let mdia = atom_bytes(b"mdia", &mdia_payload);
        let mut trak = tkhd_v0(track_id);
        trak.extend(mdia);
        atom_bytes(b"trak", &trak)
    }

    #[test]
    fn sample_tables_are_decoded() {
        let stts = table(b"stts", &[&[0, 0, 0, 3, 0, 0, 1, 244]]); // 3 x 500
        let stsc = table(b"stsc", &[&[0, 0, 0, 1, 0, 0, 0, 3, 0, 0, 0, 1]]);
        let mut stsz_body = 0u32.to_be_bytes().to_vec(); // variable sizes
        stsz_body.extend_from_slice(&3u32.to_be_bytes());
        for size in [7u32, 8, 5] {
            stsz_body.extend_from_slice(&size.to_be_bytes());
        }
        let stsz = full_box(b"stsz", 0, &stsz_body);
        let stco = table(b"stco", &[&[0, 0, 0, 40]]);

        let moov = wrap_moov(vec![stbl_trak(2, vec![stts, stsc, stsz, stco])]);
        let tracks = parse_tracks(&moov);
        let info = &tracks[0];

        assert_eq!(
            info.time_to_sample.as_deref(),
            Some(
                &[TimeToSampleEntry {
                    sample_count: 3,
                    sample_delta: 500
                }][..]
            )
        );
        assert_eq!(
            info.sample_to_chunk.as_deref(),
            Some(
                &[SampleToChunkEntry {
                    first_chunk: 1,
                    samples_per_chunk: 3
                }][..]
            )
        );
        assert_eq!(
            info.sample_sizes,
            Some(SampleSizes {
                uniform_size: 0,
                sizes: vec![7, 8, 5]
            })
        );
        assert_eq!(info.chunk_offsets.as_deref(), Some(&[40u64][..]));
        assert!(info.chapter_tables().is_some());
    }

    #[test]
    fn co64_is_used_when_stco_is_absent() {
        let co64 = table(b"co64", &[&[0, 0, 0, 0, 0, 0, 2, 0]]);
        let moov = wrap_moov(vec![stbl_trak(2, vec![co64])]);
        let tracks = parse_tracks(&moov);
        assert_eq!(tracks[0].chunk_offsets.as_deref(), Some(&[512u64][..]));
    }

    #[test]
    fn declared_count_beyond_box_stops_early() {
        // stts declares 4 entries but carries bytes for one.
        let mut body = 4u32.to_be_bytes().to_vec();
        body.extend_from_slice(&[0, 0, 0, 2, 0, 0, 0, 100]);
        let stts = full_box(b"stts", 0, &body);
        let moov = wrap_moov(vec![stbl_trak(2, vec![stts])]);
        let tracks = parse_tracks(&moov);
        assert_eq!(tracks[0].time_to_sample.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn zero_timescale_is_not_chapter_capable() {
        let info = TrackInfo {
            track_id: 1,
            time_scale: Some(0),
            chapter_ref_ids: None,
            time_to_sample: Some(Vec::new()),
            sample_to_chunk: Some(Vec::new()),
            sample_sizes: Some(SampleSizes {
                uniform_size: 1,
                sizes: Vec::new(),
            }),
            chunk_offsets: Some(Vec::new()),
        };
        assert!(info.chapter_tables().is_none());
    }

    #[test]
    fn non_moov_buffer_has_no_tracks() {
        let buf = atom_bytes(b"mdat", &[0; 16]);
        assert!(parse_tracks(&buf).is_empty());
        assert!(parse_tracks(&[]).is_empty());
    }
}
