//! Sample layout reconstruction: pure functions of the parsed tables.
//!
//! The chapter track's samples are described by four independent compressed
//! tables. Byte offsets come from `stsc` + `stco` + `stsz`, start times
//! come from `stts`; neither derivation touches the other's tables.

use crate::track::{SampleSizes, SampleToChunkEntry, TimeToSampleEntry};

/// Total number of samples in the track. A uniform `stsz` carries no
/// per-sample list, so the chunk count stands in for the sample count.
pub fn sample_count(sizes: &SampleSizes, chunk_offsets: &[u64]) -> usize {
    if sizes.uniform_size > 0 {
        chunk_offsets.len()
    } else {
        sizes.sizes.len()
    }
}

/// Per-sample byte sizes, materialized from either `stsz` form.
pub fn resolve_sizes(sizes: &SampleSizes, count: usize) -> Vec<u32> {
    if sizes.uniform_size > 0 {
        vec![sizes.uniform_size; count]
    } else {
        sizes.sizes.iter().copied().take(count).collect()
    }
}

/// Samples-per-chunk for a 1-based chunk index. Entries are few and sorted
/// ascending by `first_chunk`; the last entry applies to every chunk from
/// its `first_chunk` onward.
fn samples_per_chunk_for(chunk_index: u32, entries: &[SampleToChunkEntry]) -> u32 {
    for pair in entries.windows(2) {
        if chunk_index >= pair[0].first_chunk && chunk_index < pair[1].first_chunk {
            return pair[0].samples_per_chunk;
        }
    }
    entries.last().map_or(1, |entry| entry.samples_per_chunk)
}

/// Absolute byte offset of every sample, in sample order. Within a chunk,
/// consecutive samples start at the chunk offset and advance by the
/// previous sample's size. Stops once chunks or sizes run out, whichever
/// comes first.
pub fn build_offsets(
    chunk_offsets: &[u64],
    sample_to_chunk: &[SampleToChunkEntry],
    sizes: &[u32],
) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(sizes.len());
    'chunks: for (chunk_index, &chunk_offset) in chunk_offsets.iter().enumerate() {
        let per_chunk = samples_per_chunk_for(chunk_index as u32 + 1, sample_to_chunk);
        let mut intra = 0u64;
        for _ in 0..per_chunk {
            let Some(&size) = sizes.get(offsets.len()) else {
                break 'chunks;
            };
            offsets.push(chunk_offset.saturating_add(intra));
            intra = intra.saturating_add(u64::from(size));
        }
    }
    offsets
}

/// Start time in seconds for each of `count` samples, from the `stts`
/// run-length entries. When the table declares fewer samples than `count`
/// the remaining starts are padded with the running time, which only
/// happens for malformed input.
pub fn build_start_times(
    time_to_sample: &[TimeToSampleEntry],
    time_scale: u32,
    count: usize,
) -> Vec<f64> {
    let scale = f64::from(time_scale);
    let mut starts = Vec::with_capacity(count);
    let mut ticks = 0u64;
    'entries: for entry in time_to_sample {
        for _ in 0..entry.sample_count {
            if starts.len() == count {
                break 'entries;
            }
            starts.push(ticks as f64 / scale);
            ticks = ticks.saturating_add(u64::from(entry.sample_delta));
        }
    }
    while starts.len() < count {
        starts.push(ticks as f64 / scale);
    }
    starts
}
