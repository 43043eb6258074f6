//! Chunk planning for progressive processing.

use std::ops::Range;

/// Fewest chunks a non-trivial buffer is split into.
pub const MIN_CHUNKS: usize = 8;
/// Most chunks any buffer is split into.
pub const MAX_CHUNKS: usize = 50;
/// One extra chunk per this many samples above the minimum.
pub const SAMPLES_PER_EXTRA_CHUNK: usize = 300_000;

/// Number of chunks for a buffer of `sample_count` samples.
///
/// Buffers shorter than `MIN_CHUNKS` get one chunk per sample so that no
/// range is empty.
pub fn chunk_count(sample_count: usize) -> usize {
    if sample_count == 0 {
        return 0;
    }
    let n = (sample_count / SAMPLES_PER_EXTRA_CHUNK + MIN_CHUNKS).clamp(MIN_CHUNKS, MAX_CHUNKS);
    n.min(sample_count)
}

/// Split `[0, sample_count)` into contiguous half-open ranges.
///
/// All chunks have `sample_count / n` samples except the last, which
/// absorbs the remainder. A zero-length buffer yields no ranges.
pub fn plan_chunks(sample_count: usize) -> Vec<Range<usize>> {
    let n = chunk_count(sample_count);
    if n == 0 {
        return Vec::new();
    }
    let size = sample_count / n;
    (0..n)
        .map(|i| {
            let start = i * size;
            let end = if i + 1 == n { sample_count } else { start + size };
            start..end
        })
        .collect()
}
