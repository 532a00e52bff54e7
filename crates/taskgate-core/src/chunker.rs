use taskgate_common::Chunk;

/// Fraction of the chunk size searched backwards for a natural break.
const LOOKBACK_DIVISOR: usize = 10;

/// Sentence enders checked when no paragraph break is in range.
const SENTENCE_BREAKS: &[&str] = &[". ", ".\n", "! ", "!\n", "? ", "?\n"];

/// Split `text` into ordered chunks of at most `max_chunk_size` bytes
/// (plus the engineered overlap), preferring paragraph breaks, then
/// sentence breaks, then whitespace within a bounded lookback window, and
/// hard-cutting only when none exists.
///
/// Chunk `k+1` starts with up to `overlap` bytes copied from the tail of
/// chunk `k`, recorded in `overlap_with_previous`, so concatenating
/// [`Chunk::owned_text`] across all chunks reproduces `text` exactly.
///
/// Empty input yields zero chunks. A single character wider than
/// `max_chunk_size` is emitted whole rather than split mid-codepoint.
pub fn split(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }
    let max = max_chunk_size.max(1);

    if text.len() <= max {
        return vec![Chunk {
            index: 0,
            text: text.to_string(),
            overlap_with_previous: 0,
        }];
    }

    let boundaries = compute_boundaries(text, max);

    let mut chunks = Vec::with_capacity(boundaries.len());
    let mut prev = 0usize;
    for (index, &end) in boundaries.iter().enumerate() {
        let overlap_start = if index == 0 {
            0
        } else {
            ceil_char_boundary(text, prev.saturating_sub(overlap))
        };
        chunks.push(Chunk {
            index,
            text: text[overlap_start..end].to_string(),
            overlap_with_previous: prev - overlap_start,
        });
        prev = end;
    }

    tracing::debug!(
        chunks = chunks.len(),
        total_bytes = text.len(),
        max_chunk_size = max,
        "split document"
    );
    chunks
}

/// Exclusive end offsets of each chunk's owned region, in order. The last
/// boundary is always `text.len()`.
fn compute_boundaries(text: &str, max: usize) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let mut start = 0usize;

    while text.len() - start > max {
        let mut end = start + max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }

        let lookback = (max / LOOKBACK_DIVISOR).max(1);
        let window_start = ceil_char_boundary(text, end.saturating_sub(lookback).max(start + 1));

        let mut boundary = find_break(&text[window_start..end])
            .map(|offset| window_start + offset)
            .unwrap_or(end);

        if boundary <= start {
            // A single codepoint wider than max; emit it whole.
            boundary = ceil_char_boundary(text, start + 1);
        }

        boundaries.push(boundary);
        start = boundary;
    }

    boundaries.push(text.len());
    boundaries
}

/// Offset just past the best natural break in `window`, or `None` for a
/// hard cut. Paragraph breaks win over sentence enders, which win over
/// plain whitespace.
fn find_break(window: &str) -> Option<usize> {
    if let Some(pos) = window.rfind("\n\n") {
        return Some(pos + 2);
    }

    if let Some(pos) = SENTENCE_BREAKS
        .iter()
        .filter_map(|pattern| window.rfind(pattern))
        .max()
    {
        return Some(pos + 2);
    }

    window
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(pos, c)| pos + c.len_utf8())
}

/// Smallest char boundary at or above `at`.
fn ceil_char_boundary(text: &str, at: usize) -> usize {
    let mut at = at.min(text.len());
    while !text.is_char_boundary(at) {
        at += 1;
    }
    at
}
