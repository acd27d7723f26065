//! Overlapping sliding-window chunker.
//!
//! Splits document text into windows of at most `chunk_size` bytes that
//! step forward by `chunk_size - overlap`, so consecutive chunks share a
//! fixed overlap window and context survives chunk boundaries. Split
//! points back off to UTF-8 character boundaries, which may make a window
//! slightly shorter than `chunk_size`; a window exceeds `chunk_size` only
//! when a single character is wider than the whole window.
//!
//! Guarantees:
//! - chunks cover the document text exactly (no gaps);
//! - every chunk is non-empty and the loop always terminates;
//! - offsets are monotonically increasing and bounded by the text length;
//! - text shorter than one window yields exactly one chunk spanning it.

use crate::models::Chunk;

/// Split text into overlapping chunks. Pure; deterministic for a given
/// (text, chunk_size, overlap). `overlap` must be < `chunk_size` — config
/// validation enforces this before any chunking happens.
pub fn chunk_text(document: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    debug_assert!(overlap < chunk_size);
    let len = text.len();
    let step = chunk_size - overlap;

    if len <= chunk_size {
        return vec![Chunk {
            document: document.to_string(),
            index: 0,
            start: 0,
            end: len,
            text: text.to_string(),
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    loop {
        let end = if start + chunk_size >= len {
            len
        } else {
            let floored = floor_char_boundary(text, start + chunk_size);
            if floored > start {
                floored
            } else {
                // The window is narrower than the character at `start`;
                // take that one character whole so the chunk is non-empty
                // and the loop advances.
                ceil_char_boundary(text, start + 1)
            }
        };

        chunks.push(Chunk {
            document: document.to_string(),
            index,
            start,
            end,
            text: text[start..end].to_string(),
        });
        index += 1;

        if end == len {
            break;
        }

        let mut next = floor_char_boundary(text, start + step);
        if next <= start {
            // Step landed inside the character at `start`; resume at the
            // current chunk's end to keep progress.
            next = end;
        }
        start = next;
    }

    chunks
}

/// Largest byte offset <= `at` that lies on a char boundary.
fn floor_char_boundary(text: &str, at: usize) -> usize {
    let mut i = at.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest byte offset >= `at` that lies on a char boundary.
fn ceil_char_boundary(text: &str, at: usize) -> usize {
    let mut i = at.min(text.len());
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}
