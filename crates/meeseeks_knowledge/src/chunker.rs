//! Page chunking: split crawled page text into bounded, overlapping chunks.
//!
//! Three-tier greedy pack: paragraphs are joined while they fit, an
//! oversized paragraph falls back to sentence packing, and an oversized
//! sentence falls back to fixed windows with overlap so matches near a
//! window boundary stay recoverable. Content order is preserved and
//! nothing is discarded beyond whitespace normalization.

use tracing::trace;

/// Default maximum chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default overlap in characters between fixed windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

// ---------------------------------------------------------------------------
// Splitting helpers
// ---------------------------------------------------------------------------

/// Split text into paragraphs on blank-line boundaries.
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !lines.is_empty() {
                paragraphs.push(lines.join("\n"));
                lines.clear();
            }
        } else {
            lines.push(line.trim_end());
        }
    }
    if !lines.is_empty() {
        paragraphs.push(lines.join("\n"));
    }
    paragraphs
}

/// Split a paragraph into sentences after `.`, `!` or `?`, falling back to
/// end-of-string for the unterminated tail.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Split an oversized sentence into fixed windows of `max_size` chars with
/// `overlap` chars shared between consecutive windows. All windows except
/// the last are pushed to `chunks`; the last is returned so it can seed
/// the next chunk.
fn split_windows(sentence: &str, max_size: usize, overlap: usize, chunks: &mut Vec<String>) -> String {
    let step = max_size.saturating_sub(overlap).max(1);
    let chars: Vec<char> = sentence.chars().collect();
    let mut start = 0;
    loop {
        let end = (start + max_size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        if end == chars.len() {
            return window;
        }
        chunks.push(window);
        start += step;
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

/// Pack the sentences of an oversized paragraph, spilling into `chunks`.
/// Leaves the trailing partial chunk in `current`.
fn pack_sentences(paragraph: &str, max_size: usize, overlap: usize, chunks: &mut Vec<String>, current: &mut String) {
    for sentence in split_sentences(paragraph) {
        let sentence_len = char_len(sentence);
        if sentence_len > max_size {
            if !current.is_empty() {
                chunks.push(std::mem::take(current));
            }
            *current = split_windows(sentence, max_size, overlap, chunks);
        } else if current.is_empty() {
            *current = sentence.to_string();
        } else if char_len(current) + 1 + sentence_len <= max_size {
            current.push(' ');
            current.push_str(sentence);
        } else {
            chunks.push(std::mem::take(current));
            *current = sentence.to_string();
        }
    }
}

/// Split page text into ordered chunks of at most `max_size` characters.
///
/// An empty page yields an empty list. Every chunk is non-empty.
pub fn chunk_text(text: &str, max_size: usize, overlap: usize) -> Vec<String> {
    let max_size = max_size.max(1);
    let overlap = overlap.min(max_size.saturating_sub(1));

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in split_paragraphs(text) {
        let paragraph_len = char_len(&paragraph);
        if paragraph_len > max_size {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            pack_sentences(&paragraph, max_size, overlap, &mut chunks, &mut current);
        } else if current.is_empty() {
            current = paragraph;
        } else if char_len(&current) + 2 + paragraph_len <= max_size {
            current.push_str("\n\n");
            current.push_str(&paragraph);
        } else {
            chunks.push(std::mem::take(&mut current));
            current = paragraph;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    trace!(chunks = chunks.len(), "page chunked");
    chunks
}

/// Locate each chunk inside the original page body, returning byte offset
/// pairs `[start, end)`.
///
/// Chunks are searched forward from a running cursor (backed up by the
/// window overlap so overlapping windows are still found). When joining or
/// trimming made a chunk unfindable, the offsets fall back to the cursor
/// position; they are a display aid, not a precise slice.
pub fn locate_chunks(body: &str, chunks: &[String], overlap: usize) -> Vec<(usize, usize)> {
    let mut offsets = Vec::with_capacity(chunks.len());
    let mut cursor = 0usize;

    for chunk in chunks {
        let mut search_from = cursor.saturating_sub(overlap);
        while search_from > 0 && !body.is_char_boundary(search_from) {
            search_from -= 1;
        }

        let found = if search_from < body.len() {
            body[search_from..].find(chunk.as_str()).map(|i| i + search_from)
        } else {
            None
        };

        match found {
            Some(start) => {
                let end = start + chunk.len();
                offsets.push((start, end));
                cursor = end;
            }
            None => {
                let end = cursor + chunk.len();
                offsets.push((cursor, end));
                cursor = end;
            }
        }
    }

    offsets
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
