//! Chunking utilities for splitting extracted document text into overlapping
//! segments.
//!
//! Documents longer than the configured chunk size are split into windows
//! that each can be embedded separately. Consecutive windows overlap so that
//! content near a boundary stays retrievable from either side. Splits prefer
//! natural boundaries (paragraph break, sentence end, whitespace) over hard
//! character cuts.

use serde::{Deserialize, Serialize};

/// Approximate characters per token for English text.
pub const CHARS_PER_TOKEN: usize = 4;

/// Default chunk size in characters (roughly ~300 tokens).
pub const DEFAULT_CHUNK_SIZE: usize = 1200;

/// Default overlap between chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// How far back from the size limit to search for a natural break point,
/// as a fraction of the chunk size.
const BOUNDARY_LOOKBACK_DIVISOR: usize = 4;

/// Minimum look-back window in characters.
const MIN_BOUNDARY_LOOKBACK: usize = 80;

/// Typed per-chunk metadata carried through embedding and retrieval.
///
/// The key set is fixed; producers fill what they know and leave the rest at
/// defaults. `position`/`total` locate the chunk within one chunking pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source page number, when the extractor reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Section label, when the extractor reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Zero-based position within the chunking pass.
    pub position: usize,
    /// Total chunks produced by the pass.
    pub total: usize,
    /// Whether the chunk text looks tabular.
    pub has_table: bool,
    /// Whether the chunk text contains monetary amounts.
    pub has_amounts: bool,
    /// Index keywords extracted for lexical scoring.
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// A bounded slice of document text with a stable order index.
///
/// Immutable once created; the index is assigned in traversal order starting
/// at 0 and is used for citation and chunk↔embedding association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    pub index: usize,
    pub metadata: ChunkMetadata,
}

impl TextChunk {
    /// Copy of this chunk with extracted keywords attached.
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.metadata.keywords = keywords;
        self
    }
}

/// Split text into overlapping chunks with positional metadata.
///
/// Each chunk's character length is at most `max_chunk_size` except when a
/// single unbroken run forces an oversized hard cut. Consecutive chunks
/// overlap by `overlap` characters. Splitting prefers, in order: a paragraph
/// break, a sentence end, any whitespace — searched within a look-back window
/// near the limit — and falls back to a hard character cut.
///
/// Properly handles UTF-8 multi-byte characters.
///
/// # Examples
///
/// ```
/// use docmem::chunking::chunk_text;
///
/// // Empty input yields no chunks
/// assert!(chunk_text("", 400, 50).is_empty());
///
/// // Short text returns a single chunk with no overlap applied
/// let chunks = chunk_text("Hello, world!", 400, 50);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "Hello, world!");
///
/// // Long unbroken text gets hard-cut into overlapping windows
/// let chunks = chunk_text(&"A".repeat(1000), 400, 50);
/// assert_eq!(chunks.len(), 3);
/// ```
pub fn chunk_text(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let char_count = text.chars().count();
    if char_count <= max_chunk_size {
        return vec![TextChunk {
            text: text.to_string(),
            index: 0,
            metadata: base_metadata(text, 0, 1),
        }];
    }

    // Map char index -> byte index for O(1) slicing of multi-byte text.
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let max_chunk_size = max_chunk_size.max(1);
    let overlap = overlap.min(max_chunk_size.saturating_sub(1));
    let lookback = (max_chunk_size / BOUNDARY_LOOKBACK_DIVISOR).max(MIN_BOUNDARY_LOOKBACK);

    let mut chunks = Vec::new();
    let mut start_char = 0;
    let mut index = 0;

    while start_char < char_count {
        let limit_char = (start_char + max_chunk_size).min(char_count);

        let end_char = if limit_char < char_count {
            find_break_char(text, &char_to_byte, start_char, limit_char, lookback)
        } else {
            limit_char
        };

        let chunk_text = &text[char_to_byte[start_char]..char_to_byte[end_char]];
        if !chunk_text.trim().is_empty() {
            chunks.push(TextChunk {
                text: chunk_text.to_string(),
                index,
                metadata: base_metadata(chunk_text, index, 0),
            });
            index += 1;
        }

        if end_char >= char_count {
            break;
        }
        // The next chunk starts `overlap` characters before this one ended,
        // preserving cross-boundary context. Always make forward progress.
        start_char = end_char.saturating_sub(overlap).max(start_char + 1);
    }

    let total = chunks.len();
    for chunk in &mut chunks {
        chunk.metadata.total = total;
    }
    chunks
}

fn base_metadata(chunk_text: &str, position: usize, total: usize) -> ChunkMetadata {
    ChunkMetadata {
        position,
        total,
        has_table: looks_tabular(chunk_text),
        has_amounts: contains_amount(chunk_text),
        ..ChunkMetadata::default()
    }
}

/// Find a natural break point at or before `limit_char`, preferring paragraph
/// breaks, then sentence ends, then any whitespace, within the look-back
/// window. Returns `limit_char` when no boundary qualifies (hard cut).
fn find_break_char(
    text: &str,
    char_to_byte: &[usize],
    start_char: usize,
    limit_char: usize,
    lookback: usize,
) -> usize {
    let search_start_char = limit_char.saturating_sub(lookback).max(start_char + 1);
    let region_start = char_to_byte[search_start_char];
    let region = &text[region_start..char_to_byte[limit_char]];

    let break_byte = find_paragraph_break(region)
        .or_else(|| find_sentence_break(region))
        .or_else(|| find_whitespace_break(region));

    match break_byte {
        Some(offset) => byte_to_char(char_to_byte, region_start + offset),
        None => limit_char,
    }
}

/// Byte offset just past the last paragraph break in the region.
fn find_paragraph_break(region: &str) -> Option<usize> {
    region.rfind("\n\n").map(|i| i + 2)
}

/// Byte offset just past the last `.`/`!`/`?` that is followed by whitespace.
fn find_sentence_break(region: &str) -> Option<usize> {
    let mut best = None;
    let mut iter = region.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        if matches!(c, '.' | '!' | '?')
            && iter.peek().is_some_and(|(_, next)| next.is_whitespace())
        {
            best = Some(i + c.len_utf8());
        }
    }
    best
}

/// Byte offset just past the last whitespace character in the region.
fn find_whitespace_break(region: &str) -> Option<usize> {
    let i = region.rfind(|c: char| c.is_whitespace())?;
    let ws = region[i..].chars().next()?;
    Some(i + ws.len_utf8())
}

/// Convert a byte offset (always on a char boundary here) to a char index.
fn byte_to_char(char_to_byte: &[usize], byte: usize) -> usize {
    char_to_byte.partition_point(|&b| b < byte)
}

fn looks_tabular(text: &str) -> bool {
    text.lines().filter(|l| l.matches(['\t', '|']).count() >= 2).count() >= 2
}

fn contains_amount(text: &str) -> bool {
    if text.contains(['$', '€', '£']) {
        return true;
    }
    // digit (.|,) digit, e.g. "1.234,56" or "1000.00"
    let chars: Vec<char> = text.chars().collect();
    chars.windows(3).any(|w| {
        w[0].is_ascii_digit() && matches!(w[1], '.' | ',') && w[2].is_ascii_digit()
    })
}
