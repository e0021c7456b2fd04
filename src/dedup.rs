//! Near-duplicate removal for chunks, run before the costly embedding step.
//!
//! Works on normalized text only (embeddings do not exist yet at this stage):
//! exact duplicates are caught by a SHA-256 hash of the normalized text, near
//! duplicates by Jaccard similarity over word 3-shingles. First occurrence
//! wins; order is preserved; the pass is idempotent.

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::chunking::TextChunk;

/// Default similarity threshold above which a chunk counts as a duplicate.
pub const DEFAULT_DEDUP_THRESHOLD: f32 = 0.9;

/// Shingle width in words for near-duplicate comparison.
const SHINGLE_SIZE: usize = 3;

/// Result of a deduplication pass.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    /// Surviving chunks, original order and indexes intact.
    pub chunks: Vec<TextChunk>,
    /// Exactly how many chunks were removed.
    pub duplicates_skipped: usize,
}

/// Remove exact and near-duplicate chunks, keeping the first occurrence.
///
/// `similarity_threshold` applies to the shingle-Jaccard comparison; exact
/// (hash-equal) duplicates are always removed regardless of the threshold.
///
/// # Examples
///
/// ```
/// use docmem::{chunking::chunk_text, dedup::deduplicate_chunks};
///
/// let mut chunks = chunk_text("some content", 400, 0);
/// chunks.extend(chunk_text("Some   CONTENT", 400, 0));
/// let outcome = deduplicate_chunks(chunks, 0.9);
/// assert_eq!(outcome.chunks.len(), 1);
/// assert_eq!(outcome.duplicates_skipped, 1);
/// ```
pub fn deduplicate_chunks(chunks: Vec<TextChunk>, similarity_threshold: f32) -> DedupOutcome {
    let mut seen_hashes: HashSet<[u8; 32]> = HashSet::new();
    let mut kept_shingles: Vec<HashSet<u64>> = Vec::new();
    let mut kept = Vec::new();
    let mut duplicates_skipped = 0;

    for chunk in chunks {
        let normalized = normalize(&chunk.text);
        let hash = content_hash(&normalized);

        if !seen_hashes.insert(hash) {
            debug!(index = chunk.index, "dropping exact duplicate chunk");
            duplicates_skipped += 1;
            continue;
        }

        let shingles = word_shingles(&normalized);
        let near_duplicate = kept_shingles
            .iter()
            .any(|prior| jaccard(&shingles, prior) >= similarity_threshold);

        if near_duplicate {
            debug!(index = chunk.index, "dropping near-duplicate chunk");
            duplicates_skipped += 1;
            continue;
        }

        kept_shingles.push(shingles);
        kept.push(chunk);
    }

    DedupOutcome {
        chunks: kept,
        duplicates_skipped,
    }
}

/// Whitespace-collapsed, case-folded text used for all dedup comparison.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn content_hash(normalized: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.finalize().into()
}

/// Hashes of consecutive word windows. Texts shorter than the shingle size
/// fall back to one shingle covering the whole text.
fn word_shingles(normalized: &str) -> HashSet<u64> {
    use std::hash::{DefaultHasher, Hash, Hasher};

    let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    let mut shingles = HashSet::new();

    let hash_window = |window: &[&str]| {
        let mut hasher = DefaultHasher::new();
        window.hash(&mut hasher);
        hasher.finish()
    };

    if words.len() < SHINGLE_SIZE {
        if !words.is_empty() {
            shingles.insert(hash_window(&words));
        }
        return shingles;
    }

    for window in words.windows(SHINGLE_SIZE) {
        shingles.insert(hash_window(window));
    }
    shingles
}

fn jaccard(a: &HashSet<u64>, b: &HashSet<u64>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkMetadata;

    fn chunk(text: &str, index: usize) -> TextChunk {
        TextChunk {
            text: text.to_string(),
            index,
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn distinct_chunks_all_survive() {
        let chunks = vec![
            chunk("salary slip for march two thousand", 0),
            chunk("pension contribution statement yearly overview", 1),
            chunk("invoice for consulting services rendered", 2),
        ];
        let outcome = deduplicate_chunks(chunks.clone(), 0.9);
        assert_eq!(outcome.chunks, chunks);
        assert_eq!(outcome.duplicates_skipped, 0);
    }

    #[test]
    fn exact_duplicate_removed_first_wins() {
        let chunks = vec![
            chunk("identical content", 0),
            chunk("identical content", 1),
        ];
        let outcome = deduplicate_chunks(chunks, 0.9);
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.chunks[0].index, 0);
        assert_eq!(outcome.duplicates_skipped, 1);
    }

    #[test]
    fn normalization_catches_case_and_whitespace_variants() {
        let chunks = vec![
            chunk("Total   Gross  Salary", 0),
            chunk("total gross salary", 1),
        ];
        let outcome = deduplicate_chunks(chunks, 0.9);
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.duplicates_skipped, 1);
    }

    #[test]
    fn near_duplicate_above_threshold_removed() {
        let base = "employee name jane doe gross salary three thousand euro net \
                    salary two thousand one hundred euro period march";
        let near = format!("{base} extra");
        let chunks = vec![chunk(base, 0), chunk(&near, 1)];

        let outcome = deduplicate_chunks(chunks, 0.8);
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.duplicates_skipped, 1);
    }

    #[test]
    fn near_duplicate_below_threshold_survives() {
        let chunks = vec![
            chunk("employee jane doe gross salary three thousand", 0),
            chunk("employee john smith pension fund statement overview", 1),
        ];
        let outcome = deduplicate_chunks(chunks, 0.8);
        assert_eq!(outcome.chunks.len(), 2);
        assert_eq!(outcome.duplicates_skipped, 0);
    }

    #[test]
    fn order_is_preserved() {
        let chunks = vec![
            chunk("first distinct block of words here", 0),
            chunk("second distinct block of words here also", 1),
            chunk("first distinct block of words here", 2),
            chunk("third completely different textual material", 3),
        ];
        let outcome = deduplicate_chunks(chunks, 0.95);
        let indexes: Vec<usize> = outcome.chunks.iter().map(|c| c.index).collect();
        assert_eq!(indexes, vec![0, 1, 3]);
    }

    #[test]
    fn idempotent() {
        let chunks = vec![
            chunk("alpha beta gamma delta epsilon", 0),
            chunk("alpha beta gamma delta epsilon", 1),
            chunk("zeta eta theta iota kappa", 2),
        ];
        let once = deduplicate_chunks(chunks, 0.9);
        let twice = deduplicate_chunks(once.chunks.clone(), 0.9);
        assert_eq!(once.chunks, twice.chunks);
        assert_eq!(twice.duplicates_skipped, 0);
    }

    #[test]
    fn empty_input() {
        let outcome = deduplicate_chunks(Vec::new(), 0.9);
        assert!(outcome.chunks.is_empty());
        assert_eq!(outcome.duplicates_skipped, 0);
    }
}
