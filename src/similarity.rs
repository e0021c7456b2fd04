//! Cosine similarity and parallel candidate ranking.

use rayon::prelude::*;
use tracing::warn;

use crate::{
    error::{Error, Result},
    store::ChunkRecord,
};

/// Cosine similarity between two vectors: `dot(a, b) / (‖a‖ · ‖b‖)`.
///
/// Fails with [`Error::DimensionMismatch`] when the lengths disagree —
/// vectors are never silently truncated or padded. Returns 0.0 (not NaN)
/// when either vector has zero magnitude.
///
/// # Examples
///
/// ```
/// use docmem::similarity::cosine_similarity;
///
/// let v = vec![1.0, 2.0, 3.0];
/// assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-6);
/// assert_eq!(cosine_similarity(&v, &[0.0, 0.0, 0.0]).unwrap(), 0.0);
/// assert!(cosine_similarity(&v, &[1.0, 2.0]).is_err());
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// A candidate chunk with its cosine score against the query.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub record: ChunkRecord,
    pub score: f32,
}

/// Score candidates against the query vector and sort them best-first.
///
/// Scoring is pure and CPU-bound, so candidates are processed in parallel.
/// A candidate whose stored vector has the wrong dimensionality is logged
/// and excluded from the ranking; it never aborts the whole query. Ties are
/// broken by more recent creation time.
pub fn rank_candidates(query: &[f32], candidates: Vec<ChunkRecord>) -> Vec<RankedChunk> {
    let mut ranked: Vec<RankedChunk> = candidates
        .into_par_iter()
        .filter_map(|record| match cosine_similarity(query, &record.embedding) {
            Ok(score) => Some(RankedChunk { record, score }),
            Err(e) => {
                warn!(
                    id = %record.id,
                    error = %e,
                    "excluding candidate with mismatched embedding"
                );
                None
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.record.created_at.cmp(&a.record.created_at))
    });

    ranked
}
