//! Query-side result types and score fusion.
//!
//! The engine embeds the query and fetches scoped candidates; everything in
//! this module is pure. Semantic ranking itself lives in [`crate::similarity`],
//! this module layers thresholding, hybrid fusion and context assembly on top.

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
    chunking::TextChunk,
    keywords::keyword_score,
    similarity::{RankedChunk, cosine_similarity},
    store::{ChunkRecord, MemoryPattern, PatternStatus},
};

/// A scored retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarDocument {
    pub id: Uuid,
    pub document_id: String,
    pub chunk: TextChunk,
    pub similarity_score: f32,
    pub processed_data: Option<serde_json::Value>,
    pub document_type: String,
    pub employee_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl SimilarDocument {
    fn from_record(record: ChunkRecord, score: f32) -> Self {
        Self {
            id: record.id,
            document_id: record.document_id,
            chunk: record.chunk,
            similarity_score: score,
            processed_data: record.processed_data,
            document_type: record.document_type,
            employee_id: record.employee_id,
            created_at: record.created_at,
        }
    }
}

/// Everything a caller needs to prime downstream processing of a new
/// document: prior similar chunks plus the learned patterns in scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    pub similar_documents: Vec<SimilarDocument>,
    pub company_patterns: Vec<MemoryPattern>,
    pub employee_patterns: Vec<MemoryPattern>,
    pub learned_keywords: Vec<String>,
}

/// Keep ranked candidates at or above `threshold`, truncated to `limit`.
///
/// An empty result is the normal outcome when nothing clears the bar.
pub fn select_similar(
    ranked: Vec<RankedChunk>,
    threshold: f32,
    limit: usize,
) -> Vec<SimilarDocument> {
    ranked
        .into_iter()
        .take_while(|r| r.score >= threshold)
        .take(limit)
        .map(|r| SimilarDocument::from_record(r.record, r.score))
        .collect()
}

/// Fuse a semantic and a keyword signal per candidate and rank descending.
///
/// Weights are normalized to sum to 1 when they do not already. A candidate
/// missing one signal still scores on the other: keyword-less chunks get a
/// keyword score of 0, and a candidate whose vector cannot be compared
/// against the query contributes a semantic score of 0 instead of dropping
/// out entirely.
pub fn hybrid_rank(
    query: &str,
    query_embedding: &[f32],
    candidates: Vec<ChunkRecord>,
    semantic_weight: f32,
    keyword_weight: f32,
    limit: usize,
) -> Vec<SimilarDocument> {
    let (semantic_weight, keyword_weight) = normalize_weights(semantic_weight, keyword_weight);

    let mut scored: Vec<SimilarDocument> = candidates
        .into_iter()
        .map(|record| {
            let semantic = match cosine_similarity(query_embedding, &record.embedding) {
                Ok(score) => score.max(0.0),
                Err(error) => {
                    warn!(chunk_id = %record.id, %error, "skipping semantic signal");
                    0.0
                }
            };
            let keyword = keyword_score(query, &record.chunk.metadata.keywords);
            let fused = semantic_weight * semantic + keyword_weight * keyword;
            SimilarDocument::from_record(record, fused)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    scored.truncate(limit);
    scored
}

fn normalize_weights(semantic: f32, keyword: f32) -> (f32, f32) {
    let sum = semantic + keyword;
    if sum <= 0.0 {
        // Degenerate configuration, fall back to pure semantic ranking.
        return (1.0, 0.0);
    }
    (semantic / sum, keyword / sum)
}

/// Distinct concept tokens from non-rejected patterns, strongest first.
pub fn learned_keywords(patterns: &[MemoryPattern]) -> Vec<String> {
    let mut active: Vec<&MemoryPattern> = patterns
        .iter()
        .filter(|p| p.status != PatternStatus::Rejected)
        .collect();
    active.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keywords = Vec::new();
    for pattern in active {
        let Some(concept) = pattern.pattern.strip_prefix("concept:") else {
            continue;
        };
        for token in concept.split_whitespace() {
            if !keywords.iter().any(|k| k == token) {
                keywords.push(token.to_string());
            }
        }
    }
    keywords
}
