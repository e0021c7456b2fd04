use std::time::Duration;

/// Configuration for the memory engine.
///
/// Every tunable the pipeline consults lives here so a process constructs
/// exactly one configured engine instance (no module-level state).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum chunk size in characters (~4 chars per token).
    pub max_chunk_size: usize,
    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,
    /// Text similarity above which a later chunk is dropped as a duplicate.
    pub dedup_threshold: f32,
    /// Maximum keywords extracted per chunk.
    pub max_keywords: usize,
    /// Weight for vector similarity in hybrid search.
    pub semantic_weight: f32,
    /// Weight for keyword overlap in hybrid search.
    pub keyword_weight: f32,
    /// Minimum cosine similarity for `find_similar_documents` hits.
    pub similarity_threshold: f32,
    /// Default result limit for queries.
    pub default_limit: usize,
    /// Token-set Jaccard above which an extracted pattern merges into an
    /// existing one instead of inserting a new record.
    pub pattern_merge_threshold: f32,
    /// Initial confidence assigned to newly observed patterns.
    pub default_pattern_confidence: f32,
    /// Texts per embedding request batch.
    pub embedding_batch_size: usize,
    /// Concurrent in-flight embedding requests.
    pub max_concurrent_requests: usize,
    /// Retry attempts per embedding batch before surfacing the failure.
    pub max_retries: u32,
    /// Base delay for exponential retry backoff.
    pub retry_base_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1200,
            chunk_overlap: 200,
            dedup_threshold: 0.9,
            max_keywords: 10,
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            similarity_threshold: 0.7,
            default_limit: 5,
            pattern_merge_threshold: 0.85,
            default_pattern_confidence: 0.5,
            embedding_batch_size: 32,
            max_concurrent_requests: 4,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(250),
        }
    }
}
