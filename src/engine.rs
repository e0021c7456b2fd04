//! The engine facade: one instance per process, with the store and the
//! embedding provider injected at construction.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    chunking::chunk_text,
    config::EngineConfig,
    dedup::deduplicate_chunks,
    embedding::{EmbeddingPipeline, EmbeddingProvider, TokenUsage},
    error::Result,
    keywords::extract_keywords,
    learner::extract_patterns,
    search::{MemoryContext, SimilarDocument, hybrid_rank, learned_keywords, select_similar},
    similarity::rank_candidates,
    store::{
        ChunkRecord, MemoryPattern, MemoryStore, PatternScope, PatternStatus, SearchScope,
    },
};

/// A document entering the store path.
#[derive(Debug, Clone)]
pub struct DocumentSource {
    pub document_id: String,
    pub company_id: String,
    pub document_type: String,
    pub employee_id: Option<String>,
    pub text: String,
    /// Structured extraction output, kept alongside every chunk so search
    /// hits can surface it.
    pub processed_data: Option<serde_json::Value>,
}

/// Outcome of [`MemoryEngine::store_document_embeddings`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub chunks_stored: usize,
    pub usage: TokenUsage,
}

/// Per-call overrides for [`MemoryEngine::hybrid_search`]. Unset fields fall
/// back to the engine configuration.
#[derive(Debug, Clone, Default)]
pub struct HybridOptions {
    pub semantic_weight: Option<f32>,
    pub keyword_weight: Option<f32>,
    pub limit: Option<usize>,
}

pub struct MemoryEngine {
    config: EngineConfig,
    store: Arc<dyn MemoryStore>,
    embedder: EmbeddingPipeline,
}

impl MemoryEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn MemoryStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let embedder = EmbeddingPipeline::new(provider, &config);
        Self {
            config,
            store,
            embedder,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Chunk, dedup, keyword-tag, embed and persist one document's text.
    ///
    /// Returns how many chunks were stored plus the token accounting for the
    /// embedding calls. Cancelling aborts in-flight embedding batches and
    /// surfaces the partial usage inside the returned error; nothing is
    /// persisted for a cancelled document.
    pub async fn store_document_embeddings(
        &self,
        source: DocumentSource,
        cancel: &CancellationToken,
    ) -> Result<StoredDocument> {
        let chunks = chunk_text(
            &source.text,
            self.config.max_chunk_size,
            self.config.chunk_overlap,
        );
        let chunks: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let keywords = extract_keywords(&chunk.text, self.config.max_keywords);
                chunk.with_keywords(keywords)
            })
            .collect();

        let deduped = deduplicate_chunks(chunks, self.config.dedup_threshold);
        debug!(
            document_id = %source.document_id,
            kept = deduped.chunks.len(),
            skipped = deduped.duplicates_skipped,
            "chunked document"
        );

        let batch = self
            .embedder
            .generate_embeddings(deduped.chunks, deduped.duplicates_skipped, cancel)
            .await?;

        let now = chrono::Utc::now();
        let records: Vec<ChunkRecord> = batch
            .results
            .into_iter()
            .map(|item| ChunkRecord {
                id: Uuid::new_v4(),
                document_id: source.document_id.clone(),
                company_id: source.company_id.clone(),
                document_type: source.document_type.clone(),
                employee_id: source.employee_id.clone(),
                chunk: item.chunk,
                embedding: item.embedding,
                processed_data: source.processed_data.clone(),
                created_at: now,
            })
            .collect();

        let chunks_stored = records.len();
        self.store.insert_chunks(records).await?;

        info!(
            document_id = %source.document_id,
            chunks_stored,
            tokens = batch.usage.total_tokens,
            "stored document embeddings"
        );
        Ok(StoredDocument {
            chunks_stored,
            usage: batch.usage,
        })
    }

    /// Semantic retrieval: embed the query once and rank scoped candidates
    /// by cosine similarity, keeping hits at or above the threshold.
    ///
    /// An empty store or nothing above the threshold is a normal empty
    /// result, not an error.
    pub async fn find_similar_documents(
        &self,
        query: &str,
        scope: &SearchScope,
        limit: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<SimilarDocument>> {
        let candidates = self.store.candidates_in_scope(scope).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.generate_query_embedding(query).await?;
        let ranked = rank_candidates(&query_embedding.embedding, candidates);
        Ok(select_similar(
            ranked,
            threshold.unwrap_or(self.config.similarity_threshold),
            limit.unwrap_or(self.config.default_limit),
        ))
    }

    /// Fused semantic + keyword retrieval over the scoped candidate set.
    pub async fn hybrid_search(
        &self,
        query: &str,
        scope: &SearchScope,
        options: HybridOptions,
    ) -> Result<Vec<SimilarDocument>> {
        let candidates = self.store.candidates_in_scope(scope).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.generate_query_embedding(query).await?;
        Ok(hybrid_rank(
            query,
            &query_embedding.embedding,
            candidates,
            options.semantic_weight.unwrap_or(self.config.semantic_weight),
            options.keyword_weight.unwrap_or(self.config.keyword_weight),
            options.limit.unwrap_or(self.config.default_limit),
        ))
    }

    /// Assemble the retrieval context for a new document: similar prior
    /// chunks plus the learned patterns in scope. Rejected patterns never
    /// appear here.
    pub async fn get_memory_context(
        &self,
        query: &str,
        scope: &SearchScope,
        limit: Option<usize>,
    ) -> Result<MemoryContext> {
        let similar_documents = self
            .find_similar_documents(query, scope, limit, None)
            .await?;

        let patterns = self.store.patterns_for_company(&scope.company_id).await?;
        let in_scope: Vec<MemoryPattern> = patterns
            .into_iter()
            .filter(|p| p.status != PatternStatus::Rejected)
            .filter(|p| {
                scope
                    .document_type
                    .as_ref()
                    .is_none_or(|t| &p.document_type_id == t)
            })
            .collect();

        let learned_keywords = learned_keywords(&in_scope);
        let (employee_patterns, company_patterns) = in_scope
            .into_iter()
            .partition(|p| p.employee_id.is_some() && p.employee_id == scope.employee_id);

        Ok(MemoryContext {
            similar_documents,
            company_patterns,
            employee_patterns,
            learned_keywords,
        })
    }

    /// Extract patterns from a processed document's structured output and
    /// merge them into memory. Malformed data skips this document only.
    pub async fn learn_from_document(
        &self,
        company_id: &str,
        document_type_id: &str,
        employee_id: Option<&str>,
        document_data: &serde_json::Value,
        confidence: Option<f32>,
    ) -> Result<Vec<MemoryPattern>> {
        let confidence = confidence.unwrap_or(self.config.default_pattern_confidence);
        let observations = extract_patterns(document_data, confidence)?;

        let scope = PatternScope {
            company_id: company_id.to_string(),
            document_type_id: document_type_id.to_string(),
            employee_id: employee_id.map(str::to_string),
        };

        let mut merged = Vec::with_capacity(observations.len());
        for observation in observations {
            let pattern = self
                .store
                .observe_pattern(&scope, observation, self.config.pattern_merge_threshold)
                .await?;
            merged.push(pattern);
        }

        info!(
            company_id,
            document_type_id,
            patterns = merged.len(),
            "learned from document"
        );
        Ok(merged)
    }

    /// Operator feedback on a learned pattern. The only path that moves a
    /// pattern between pending, validated and rejected.
    pub async fn validate_memory(
        &self,
        memory_id: Uuid,
        is_valid: bool,
        feedback: Option<String>,
    ) -> Result<MemoryPattern> {
        let status = if is_valid {
            PatternStatus::Validated
        } else {
            PatternStatus::Rejected
        };
        self.store.set_pattern_status(memory_id, status, feedback).await
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
