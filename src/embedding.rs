//! Embedding orchestration: token/cost accounting and batched provider calls.
//!
//! Token counts are estimated locally with a deterministic heuristic before
//! any provider call, so cost is reportable even when a call fails or is
//! cancelled. Batches run concurrently under a semaphore bound and results
//! are reassembled by chunk index, never by re-matching text.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    chunking::TextChunk,
    config::EngineConfig,
    error::{Error, Result},
};

/// Published embedding price in USD per token (voyage-2: $0.12 / 1M tokens).
pub const COST_PER_TOKEN: f64 = 0.12 / 1_000_000.0;

/// Estimate the provider token count for a text.
///
/// Deterministic heuristic: one token per 4 characters, rounded up. This is
/// the only token estimate the engine uses, so accounting is reproducible.
///
/// # Examples
///
/// ```
/// use docmem::embedding::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("abcd"), 1);
/// assert_eq!(estimate_tokens("abcde"), 2);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Cost in USD for a token count, at the fixed published rate.
pub fn embedding_cost(tokens: usize) -> f64 {
    tokens as f64 * COST_PER_TOKEN
}

/// Whether a text is embedded as stored content or as a retrieval query.
///
/// The provider optimizes the two differently but they share one vector
/// space, so query vectors are comparable against document vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingIntent {
    Document,
    Query,
}

impl EmbeddingIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            EmbeddingIntent::Document => "document",
            EmbeddingIntent::Query => "query",
        }
    }
}

/// Accounting for provider tokens consumed and their derived cost.
///
/// Invariant: `chunks_processed == duplicates_skipped + embedded chunk count`
/// and `estimated_cost == total_tokens * COST_PER_TOKEN`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total_tokens: usize,
    pub estimated_cost: f64,
    pub chunks_processed: usize,
    pub duplicates_skipped: usize,
}

impl TokenUsage {
    /// Add estimated tokens, keeping the derived cost consistent.
    pub fn record_tokens(&mut self, tokens: usize) {
        self.total_tokens += tokens;
        self.estimated_cost = embedding_cost(self.total_tokens);
    }
}

/// A single embedded text with its accounting.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embedding: Vec<f32>,
    pub text: String,
    pub usage: TokenUsage,
}

/// A chunk paired with its embedding, association kept by index.
#[derive(Debug, Clone)]
pub struct ChunkEmbedding {
    pub chunk: TextChunk,
    pub embedding: Vec<f32>,
}

/// Output of a batch embedding run.
#[derive(Debug, Clone)]
pub struct BatchEmbeddings {
    /// One entry per surviving input chunk, in input order.
    pub results: Vec<ChunkEmbedding>,
    pub usage: TokenUsage,
}

/// An embedding backend. One fixed model and output dimensionality for the
/// lifetime of the deployment.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts. Must return exactly one vector per input, in
    /// input order, or fail the whole batch.
    async fn embed(&self, texts: &[String], intent: EmbeddingIntent) -> Result<Vec<Vec<f32>>>;

    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;
}

/// Batched embedding front-end over an injected provider.
///
/// Splits chunk text into provider batches, runs them concurrently up to the
/// configured bound, retries transient failures with capped exponential
/// backoff, and reassembles output in input order.
pub struct EmbeddingPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    semaphore: Arc<Semaphore>,
    batch_size: usize,
    max_retries: u32,
    retry_base_delay: std::time::Duration,
}

impl EmbeddingPipeline {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EngineConfig) -> Self {
        Self {
            provider,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            batch_size: config.embedding_batch_size.max(1),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embed a single document text.
    pub async fn generate_embedding(&self, text: &str) -> Result<EmbeddingResult> {
        self.embed_single(text, EmbeddingIntent::Document).await
    }

    /// Embed a query string. Shares the document vector space.
    pub async fn generate_query_embedding(&self, text: &str) -> Result<EmbeddingResult> {
        self.embed_single(text, EmbeddingIntent::Query).await
    }

    async fn embed_single(&self, text: &str, intent: EmbeddingIntent) -> Result<EmbeddingResult> {
        let mut usage = TokenUsage::default();
        usage.record_tokens(estimate_tokens(text));
        usage.chunks_processed = 1;

        let texts = vec![text.to_string()];
        let mut vectors = self
            .call_with_retry(&texts, intent, &CancellationToken::new())
            .await
            .map_err(|message| Error::Provider {
                message,
                usage: usage.clone(),
            })?;

        let embedding = vectors.pop().ok_or_else(|| Error::Provider {
            message: "provider returned an empty batch".to_string(),
            usage: usage.clone(),
        })?;
        self.check_dimensions(&embedding)?;

        Ok(EmbeddingResult {
            embedding,
            text: text.to_string(),
            usage,
        })
    }

    /// Embed already-deduplicated chunks in concurrent batches.
    ///
    /// `duplicates_skipped` is the count removed by the preceding dedup pass
    /// and is folded into the returned usage so that
    /// `chunks_processed == duplicates_skipped + results.len()`.
    ///
    /// On provider failure or cancellation the returned `Error::Provider`
    /// carries the usage accrued by every batch that was attempted.
    pub async fn generate_embeddings(
        &self,
        chunks: Vec<TextChunk>,
        duplicates_skipped: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchEmbeddings> {
        if chunks.is_empty() {
            return Ok(BatchEmbeddings {
                results: Vec::new(),
                usage: TokenUsage {
                    duplicates_skipped,
                    chunks_processed: duplicates_skipped,
                    ..TokenUsage::default()
                },
            });
        }

        let batches: Vec<&[TextChunk]> = chunks.chunks(self.batch_size).collect();
        debug!(
            chunks = chunks.len(),
            batches = batches.len(),
            model = self.provider.model_name(),
            "generating embeddings"
        );

        let futures = batches.iter().map(|batch| {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let tokens: usize = texts.iter().map(|t| estimate_tokens(t)).sum();
            async move {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|e| (0, e.to_string()))?;
                if cancel.is_cancelled() {
                    // Batch never attempted; its tokens are not accrued.
                    return Err((0, "embedding run cancelled".to_string()));
                }
                // Tokens count as consumed once the batch is attempted.
                match self
                    .call_with_retry(&texts, EmbeddingIntent::Document, cancel)
                    .await
                {
                    Ok(vectors) if vectors.len() == texts.len() => Ok((tokens, vectors)),
                    Ok(vectors) => Err((
                        tokens,
                        format!(
                            "provider returned {} vectors for {} inputs",
                            vectors.len(),
                            texts.len()
                        ),
                    )),
                    Err(message) => Err((tokens, message)),
                }
            }
        });

        let outcomes = join_all(futures).await;

        let mut usage = TokenUsage {
            duplicates_skipped,
            chunks_processed: duplicates_skipped,
            ..TokenUsage::default()
        };
        let mut embedded: Vec<Vec<Vec<f32>>> = Vec::with_capacity(outcomes.len());
        let mut failure: Option<String> = None;

        for outcome in outcomes {
            match outcome {
                Ok((tokens, vectors)) => {
                    usage.record_tokens(tokens);
                    embedded.push(vectors);
                }
                Err((tokens, message)) => {
                    usage.record_tokens(tokens);
                    if failure.is_none() {
                        failure = Some(message);
                    }
                }
            }
        }

        if let Some(message) = failure {
            // Count only the chunks whose batches completed.
            usage.chunks_processed += embedded.iter().map(Vec::len).sum::<usize>();
            return Err(Error::Provider { message, usage });
        }

        // Reassemble by position: batch order matches chunk order, so the
        // flattened vectors line up with the input chunks one-to-one.
        let mut results = Vec::with_capacity(chunks.len());
        let mut vectors = embedded.into_iter().flatten();
        for chunk in chunks {
            let embedding = vectors.next().ok_or_else(|| Error::Provider {
                message: "provider returned fewer vectors than chunks".to_string(),
                usage: usage.clone(),
            })?;
            self.check_dimensions(&embedding)?;
            results.push(ChunkEmbedding { chunk, embedding });
        }

        usage.chunks_processed += results.len();
        Ok(BatchEmbeddings { results, usage })
    }

    /// Call the provider, retrying with exponential backoff. Returns the
    /// failure message (not an `Error`) so callers can attach usage.
    async fn call_with_retry(
        &self,
        texts: &[String],
        intent: EmbeddingIntent,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<Vec<f32>>, String> {
        let mut attempt = 0;
        loop {
            let call = self.provider.embed(texts, intent);
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err("embedding run cancelled".to_string());
                }
                result = call => result,
            };

            match result {
                Ok(vectors) => return Ok(vectors),
                Err(Error::Config(message)) => {
                    // Missing credentials never resolve by retrying.
                    return Err(message);
                }
                Err(e) if attempt < self.max_retries => {
                    let delay = self.retry_base_delay * 2u32.pow(attempt);
                    warn!(attempt, error = %e, ?delay, "embedding call failed, retrying");
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err("embedding run cancelled".to_string());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e.to_string()),
            }
        }
    }

    fn check_dimensions(&self, embedding: &[f32]) -> Result<()> {
        let expected = self.provider.dimensions();
        if embedding.len() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
        Ok(())
    }
}
