//! docmem - a learned-memory retrieval engine for document pipelines.
//!
//! docmem chunks document text, deduplicates it before the costly embedding
//! step, batches chunks to an external embedding provider with token and cost
//! accounting, and ranks stored chunks by cosine similarity with optional
//! keyword-overlap fusion. As documents are processed, it learns recurring
//! structural patterns per company scope with confidence tracking and
//! operator validation.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docmem::{EngineConfig, MemoryEngine, RedbMemoryStore, SearchScope, VoyageProvider};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> docmem::Result<()> {
//! let store = Arc::new(RedbMemoryStore::open(std::path::Path::new("memory.redb"))?);
//! let provider = Arc::new(VoyageProvider::from_env()?);
//! let engine = MemoryEngine::new(EngineConfig::default(), store, provider);
//!
//! let source = docmem::DocumentSource {
//!     document_id: "doc-42".into(),
//!     company_id: "acme".into(),
//!     document_type: "payslip".into(),
//!     employee_id: Some("emp-7".into()),
//!     text: "Net salary for March: 2,100.50 EUR ...".into(),
//!     processed_data: None,
//! };
//! let stored = engine
//!     .store_document_embeddings(source, &CancellationToken::new())
//!     .await?;
//! println!("{} chunks, ~${:.6}", stored.chunks_stored, stored.usage.estimated_cost);
//!
//! let hits = engine
//!     .find_similar_documents("salary slip March", &SearchScope::company("acme"), None, None)
//!     .await?;
//! for hit in &hits {
//!     println!("{} (score: {:.3})", hit.document_id, hit.similarity_score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod chunking;
pub mod config;
pub mod dedup;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod keywords;
pub mod learner;
pub mod search;
pub mod similarity;
pub mod store;
pub mod store_redb;
pub mod voyage;

pub use config::EngineConfig;
pub use embedding::{EmbeddingPipeline, EmbeddingProvider, TokenUsage};
pub use engine::{DocumentSource, HybridOptions, MemoryEngine, StoredDocument};
pub use error::{Error, Result};
pub use search::{MemoryContext, SimilarDocument};
pub use store::{MemoryPattern, MemoryStore, PatternStatus, SearchScope};
pub use store_redb::RedbMemoryStore;
pub use voyage::VoyageProvider;
