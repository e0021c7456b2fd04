//! End-to-end engine tests against a real redb store and a deterministic
//! in-process embedding provider.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use serde_json::json;
use tokio_util::sync::CancellationToken;

use docmem::{
    DocumentSource, EngineConfig, Error, HybridOptions, MemoryEngine, PatternStatus,
    RedbMemoryStore, SearchScope,
    embedding::{EmbeddingIntent, EmbeddingProvider, estimate_tokens},
};

/// Bag-of-vocabulary embedder: each text maps to a normalized count vector
/// over a tiny fixed vocabulary, so related texts score high cosine
/// similarity and unrelated ones score zero.
struct VocabEmbedder {
    calls: AtomicU32,
}

const VOCAB: [&str; 4] = ["salary", "invoice", "pension", "march"];

impl VocabEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }

    fn embed_text(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = VOCAB
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .collect();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for VocabEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        _intent: EmbeddingIntent,
    ) -> docmem::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::embed_text(t)).collect())
    }

    fn model_name(&self) -> &str {
        "vocab-test"
    }

    fn dimensions(&self) -> usize {
        VOCAB.len()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_engine() -> (tempfile::TempDir, Arc<VocabEmbedder>, MemoryEngine) {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(RedbMemoryStore::open(&tmp.path().join("memory.redb")).unwrap());
    let provider = Arc::new(VocabEmbedder::new());
    let engine = MemoryEngine::new(
        EngineConfig::default(),
        store,
        Arc::clone(&provider) as Arc<dyn EmbeddingProvider>,
    );
    (tmp, provider, engine)
}

fn source(document_id: &str, company_id: &str, text: &str) -> DocumentSource {
    DocumentSource {
        document_id: document_id.into(),
        company_id: company_id.into(),
        document_type: "payslip".into(),
        employee_id: None,
        text: text.into(),
        processed_data: None,
    }
}

#[tokio::test]
async fn store_then_find_roundtrip() {
    let (_tmp, _provider, engine) = test_engine();

    let text = "Salary payment for March, net amount transferred.";
    let stored = engine
        .store_document_embeddings(source("doc-1", "acme", text), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stored.chunks_stored, 1);
    assert_eq!(stored.usage.chunks_processed, 1);
    assert_eq!(stored.usage.total_tokens, estimate_tokens(text));
    assert!(stored.usage.estimated_cost > 0.0);

    let hits = engine
        .find_similar_documents("salary march", &SearchScope::company("acme"), None, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, "doc-1");
    assert!(hits[0].similarity_score > 0.9);
}

#[tokio::test]
async fn threshold_keeps_only_close_matches() {
    let (_tmp, _provider, engine) = test_engine();
    let cancel = CancellationToken::new();

    engine
        .store_document_embeddings(
            source("doc-close", "acme", "salary march salary march"),
            &cancel,
        )
        .await
        .unwrap();
    engine
        .store_document_embeddings(
            source("doc-far", "acme", "invoice due, pension note, salary"),
            &cancel,
        )
        .await
        .unwrap();

    let hits = engine
        .find_similar_documents(
            "salary slip march",
            &SearchScope::company("acme"),
            None,
            Some(0.8),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, "doc-close");
}

#[tokio::test]
async fn company_scope_is_isolated() {
    let (_tmp, _provider, engine) = test_engine();
    let cancel = CancellationToken::new();

    engine
        .store_document_embeddings(source("doc-a", "acme", "salary march"), &cancel)
        .await
        .unwrap();
    engine
        .store_document_embeddings(source("doc-b", "globex", "salary march"), &cancel)
        .await
        .unwrap();

    let hits = engine
        .find_similar_documents("salary march", &SearchScope::company("globex"), None, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, "doc-b");
}

#[tokio::test]
async fn empty_store_returns_empty_without_provider_call() {
    let (_tmp, provider, engine) = test_engine();

    let hits = engine
        .find_similar_documents("salary", &SearchScope::company("acme"), None, None)
        .await
        .unwrap();
    assert!(hits.is_empty());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn hybrid_search_weighs_keywords() {
    let (_tmp, _provider, engine) = test_engine();
    let cancel = CancellationToken::new();

    // Semantically adjacent but no "pension" keyword vs a weaker semantic
    // match that carries the keyword.
    engine
        .store_document_embeddings(
            source("doc-semantic", "acme", "salary march salary march"),
            &cancel,
        )
        .await
        .unwrap();
    engine
        .store_document_embeddings(
            source("doc-keyword", "acme", "pension pension pension statement"),
            &cancel,
        )
        .await
        .unwrap();

    let semantic_first = engine
        .hybrid_search(
            "salary march pension",
            &SearchScope::company("acme"),
            HybridOptions {
                semantic_weight: Some(1.0),
                keyword_weight: Some(0.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(semantic_first[0].document_id, "doc-semantic");

    let keyword_first = engine
        .hybrid_search(
            "pension",
            &SearchScope::company("acme"),
            HybridOptions {
                semantic_weight: Some(0.0),
                keyword_weight: Some(1.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(keyword_first[0].document_id, "doc-keyword");
}

#[tokio::test]
async fn duplicate_chunks_are_not_embedded() {
    let (_tmp, _provider, engine) = test_engine();

    // Two identical paragraphs, far enough apart to land in separate chunks.
    let paragraph = "Salary payment for march. ".repeat(40);
    let text = format!("{paragraph}\n\n{paragraph}");
    let stored = engine
        .store_document_embeddings(source("doc-1", "acme", &text), &CancellationToken::new())
        .await
        .unwrap();

    assert!(stored.usage.duplicates_skipped > 0);
    assert_eq!(
        stored.usage.chunks_processed,
        stored.usage.duplicates_skipped + stored.chunks_stored
    );
}

#[tokio::test]
async fn cancelled_run_persists_nothing_and_reports_usage() {
    let (_tmp, _provider, engine) = test_engine();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine
        .store_document_embeddings(source("doc-1", "acme", "salary march"), &cancel)
        .await
        .unwrap_err();

    match err {
        Error::Provider { usage, .. } => {
            assert_eq!(usage.total_tokens, 0);
            assert_eq!(usage.chunks_processed, usage.duplicates_skipped);
        }
        other => panic!("expected provider error, got {other:?}"),
    }

    let hits = engine
        .find_similar_documents("salary", &SearchScope::company("acme"), None, None)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn learning_merges_and_grows_confidence() {
    let (_tmp, _provider, engine) = test_engine();
    let data = json!({"net_salary": 2100.0, "category": "pension"});

    let first = engine
        .learn_from_document("acme", "payslip", None, &data, Some(0.4))
        .await
        .unwrap();
    assert!(!first.is_empty());
    assert!(first.iter().all(|p| p.usage_count == 1));
    assert!(first.iter().all(|p| p.status == PatternStatus::Pending));

    let second = engine
        .learn_from_document("acme", "payslip", None, &data, Some(0.8))
        .await
        .unwrap();
    assert!(second.iter().all(|p| p.usage_count == 2));
    assert!(second.iter().all(|p| (p.confidence - 0.6).abs() < 1e-6));
}

#[tokio::test]
async fn malformed_document_data_is_a_parse_error() {
    let (_tmp, _provider, engine) = test_engine();
    let err = engine
        .learn_from_document("acme", "payslip", None, &json!([1, 2, 3]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_learning_counts_every_observation() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(RedbMemoryStore::open(&tmp.path().join("memory.redb")).unwrap());
    let provider = Arc::new(VocabEmbedder::new());
    let engine = Arc::new(MemoryEngine::new(
        EngineConfig::default(),
        Arc::clone(&store) as Arc<dyn docmem::MemoryStore>,
        provider,
    ));

    let data = json!({"net_salary": 2100.0});
    let a = {
        let engine = Arc::clone(&engine);
        let data = data.clone();
        tokio::spawn(
            async move { engine.learn_from_document("acme", "payslip", None, &data, None).await },
        )
    };
    let b = {
        let engine = Arc::clone(&engine);
        let data = data.clone();
        tokio::spawn(
            async move { engine.learn_from_document("acme", "payslip", None, &data, None).await },
        )
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let context = engine
        .get_memory_context("salary", &SearchScope::company("acme"), None)
        .await
        .unwrap();
    assert!(context.company_patterns.iter().all(|p| p.usage_count == 2));
}

#[tokio::test]
async fn rejected_patterns_leave_the_context() {
    let (_tmp, _provider, engine) = test_engine();
    let data = json!({"category": "pension"});

    let learned = engine
        .learn_from_document("acme", "payslip", None, &data, None)
        .await
        .unwrap();
    let concept = learned
        .iter()
        .find(|p| p.pattern.starts_with("concept:"))
        .unwrap();

    let scope = SearchScope::company("acme");
    let before = engine.get_memory_context("pension", &scope, None).await.unwrap();
    assert!(before.learned_keywords.contains(&"pension".to_string()));

    let rejected = engine
        .validate_memory(concept.id, false, Some("not a real category".into()))
        .await
        .unwrap();
    assert_eq!(rejected.status, PatternStatus::Rejected);

    let after = engine.get_memory_context("pension", &scope, None).await.unwrap();
    assert!(!after.learned_keywords.contains(&"pension".to_string()));
    assert!(after.company_patterns.iter().all(|p| p.id != concept.id));
}

#[tokio::test]
async fn employee_patterns_split_from_company_patterns() {
    let (_tmp, _provider, engine) = test_engine();
    let data = json!({"net_salary": 2100.0});

    engine
        .learn_from_document("acme", "payslip", None, &data, None)
        .await
        .unwrap();
    engine
        .learn_from_document("acme", "payslip", Some("emp-7"), &data, None)
        .await
        .unwrap();

    let mut scope = SearchScope::company("acme");
    scope.employee_id = Some("emp-7".into());
    let context = engine.get_memory_context("salary", &scope, None).await.unwrap();

    assert!(!context.company_patterns.is_empty());
    assert!(!context.employee_patterns.is_empty());
    assert!(
        context
            .employee_patterns
            .iter()
            .all(|p| p.employee_id.as_deref() == Some("emp-7"))
    );
    assert!(context.company_patterns.iter().all(|p| p.employee_id.is_none()));
}
