//! Persistence records and the storage collaborator trait.
//!
//! Chunk/embedding records are write-once and owned by the document that
//! produced them. Pattern records are the only mutable entities; every
//! mutation goes through [`MemoryStore::observe_pattern`] or
//! [`MemoryStore::set_pattern_status`], which implementations apply
//! atomically so concurrent merges never lose updates.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{chunking::TextChunk, error::Result, keywords::tokenize};

/// Observations beyond this prior weight no longer shrink: recent evidence
/// always moves the confidence by at least ~10%.
const RECENCY_PRIOR_CAP: f32 = 9.0;

/// A stored chunk with its embedding, scoped to a company/document/employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: Uuid,
    pub document_id: String,
    pub company_id: String,
    pub document_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    pub chunk: TextChunk,
    pub embedding: Vec<f32>,
    /// Structured extraction output of the owning document, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Validation state of a learned pattern.
///
/// Three states, no terminal one: any state is reachable from any other via
/// explicit operator action ([`MemoryStore::set_pattern_status`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternStatus {
    Pending,
    Validated,
    Rejected,
}

/// A learned, reusable structural signal with confidence and usage count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPattern {
    pub id: Uuid,
    /// Pattern key, e.g. `field:net_salary:number`.
    pub pattern: String,
    pub confidence: f32,
    pub usage_count: u32,
    pub company_id: String,
    pub document_type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    pub status: PatternStatus,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryPattern {
    /// Create a pattern from its first observation.
    pub fn from_observation(scope: &PatternScope, observation: &PatternObservation) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pattern: observation.key.clone(),
            confidence: observation.confidence.clamp(0.0, 1.0),
            usage_count: 1,
            company_id: scope.company_id.clone(),
            document_type_id: scope.document_type_id.clone(),
            employee_id: scope.employee_id.clone(),
            status: PatternStatus::Pending,
            metadata: observation.metadata.clone(),
            feedback: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold a reinforcing observation into this pattern.
    ///
    /// Confidence becomes a running weighted average with the stored count as
    /// prior weight, capped so fresh evidence keeps influence; it is clamped
    /// to [0, 1] and never simply overwritten. `usage_count` increments by
    /// exactly one, and new metadata keys are unioned in without replacing
    /// existing values. Increment-with-known-prior makes applications commute
    /// when the store serializes them.
    pub fn reinforce(&mut self, observation: &PatternObservation) {
        let prior = (self.usage_count as f32).min(RECENCY_PRIOR_CAP);
        self.confidence = ((self.confidence * prior + observation.confidence) / (prior + 1.0))
            .clamp(0.0, 1.0);
        self.usage_count += 1;
        for (key, value) in &observation.metadata {
            self.metadata.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self.updated_at = Utc::now();
    }

    /// Whether an observation key matches this pattern: exact equality, or
    /// token-set Jaccard at or above `merge_threshold`.
    pub fn matches_key(&self, key: &str, merge_threshold: f32) -> bool {
        if self.pattern == key {
            return true;
        }
        key_similarity(&self.pattern, key) >= merge_threshold
    }
}

/// Token-set Jaccard similarity between two pattern keys, in [0, 1].
pub fn key_similarity(a: &str, b: &str) -> f32 {
    use std::collections::HashSet;

    let ta: HashSet<String> = tokenize(a).into_iter().collect();
    let tb: HashSet<String> = tokenize(b).into_iter().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - intersection;
    intersection as f32 / union as f32
}

/// Ownership scope of a pattern record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternScope {
    pub company_id: String,
    pub document_type_id: String,
    pub employee_id: Option<String>,
}

/// One extracted structural signal, ready to merge or insert.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternObservation {
    pub key: String,
    /// Confidence of this observation (initial confidence on insert).
    pub confidence: f32,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Candidate filter for retrieval. `company_id` is mandatory: queries never
/// cross a company boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchScope {
    pub company_id: String,
    pub document_type: Option<String>,
    pub employee_id: Option<String>,
}

impl SearchScope {
    pub fn company(company_id: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            document_type: None,
            employee_id: None,
        }
    }

    pub fn matches(&self, record: &ChunkRecord) -> bool {
        if record.company_id != self.company_id {
            return false;
        }
        if let Some(document_type) = &self.document_type
            && &record.document_type != document_type
        {
            return false;
        }
        if let Some(employee_id) = &self.employee_id
            && record.employee_id.as_ref() != Some(employee_id)
        {
            return false;
        }
        true
    }
}

/// The persistence collaborator.
///
/// Implementations must apply `observe_pattern` and `set_pattern_status`
/// atomically with respect to each other (read-modify-write under mutual
/// exclusion); last-writer-wins on `usage_count`/`confidence` is not an
/// acceptable implementation.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist chunk+embedding records. Write-once per record id.
    async fn insert_chunks(&self, records: Vec<ChunkRecord>) -> Result<()>;

    /// All chunk records matching the scope filter.
    async fn candidates_in_scope(&self, scope: &SearchScope) -> Result<Vec<ChunkRecord>>;

    /// Merge an observation into a close-enough existing pattern in the same
    /// scope, or insert a new pattern. Returns the resulting record.
    async fn observe_pattern(
        &self,
        scope: &PatternScope,
        observation: PatternObservation,
        merge_threshold: f32,
    ) -> Result<MemoryPattern>;

    /// All patterns owned by a company, regardless of status.
    async fn patterns_for_company(&self, company_id: &str) -> Result<Vec<MemoryPattern>>;

    /// Move a pattern to a new validation status with optional feedback.
    /// Errors with `NotFound` for unknown ids.
    async fn set_pattern_status(
        &self,
        pattern_id: Uuid,
        status: PatternStatus,
        feedback: Option<String>,
    ) -> Result<MemoryPattern>;
}
