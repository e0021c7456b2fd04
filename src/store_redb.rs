//! Embedded [`MemoryStore`] backed by redb.
//!
//! Chunk records are stored as JSON with their vectors split out into a
//! binary table: 4 bytes dimension (u32 LE) followed by f32 LE components.
//! Pattern merges run inside a single write transaction; redb serializes
//! write transactions, which gives `observe_pattern` the mutual exclusion
//! the trait contract requires.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    store::{
        ChunkRecord, MemoryPattern, MemoryStore, PatternObservation, PatternScope, PatternStatus,
        SearchScope,
    },
};

const CHUNKS: TableDefinition<&str, &[u8]> = TableDefinition::new("chunks");
const EMBEDDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("embeddings");
const PATTERNS: TableDefinition<&str, &[u8]> = TableDefinition::new("patterns");

/// Header size: 4 bytes vector dimension.
const HEADER_SIZE: usize = 4;

pub struct RedbMemoryStore {
    db: Database,
}

impl RedbMemoryStore {
    /// Open or create a memory store at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use docmem::store_redb::RedbMemoryStore;
    ///
    /// let store = RedbMemoryStore::open(&tmp.path().join("memory.redb")).unwrap();
    /// # drop(store);
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(CHUNKS)?;
        txn.open_table(EMBEDDINGS)?;
        txn.open_table(PATTERNS)?;
        txn.commit()?;

        Ok(Self { db })
    }
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + embedding.len() * 4);
    bytes.extend_from_slice(&(embedding.len() as u32).to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(embedding));
    bytes
}

fn embedding_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    let dimension = u32::from_le_bytes(bytes[0..4].try_into().ok()?) as usize;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != dimension * 4 {
        return None;
    }
    // Read component-wise: the slice offset is not guaranteed f32-aligned.
    Some(
        payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[async_trait::async_trait]
impl MemoryStore for RedbMemoryStore {
    async fn insert_chunks(&self, records: Vec<ChunkRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut chunks = txn.open_table(CHUNKS)?;
            let mut embeddings = txn.open_table(EMBEDDINGS)?;
            for record in &records {
                let key = record.id.to_string();
                // The vector lives in its own binary table; the JSON row
                // keeps an empty placeholder.
                let mut row = record.clone();
                let embedding = std::mem::take(&mut row.embedding);
                let json = serde_json::to_vec(&row)?;
                chunks.insert(key.as_str(), json.as_slice())?;
                embeddings.insert(key.as_str(), embedding_to_bytes(&embedding).as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    async fn candidates_in_scope(&self, scope: &SearchScope) -> Result<Vec<ChunkRecord>> {
        let txn = self.db.begin_read()?;
        let chunks = txn.open_table(CHUNKS)?;
        let embeddings = txn.open_table(EMBEDDINGS)?;

        let mut result = Vec::new();
        for entry in chunks.iter()? {
            let (key, value) = entry?;
            let mut record: ChunkRecord = serde_json::from_slice(value.value())?;
            if !scope.matches(&record) {
                continue;
            }
            if let Some(guard) = embeddings.get(key.value())?
                && let Some(embedding) = embedding_from_bytes(guard.value())
            {
                record.embedding = embedding;
            }
            result.push(record);
        }
        Ok(result)
    }

    async fn observe_pattern(
        &self,
        scope: &PatternScope,
        observation: PatternObservation,
        merge_threshold: f32,
    ) -> Result<MemoryPattern> {
        let txn = self.db.begin_write()?;
        let merged = {
            let mut patterns = txn.open_table(PATTERNS)?;

            // Scan the scope for the closest existing pattern: exact key
            // match wins, otherwise the highest similarity at or above the
            // merge bar.
            let mut existing: Option<MemoryPattern> = None;
            let mut best_similarity = 0.0f32;
            for entry in patterns.iter()? {
                let (_, value) = entry?;
                let pattern: MemoryPattern = serde_json::from_slice(value.value())?;
                if pattern.company_id != scope.company_id
                    || pattern.document_type_id != scope.document_type_id
                    || pattern.employee_id != scope.employee_id
                {
                    continue;
                }
                if pattern.pattern == observation.key {
                    existing = Some(pattern);
                    break;
                }
                let similarity = crate::store::key_similarity(&pattern.pattern, &observation.key);
                if similarity >= merge_threshold && similarity > best_similarity {
                    best_similarity = similarity;
                    existing = Some(pattern);
                }
            }

            let merged = match existing {
                Some(mut pattern) => {
                    pattern.reinforce(&observation);
                    pattern
                }
                None => MemoryPattern::from_observation(scope, &observation),
            };

            let key = merged.id.to_string();
            let json = serde_json::to_vec(&merged)?;
            patterns.insert(key.as_str(), json.as_slice())?;
            merged
        };
        txn.commit()?;
        Ok(merged)
    }

    async fn patterns_for_company(&self, company_id: &str) -> Result<Vec<MemoryPattern>> {
        let txn = self.db.begin_read()?;
        let patterns = txn.open_table(PATTERNS)?;

        let mut result = Vec::new();
        for entry in patterns.iter()? {
            let (_, value) = entry?;
            let pattern: MemoryPattern = serde_json::from_slice(value.value())?;
            if pattern.company_id == company_id {
                result.push(pattern);
            }
        }
        Ok(result)
    }

    async fn set_pattern_status(
        &self,
        pattern_id: Uuid,
        status: PatternStatus,
        feedback: Option<String>,
    ) -> Result<MemoryPattern> {
        let txn = self.db.begin_write()?;
        let updated = {
            let mut patterns = txn.open_table(PATTERNS)?;
            let key = pattern_id.to_string();

            let mut pattern: MemoryPattern = match patterns.get(key.as_str())? {
                Some(guard) => serde_json::from_slice(guard.value())?,
                None => {
                    return Err(Error::NotFound {
                        kind: "pattern",
                        id: key,
                    });
                }
            };

            pattern.status = status;
            if feedback.is_some() {
                pattern.feedback = feedback;
            }
            pattern.updated_at = chrono::Utc::now();

            let json = serde_json::to_vec(&pattern)?;
            patterns.insert(key.as_str(), json.as_slice())?;
            pattern
        };
        txn.commit()?;
        Ok(updated)
    }
}

impl std::fmt::Debug for RedbMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbMemoryStore").finish_non_exhaustive()
    }
}
