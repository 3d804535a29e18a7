//! In-memory vector index.
//!
//! Brute-force cosine similarity over a per-document chunk map. Plenty fast
//! for the corpus sizes this pipeline targets, and the reference
//! implementation for the [`VectorIndex`] ordering contract. All documents
//! live under one `RwLock`: reads run concurrently while any mutation of a
//! document excludes readers, which is exactly the exclusion the delete and
//! upsert paths require.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{EmbeddedChunk, IndexError, ScoredChunk, VectorIndex, sort_hits};
use crate::types::{ChunkId, DocumentId};

#[derive(Default)]
struct DocumentEntry {
    active: bool,
    chunks: BTreeMap<ChunkId, EmbeddedChunk>,
}

/// Vector index held entirely in process memory.
#[derive(Default)]
pub struct MemoryIndex {
    documents: RwLock<HashMap<DocumentId, DocumentEntry>>,
}

impl MemoryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(
        &self,
        document_id: DocumentId,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<(), IndexError> {
        let mut documents = self.documents.write().await;
        let entry = documents.entry(document_id).or_default();
        for chunk in chunks {
            entry.chunks.insert(chunk.id.clone(), chunk);
        }
        Ok(())
    }

    async fn set_document_active(
        &self,
        document_id: DocumentId,
        active: bool,
    ) -> Result<(), IndexError> {
        let mut documents = self.documents.write().await;
        if let Some(entry) = documents.get_mut(&document_id) {
            entry.active = active;
        }
        Ok(())
    }

    async fn delete_by_document(&self, document_id: DocumentId) -> Result<usize, IndexError> {
        let mut documents = self.documents.write().await;
        let removed = documents
            .remove(&document_id)
            .map(|entry| entry.chunks.len())
            .unwrap_or(0);
        Ok(removed)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        active_only: bool,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let documents = self.documents.read().await;
        let mut hits: Vec<ScoredChunk> = documents
            .values()
            .filter(|entry| entry.active || !active_only)
            .flat_map(|entry| entry.chunks.values())
            .map(|chunk| ScoredChunk {
                id: chunk.id.clone(),
                document_id: chunk.document_id,
                document: chunk.document.clone(),
                ordinal: chunk.ordinal,
                text: chunk.text.clone(),
                page: chunk.page,
                images: chunk.images.clone(),
                token_len: chunk.token_len,
                score: cosine_similarity(vector, &chunk.vector),
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }
}

/// Cosine similarity of two vectors; zero when either has zero norm.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
