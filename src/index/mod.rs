//! Vector index abstraction and backends.
//!
//! The similarity-search backend stays fully hidden behind [`VectorIndex`] so
//! it can be swapped (in-memory or Qdrant over REST) without touching
//! retrieval logic. Both backends share the descending-score,
//! ascending-chunk-id ordering contract that keeps retrieval deterministic.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ChunkId, DocumentId};

/// In-memory cosine-similarity backend.
pub mod memory;
/// Qdrant REST backend.
pub mod qdrant;

pub use memory::MemoryIndex;
pub use qdrant::QdrantIndex;

/// Errors returned by vector index backends.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid index URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend responded with an unexpected status code.
    #[error("Unexpected index response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the backend.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Stored payload could not be decoded into a chunk.
    #[error("Malformed chunk payload: {0}")]
    MalformedPayload(String),
}

impl IndexError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::UnexpectedStatus { .. })
    }
}

/// A chunk with its embedding vector, ready for indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    /// Deterministic chunk identifier.
    pub id: ChunkId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Source document name carried for citation rendering.
    pub document: String,
    /// Zero-based position of the chunk within the document.
    pub ordinal: usize,
    /// Chunk text content.
    pub text: String,
    /// Page containing the chunk's first character.
    pub page: u32,
    /// Image filenames attached to the chunk.
    pub images: Vec<String>,
    /// Token count of the chunk text.
    pub token_len: usize,
    /// Embedding vector for the chunk text.
    pub vector: Vec<f32>,
}

/// A chunk returned from a similarity query, with its score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// Deterministic chunk identifier.
    pub id: ChunkId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Source document name.
    pub document: String,
    /// Zero-based position of the chunk within the document.
    pub ordinal: usize,
    /// Chunk text content.
    pub text: String,
    /// Page containing the chunk's first character.
    pub page: u32,
    /// Image filenames attached to the chunk.
    pub images: Vec<String>,
    /// Token count of the chunk text.
    pub token_len: usize,
    /// Cosine similarity against the query vector.
    pub score: f32,
}

/// Interface implemented by similarity-search backends.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace chunks by id.
    ///
    /// Newly upserted documents start unpublished; call
    /// [`VectorIndex::set_document_active`] with `true` once the document's
    /// metadata is in place so active-only queries never observe a
    /// half-ingested document.
    async fn upsert(
        &self,
        document_id: DocumentId,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<(), IndexError>;

    /// Publish or hide a document's chunks for active-only queries.
    async fn set_document_active(
        &self,
        document_id: DocumentId,
        active: bool,
    ) -> Result<(), IndexError>;

    /// Remove every chunk of a document, returning how many were removed.
    async fn delete_by_document(&self, document_id: DocumentId) -> Result<usize, IndexError>;

    /// Return the `k` nearest chunks by cosine similarity.
    ///
    /// Results are ordered by descending score with ties broken by ascending
    /// chunk id. With `active_only`, chunks of unpublished documents are
    /// excluded.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        active_only: bool,
    ) -> Result<Vec<ScoredChunk>, IndexError>;
}

/// Sort hits by descending score, breaking ties by ascending chunk id.
pub(crate) fn sort_hits(hits: &mut [ScoredChunk]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn hit(id: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            id: id.to_string(),
            document_id: Uuid::nil(),
            document: "doc".into(),
            ordinal: 0,
            text: String::new(),
            page: 1,
            images: Vec::new(),
            token_len: 0,
            score,
        }
    }

    #[test]
    fn sort_hits_breaks_ties_by_ascending_id() {
        let mut hits = vec![hit("b", 0.5), hit("a", 0.5), hit("c", 0.9)];
        sort_hits(&mut hits);
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
