//! Query-time retrieval: embed, search, dedupe, rank.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    embedding::{EmbeddingClient, EmbeddingClientError},
    index::{IndexError, ScoredChunk, VectorIndex},
};

/// Errors emitted while retrieving context for a query.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// Embedding provider failed to return a vector for the query text.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Vector index request failed.
    #[error("Index request failed: {0}")]
    Index(#[from] IndexError),
    /// Embedding provider returned no vector for the query.
    #[error("Embedding provider returned no vectors for the query")]
    EmptyEmbedding,
}

impl RetrieveError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Embedding(error) => error.is_retryable(),
            Self::Index(error) => error.is_retryable(),
            Self::EmptyEmbedding => false,
        }
    }
}

/// Tuning knobs for the retrieval pass.
#[derive(Debug, Clone)]
pub struct RetrieverSettings {
    /// Over-fetch multiplier applied before dedupe and truncation.
    pub overfetch: usize,
    /// Minimum similarity a hit must clear to be retained.
    pub min_score: f32,
    /// Score gap under which adjacent chunks count as near-duplicates.
    pub dedupe_epsilon: f32,
}

/// Embeds queries and ranks index hits into citation-ready context.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    settings: RetrieverSettings,
}

impl Retriever {
    /// Build a retriever over the given capabilities.
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        settings: RetrieverSettings,
    ) -> Self {
        Self {
            embedder,
            index,
            settings,
        }
    }

    /// Retrieve up to `k` ranked chunks relevant to the query.
    ///
    /// An empty result is a valid outcome, not an error: it routes the turn
    /// into the no-context answer path.
    pub async fn retrieve(
        &self,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrieveError> {
        let mut vectors = self.embedder.embed(vec![query_text.to_string()]).await?;
        let vector = vectors.pop().ok_or(RetrieveError::EmptyEmbedding)?;

        // Over-fetch so dedupe and thresholding still leave k candidates.
        let fetch = (k * self.settings.overfetch).max(k + 4);
        let hits = self.index.query(&vector, fetch, true).await?;

        let above_threshold: Vec<ScoredChunk> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.settings.min_score)
            .collect();

        let mut kept = collapse_adjacent(above_threshold, self.settings.dedupe_epsilon);
        kept.truncate(k);

        tracing::debug!(
            query = %truncate_for_log(query_text),
            returned = kept.len(),
            "Retrieval complete"
        );
        Ok(kept)
    }
}

/// Collapse near-duplicate chunks: same document, adjacent ordinal, score
/// within epsilon. Hits arrive in rank order, so the kept chunk is always the
/// higher-scoring of the pair.
fn collapse_adjacent(hits: Vec<ScoredChunk>, epsilon: f32) -> Vec<ScoredChunk> {
    let mut kept: Vec<ScoredChunk> = Vec::with_capacity(hits.len());
    for hit in hits {
        let duplicate = kept.iter().any(|existing| {
            existing.document_id == hit.document_id
                && existing.ordinal.abs_diff(hit.ordinal) == 1
                && (existing.score - hit.score).abs() <= epsilon
        });
        if !duplicate {
            kept.push(hit);
        }
    }
    kept
}

fn truncate_for_log(text: &str) -> String {
    text.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        embedding::HashEmbedder,
        index::{EmbeddedChunk, MemoryIndex},
        types::chunk_id,
    };
    use async_trait::async_trait;
    use uuid::Uuid;

    struct FixedEmbedder {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingClient for FixedEmbedder {
        async fn embed(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }

        fn dimension(&self) -> usize {
            self.vector.len()
        }
    }

    fn settings() -> RetrieverSettings {
        RetrieverSettings {
            overfetch: 3,
            min_score: 0.25,
            dedupe_epsilon: 0.05,
        }
    }

    fn chunk(doc: Uuid, ordinal: usize, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            id: chunk_id(doc, ordinal),
            document_id: doc,
            document: "manual.pdf".into(),
            ordinal,
            text: format!("chunk {ordinal}"),
            page: 1,
            images: Vec::new(),
            token_len: 2,
            vector,
        }
    }

    async fn index_with(chunks: Vec<EmbeddedChunk>) -> Arc<MemoryIndex> {
        let index = Arc::new(MemoryIndex::new());
        let doc = chunks[0].document_id;
        index.upsert(doc, chunks).await.unwrap();
        index.set_document_active(doc, true).await.unwrap();
        index
    }

    #[tokio::test]
    async fn collapses_adjacent_near_duplicates() {
        let doc = Uuid::new_v4();
        let index = index_with(vec![
            chunk(doc, 0, vec![1.0, 0.0]),
            chunk(doc, 1, vec![0.999, 0.01]),
            chunk(doc, 5, vec![0.7, 0.7]),
        ])
        .await;
        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
        });

        let retriever = Retriever::new(embedder, index, settings());
        let hits = retriever.retrieve("query", 5).await.unwrap();

        let ordinals: Vec<usize> = hits.iter().map(|hit| hit.ordinal).collect();
        assert_eq!(ordinals, vec![0, 5]);
    }

    #[tokio::test]
    async fn below_threshold_yields_empty_result() {
        let doc = Uuid::new_v4();
        let index = index_with(vec![chunk(doc, 0, vec![0.0, 1.0])]).await;
        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
        });

        let retriever = Retriever::new(embedder, index, settings());
        let hits = retriever.retrieve("query", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn truncates_to_k() {
        let doc = Uuid::new_v4();
        let chunks: Vec<EmbeddedChunk> = (0..10)
            .step_by(2) // non-adjacent ordinals so dedupe keeps them all
            .map(|ordinal| chunk(doc, ordinal, vec![1.0, ordinal as f32 / 100.0]))
            .collect();
        let index = index_with(chunks).await;
        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
        });

        let retriever = Retriever::new(embedder, index, settings());
        let hits = retriever.retrieve("query", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn hash_embedder_round_trip_ranks_matching_chunk_first() {
        let doc = Uuid::new_v4();
        let embedder = Arc::new(HashEmbedder::new(32));
        let texts = ["printers jam on tray two", "reset the vpn client config"];
        let vectors = embedder
            .embed(texts.iter().map(|t| t.to_string()).collect())
            .await
            .unwrap();

        let chunks: Vec<EmbeddedChunk> = texts
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(ordinal, (text, vector))| {
                let mut c = chunk(doc, ordinal * 2, vector);
                c.text = text.to_string();
                c
            })
            .collect();
        let index = index_with(chunks).await;

        let retriever = Retriever::new(embedder, index, settings());
        let hits = retriever
            .retrieve("reset the vpn client config", 2)
            .await
            .unwrap();
        assert_eq!(hits[0].text, "reset the vpn client config");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }
}
