//! Embedding capability trait and adapters.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Ollama REST embedding backend.
pub mod ollama;

pub use ollama::OllamaEmbedder;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider returned a different number of vectors than texts supplied.
    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    CountMismatch {
        /// Number of texts sent to the provider.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
    /// Returned vector dimensionality does not match configuration.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured embedding dimension.
        expected: usize,
        /// Dimension of the vector the provider produced.
        actual: usize,
    },
}

impl EmbeddingClientError {
    /// Whether retrying the same call may succeed.
    ///
    /// Transport and provider failures are retryable; shape mismatches point
    /// at misconfiguration and are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GenerationFailed(_))
    }
}

/// Interface implemented by embedding backends.
///
/// `embed` must return one vector per input text, in input order. Any failure
/// aborts the whole call; partial results are never returned.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Dimensionality of the vectors this client produces.
    fn dimension(&self) -> usize;
}

/// Deterministic embedding client hashing bytes into vector slots.
///
/// Useful as an offline fallback and as the reference client in tests; two
/// identical texts always map to the same normalized vector.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Construct a hash embedder producing vectors of the given dimension.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut vector = vec![0.0_f32; dimension];
        for (position, byte) in text.bytes().enumerate() {
            // Fold content bytes into slots round-robin.
            vector[position % dimension] += f32::from(byte) / 255.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for slot in &mut vector {
                *slot /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(texts
            .into_iter()
            .map(|text| Self::encode(&text, self.dimension))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Wrapper that slices embedding requests into bounded batches.
///
/// External providers charge per call and cap request sizes; batching
/// amortizes the round trips while keeping output order identical to input
/// order. A failure in any batch aborts the whole call.
pub struct BatchedEmbedder {
    inner: Arc<dyn EmbeddingClient>,
    batch_size: usize,
}

impl BatchedEmbedder {
    /// Wrap a client with the given maximum batch size.
    pub fn new(inner: Arc<dyn EmbeddingClient>, batch_size: usize) -> Self {
        Self {
            inner,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl EmbeddingClient for BatchedEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let total = texts.len();
        let mut vectors = Vec::with_capacity(total);
        let mut remaining = texts;

        while !remaining.is_empty() {
            let tail = remaining.split_off(remaining.len().min(self.batch_size));
            let batch = std::mem::replace(&mut remaining, tail);
            let batch_len = batch.len();
            let produced = self.inner.embed(batch).await?;
            if produced.len() != batch_len {
                return Err(EmbeddingClientError::CountMismatch {
                    expected: batch_len,
                    actual: produced.len(),
                });
            }
            for vector in &produced {
                if vector.len() != self.inner.dimension() {
                    return Err(EmbeddingClientError::DimensionMismatch {
                        expected: self.inner.dimension(),
                        actual: vector.len(),
                    });
                }
            }
            vectors.extend(produced);
        }

        debug_assert_eq!(vectors.len(), total);
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}
