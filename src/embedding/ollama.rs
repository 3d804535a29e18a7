//! Embedding adapter for the Ollama REST API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{EmbeddingClient, EmbeddingClientError};

/// Embedding client backed by an Ollama server's `/api/embed` endpoint.
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    /// Construct a client for the given server URL and model.
    pub fn new(
        base_url: &str,
        model: &str,
        dimension: usize,
    ) -> Result<Self, EmbeddingClientError> {
        let client = Client::builder()
            .user_agent("ragpipe/0.1")
            .build()
            .map_err(|err| EmbeddingClientError::GenerationFailed(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();

        tracing::debug!(model = %self.model, texts = expected, "Requesting embeddings");

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|err| EmbeddingClientError::GenerationFailed(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "embedding request returned {status}: {body}"
            )));
        }

        let payload: EmbedResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingClientError::GenerationFailed(err.to_string()))?;

        if payload.embeddings.len() != expected {
            return Err(EmbeddingClientError::CountMismatch {
                expected,
                actual: payload.embeddings.len(),
            });
        }
        for vector in &payload.embeddings {
            if vector.len() != self.dimension {
                return Err(EmbeddingClientError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }

        Ok(payload.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    #[tokio::test]
    async fn embed_parses_vectors_in_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embed")
                    .json_body(json!({ "model": "nomic-embed-text", "input": ["alpha", "beta"] }));
                then.status(200).json_body(json!({
                    "embeddings": [[1.0, 0.0], [0.0, 1.0]]
                }));
            })
            .await;

        let embedder = OllamaEmbedder::new(&server.base_url(), "nomic-embed-text", 2).unwrap();
        let vectors = embedder
            .embed(vec!["alpha".into(), "beta".into()])
            .await
            .unwrap();

        mock.assert();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn embed_rejects_wrong_dimension() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200)
                    .json_body(json!({ "embeddings": [[1.0, 0.0, 0.5]] }));
            })
            .await;

        let embedder = OllamaEmbedder::new(&server.base_url(), "nomic-embed-text", 2).unwrap();
        let error = embedder.embed(vec!["alpha".into()]).await.unwrap_err();
        assert!(matches!(
            error,
            EmbeddingClientError::DimensionMismatch { expected: 2, actual: 3 }
        ));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn embed_surfaces_server_errors_as_retryable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(500).body("model not loaded");
            })
            .await;

        let embedder = OllamaEmbedder::new(&server.base_url(), "nomic-embed-text", 2).unwrap();
        let error = embedder.embed(vec!["alpha".into()]).await.unwrap_err();
        assert!(error.is_retryable());
    }
}
