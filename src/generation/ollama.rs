//! Generation client for an Ollama-compatible `/api/generate` endpoint.
//!
//! Streaming responses arrive as newline-delimited JSON, one object per
//! token batch, with `"done": true` on the final object.

use async_stream::try_stream;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{LlmClient, LlmClientError, TokenStream};
use crate::config::SamplingConfig;

/// Client for Ollama's generate API.
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaGenerator {
    /// Create a client for the given endpoint and model.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            model: model.into(),
        }
    }

    fn request_body(&self, prompt: &str, sampling: &SamplingConfig, stream: bool) -> serde_json::Value {
        json!({
            "model": self.model,
            "prompt": prompt,
            "stream": stream,
            "options": {
                "temperature": sampling.temperature,
                "top_p": sampling.top_p,
                "num_predict": sampling.max_tokens,
            },
        })
    }

    fn parse_line(line: &[u8]) -> Result<Option<GenerateLine>, LlmClientError> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let parsed: GenerateLine = serde_json::from_slice(line)
            .map_err(|error| LlmClientError::Stream(format!("malformed stream line: {error}")))?;
        if let Some(message) = parsed.error {
            return Err(LlmClientError::Stream(message));
        }
        Ok(Some(parsed))
    }
}

#[async_trait::async_trait]
impl LlmClient for OllamaGenerator {
    async fn generate_stream(
        &self,
        prompt: &str,
        sampling: &SamplingConfig,
    ) -> Result<TokenStream, LlmClientError> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&self.request_body(prompt, sampling, true))
            .send()
            .await
            .map_err(|error| LlmClientError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmClientError::Request(format!(
                "generate returned {status}: {body}"
            )));
        }

        let mut bytes = response.bytes_stream();
        let stream = try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut finished = false;
            'body: while let Some(piece) = bytes.next().await {
                let piece =
                    piece.map_err(|error| LlmClientError::Stream(error.to_string()))?;
                buffer.extend_from_slice(&piece);
                while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    if let Some(parsed) = Self::parse_line(&line)? {
                        if !parsed.response.is_empty() {
                            yield parsed.response;
                        }
                        if parsed.done {
                            finished = true;
                            break 'body;
                        }
                    }
                }
            }
            if !finished {
                // Provider closed the connection without a terminal object;
                // treat any buffered remainder as the last line.
                if let Some(parsed) = Self::parse_line(&buffer)? {
                    if !parsed.response.is_empty() {
                        yield parsed.response;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn generate(
        &self,
        prompt: &str,
        sampling: &SamplingConfig,
    ) -> Result<String, LlmClientError> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&self.request_body(prompt, sampling, false))
            .send()
            .await
            .map_err(|error| LlmClientError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmClientError::Request(format!(
                "generate returned {status}: {body}"
            )));
        }

        let parsed: GenerateLine = response
            .json()
            .await
            .map_err(|error| LlmClientError::Request(error.to_string()))?;
        if let Some(message) = parsed.error {
            return Err(LlmClientError::Request(message));
        }
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use httpmock::prelude::*;

    fn sampling() -> SamplingConfig {
        SamplingConfig {
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn streams_tokens_until_done() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"model": "mistral", "stream": true}"#);
                then.status(200).body(concat!(
                    "{\"response\":\"Hello\",\"done\":false}\n",
                    "{\"response\":\" world\",\"done\":false}\n",
                    "{\"response\":\"\",\"done\":true}\n",
                ));
            })
            .await;

        let client = OllamaGenerator::new(server.base_url(), "mistral");
        let mut stream = client.generate_stream("hi", &sampling()).await.unwrap();

        let mut tokens = Vec::new();
        while let Some(token) = stream.next().await {
            tokens.push(token.unwrap());
        }
        assert_eq!(tokens, vec!["Hello", " world"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_streaming_returns_full_text() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"stream": false}"#);
                then.status(200)
                    .json_body(serde_json::json!({"response": "1. A?\n2. B?", "done": true}));
            })
            .await;

        let client = OllamaGenerator::new(server.base_url(), "mistral");
        let text = client.generate("suggest", &sampling()).await.unwrap();
        assert_eq!(text, "1. A?\n2. B?");
    }

    #[tokio::test]
    async fn http_error_is_a_request_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("model not loaded");
            })
            .await;

        let client = OllamaGenerator::new(server.base_url(), "mistral");
        let error = client.generate("hi", &sampling()).await.unwrap_err();
        assert!(matches!(error, LlmClientError::Request(_)));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn in_band_error_surfaces_as_stream_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200)
                    .body("{\"error\":\"context length exceeded\"}\n");
            })
            .await;

        let client = OllamaGenerator::new(server.base_url(), "mistral");
        let mut stream = client.generate_stream("hi", &sampling()).await.unwrap();
        let error = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(error, LlmClientError::Stream(_)));
    }

    #[tokio::test]
    async fn token_split_across_body_chunks_is_reassembled() {
        let server = MockServer::start_async().await;
        // httpmock delivers the body in one piece; this covers the case of a
        // line with no trailing newline before the connection closes.
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200)
                    .body("{\"response\":\"tail\",\"done\":false}");
            })
            .await;

        let client = OllamaGenerator::new(server.base_url(), "mistral");
        let mut stream = client.generate_stream("hi", &sampling()).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "tail");
        assert!(stream.next().await.is_none());
    }
}
