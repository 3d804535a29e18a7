//! Text generation capability trait and its streaming surface.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use thiserror::Error;

use crate::config::SamplingConfig;

/// Ollama-backed generation client.
pub mod ollama;

pub use ollama::OllamaGenerator;

/// Errors emitted by generation backends.
#[derive(Debug, Error)]
pub enum LlmClientError {
    /// The generation request could not be issued or was rejected.
    #[error("Generation request failed: {0}")]
    Request(String),
    /// The token stream broke mid-generation.
    #[error("Generation stream failed: {0}")]
    Stream(String),
}

impl LlmClientError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        // Both variants cover transient provider conditions.
        true
    }
}

/// Incremental tokens produced by a streaming generation call.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmClientError>> + Send>>;

/// Capability trait for the language model backing answers and suggestions.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Start a streaming generation and return its token stream.
    ///
    /// Dropping the returned stream abandons the generation; implementations
    /// must not require the stream to be polled to completion.
    async fn generate_stream(
        &self,
        prompt: &str,
        sampling: &SamplingConfig,
    ) -> Result<TokenStream, LlmClientError>;

    /// Run a generation to completion and return the full text.
    async fn generate(
        &self,
        prompt: &str,
        sampling: &SamplingConfig,
    ) -> Result<String, LlmClientError>;
}
