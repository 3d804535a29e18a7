//! Pipeline configuration and validation.
//!
//! All knobs are collected into an explicit [`Config`] value handed to the
//! service at construction; sampling parameters travel as [`SamplingConfig`]
//! values passed into each generation call, so concurrent turns never observe
//! a half-updated setting. Every range check happens here, at configuration
//! time, never mid-operation.

use serde::Deserialize;
use std::env;
use thiserror::Error;

/// Errors raised while building or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Chunk overlap must be strictly smaller than the chunk size.
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge {
        /// Configured chunk size in characters.
        chunk_size: usize,
        /// Configured overlap in characters.
        overlap: usize,
    },
    /// A numeric setting was zero or otherwise out of its valid range.
    #[error("{name} must be {requirement}, got {value}")]
    OutOfRange {
        /// Name of the offending setting.
        name: &'static str,
        /// Human-readable constraint.
        requirement: &'static str,
        /// Value that failed validation.
        value: String,
    },
}

/// Sampling parameters for one generation call.
///
/// Answer generation and suggestion generation use distinct values; the
/// suggestion pass runs hotter to diversify the questions it proposes.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    /// Softmax temperature, `0.0..=2.0`.
    pub temperature: f32,
    /// Nucleus sampling mass, `0.0 < top_p <= 1.0`.
    pub top_p: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: usize,
}

impl SamplingConfig {
    /// Verify all parameters are inside their valid ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::OutOfRange {
                name: "temperature",
                requirement: "within 0.0..=2.0",
                value: self.temperature.to_string(),
            });
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ConfigError::OutOfRange {
                name: "top_p",
                requirement: "within (0.0, 1.0]",
                value: self.top_p.to_string(),
            });
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::OutOfRange {
                name: "max_tokens",
                requirement: "greater than zero",
                value: "0".into(),
            });
        }
        Ok(())
    }
}

/// Runtime configuration for the answer pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Chunk window size in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Dimensionality of embedding vectors.
    pub embedding_dimension: usize,
    /// Maximum texts per embedding request.
    pub embedding_batch_size: usize,
    /// Chunks returned per retrieval.
    pub retrieve_top_k: usize,
    /// Over-fetch multiplier applied before dedupe and truncation.
    pub retrieve_overfetch: usize,
    /// Minimum cosine similarity a hit must clear to be retained.
    pub min_score: f32,
    /// Score gap under which adjacent chunks count as near-duplicates.
    pub dedupe_epsilon: f32,
    /// Maximum generations in flight at once; requests beyond the limit are
    /// rejected with a backpressure error.
    pub max_concurrent_generations: usize,
    /// Context window of the generation capability, in tokens.
    pub context_window_tokens: usize,
    /// Instructions prepended to every assembled prompt.
    pub system_prompt: String,
    /// Sampling used for answer generation.
    pub answer_sampling: SamplingConfig,
    /// Sampling used for the follow-up suggestion pass.
    pub suggestion_sampling: SamplingConfig,
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a support assistant. Answer using only the provided \
documentation and cite the chunks you rely on with bracketed numbers such as [1]. Include images \
using markdown: ![description](filename)";

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            embedding_dimension: 768,
            embedding_batch_size: 32,
            retrieve_top_k: 5,
            retrieve_overfetch: 3,
            min_score: 0.25,
            dedupe_epsilon: 0.05,
            max_concurrent_generations: 4,
            context_window_tokens: 4096,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            answer_sampling: SamplingConfig {
                temperature: 0.7,
                top_p: 1.0,
                max_tokens: 1500,
            },
            suggestion_sampling: SamplingConfig {
                temperature: 0.9,
                top_p: 1.0,
                max_tokens: 256,
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Some(value) = load_env_optional("RAGPIPE_CHUNK_SIZE") {
            config.chunk_size = parse(&value, "RAGPIPE_CHUNK_SIZE")?;
        }
        if let Some(value) = load_env_optional("RAGPIPE_CHUNK_OVERLAP") {
            config.chunk_overlap = parse(&value, "RAGPIPE_CHUNK_OVERLAP")?;
        }
        if let Some(value) = load_env_optional("RAGPIPE_EMBEDDING_DIMENSION") {
            config.embedding_dimension = parse(&value, "RAGPIPE_EMBEDDING_DIMENSION")?;
        }
        if let Some(value) = load_env_optional("RAGPIPE_EMBEDDING_BATCH_SIZE") {
            config.embedding_batch_size = parse(&value, "RAGPIPE_EMBEDDING_BATCH_SIZE")?;
        }
        if let Some(value) = load_env_optional("RAGPIPE_TOP_K") {
            config.retrieve_top_k = parse(&value, "RAGPIPE_TOP_K")?;
        }
        if let Some(value) = load_env_optional("RAGPIPE_MIN_SCORE") {
            config.min_score = parse(&value, "RAGPIPE_MIN_SCORE")?;
        }
        if let Some(value) = load_env_optional("RAGPIPE_MAX_CONCURRENT_GENERATIONS") {
            config.max_concurrent_generations =
                parse(&value, "RAGPIPE_MAX_CONCURRENT_GENERATIONS")?;
        }
        if let Some(value) = load_env_optional("RAGPIPE_CONTEXT_WINDOW_TOKENS") {
            config.context_window_tokens = parse(&value, "RAGPIPE_CONTEXT_WINDOW_TOKENS")?;
        }
        if let Some(value) = load_env_optional("RAGPIPE_SYSTEM_PROMPT") {
            config.system_prompt = value;
        }
        if let Some(value) = load_env_optional("RAGPIPE_TEMPERATURE") {
            config.answer_sampling.temperature = parse(&value, "RAGPIPE_TEMPERATURE")?;
        }
        if let Some(value) = load_env_optional("RAGPIPE_TOP_P") {
            config.answer_sampling.top_p = parse(&value, "RAGPIPE_TOP_P")?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate every setting, including both sampling configurations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::OutOfRange {
                name: "chunk_size",
                requirement: "greater than zero",
                value: "0".into(),
            });
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap: self.chunk_overlap,
            });
        }
        let positive = [
            ("embedding_dimension", self.embedding_dimension),
            ("embedding_batch_size", self.embedding_batch_size),
            ("retrieve_top_k", self.retrieve_top_k),
            ("retrieve_overfetch", self.retrieve_overfetch),
            ("max_concurrent_generations", self.max_concurrent_generations),
            ("context_window_tokens", self.context_window_tokens),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    name,
                    requirement: "greater than zero",
                    value: "0".into(),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(ConfigError::OutOfRange {
                name: "min_score",
                requirement: "within 0.0..=1.0",
                value: self.min_score.to_string(),
            });
        }
        if self.dedupe_epsilon < 0.0 {
            return Err(ConfigError::OutOfRange {
                name: "dedupe_epsilon",
                requirement: "non-negative",
                value: self.dedupe_epsilon.to_string(),
            });
        }
        self.answer_sampling.validate()?;
        self.suggestion_sampling.validate()?;
        if self.answer_sampling.max_tokens >= self.context_window_tokens {
            return Err(ConfigError::OutOfRange {
                name: "answer_sampling.max_tokens",
                requirement: "smaller than context_window_tokens",
                value: self.answer_sampling.max_tokens.to_string(),
            });
        }
        Ok(())
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().expect("defaults validate");
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let mut config = Config::default();
        config.chunk_overlap = config.chunk_size;
        let error = config.validate().unwrap_err();
        assert!(matches!(error, ConfigError::OverlapTooLarge { .. }));
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut config = Config::default();
        config.answer_sampling.temperature = 2.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_top_p() {
        let sampling = SamplingConfig {
            temperature: 0.7,
            top_p: 0.0,
            max_tokens: 100,
        };
        assert!(sampling.validate().is_err());
    }

    #[test]
    fn rejects_answer_budget_exceeding_window() {
        let mut config = Config::default();
        config.answer_sampling.max_tokens = config.context_window_tokens;
        assert!(config.validate().is_err());
    }
}
