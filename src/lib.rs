#![deny(missing_docs)]
//! Retrieval-augmented answer pipeline for pre-extracted documentation.
//!
//! The crate ingests documents as ordered pages with image anchors, chunks
//! them into overlapping character windows, embeds and indexes the chunks,
//! and answers queries by streaming a grounded, citation-numbered generation
//! over the retrieved context. Completed turns are persisted for feedback and
//! knowledge-gap analysis.
//!
//! [`RagService`] is the entry point; embedding, indexing, generation and
//! persistence are capability traits with in-process and REST-backed
//! implementations.

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod generation;
pub mod index;
pub mod logging;
pub mod metrics;
pub mod prompt;
pub mod retriever;
pub mod service;
pub mod store;
pub mod suggest;
pub mod turn;
pub mod types;

pub use config::{Config, ConfigError, SamplingConfig};
pub use service::{
    Capabilities, DeleteError, DeleteOutcome, IngestError, IngestOutcome, RagService,
    ServiceError,
};
pub use turn::{AnswerError, AnswerEvent, AnswerStream, TurnSummary};
pub use types::{Document, DocumentId, QueryId, QueryRecord, Rating, SourceRef};
