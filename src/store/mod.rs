//! Persistence capability traits for document metadata and query history.
//!
//! The pipeline writes to these sinks but does not own their schema
//! management; embedders of the crate plug in whatever storage they run. The
//! in-memory implementations in [`memory`] back the test suite and small
//! deployments.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ChunkRecord, Document, DocumentId, QueryId, QueryRecord, Rating};

/// In-memory store implementations.
pub mod memory;

pub use memory::{MemoryDocumentStore, MemoryQueryStore};

/// Errors returned by persistence backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No document exists with the given id.
    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),
    /// No query record exists with the given id.
    #[error("query {0} not found")]
    QueryNotFound(QueryId),
    /// The storage backend failed.
    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Document and chunk metadata storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document record.
    async fn insert_document(&self, document: Document) -> Result<(), StoreError>;

    /// Fetch a document by id.
    async fn get_document(&self, id: DocumentId) -> Result<Document, StoreError>;

    /// Find a document by name, if present.
    async fn find_by_name(&self, name: &str) -> Result<Option<Document>, StoreError>;

    /// Toggle a document's active flag.
    async fn set_active(&self, id: DocumentId, active: bool) -> Result<(), StoreError>;

    /// Store the chunk metadata for a document, replacing any prior set.
    async fn put_chunks(&self, id: DocumentId, chunks: Vec<ChunkRecord>) -> Result<(), StoreError>;

    /// Remove a document record and its chunk metadata.
    async fn delete_document(&self, id: DocumentId) -> Result<(), StoreError>;

    /// List every document record, active or not.
    async fn list_documents(&self) -> Result<Vec<Document>, StoreError>;
}

/// Query history storage.
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Persist a completed turn. Records are written once per turn.
    async fn save_query(&self, record: QueryRecord) -> Result<(), StoreError>;

    /// Fetch a turn record by id.
    async fn get_query(&self, id: QueryId) -> Result<QueryRecord, StoreError>;

    /// Overwrite the rating of an existing record.
    async fn set_rating(&self, id: QueryId, rating: Rating) -> Result<(), StoreError>;

    /// Return all records rated [`Rating::Bad`], newest first.
    async fn list_gaps(&self) -> Result<Vec<QueryRecord>, StoreError>;
}
