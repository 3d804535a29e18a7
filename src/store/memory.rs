//! In-memory reference implementations of the persistence traits.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DocumentStore, QueryStore, StoreError};
use crate::types::{ChunkRecord, Document, DocumentId, QueryId, QueryRecord, Rating};

/// Document metadata store held in process memory.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<DocumentId, Document>>,
    chunks: RwLock<HashMap<DocumentId, Vec<ChunkRecord>>>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk metadata stored for a document, empty when unknown.
    pub async fn chunks_of(&self, id: DocumentId) -> Vec<ChunkRecord> {
        self.chunks
            .read()
            .await
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert_document(&self, document: Document) -> Result<(), StoreError> {
        self.documents
            .write()
            .await
            .insert(document.id, document);
        Ok(())
    }

    async fn get_document(&self, id: DocumentId) -> Result<Document, StoreError> {
        self.documents
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::DocumentNotFound(id))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Document>, StoreError> {
        Ok(self
            .documents
            .read()
            .await
            .values()
            .find(|document| document.name == name)
            .cloned())
    }

    async fn set_active(&self, id: DocumentId, active: bool) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(&id)
            .ok_or(StoreError::DocumentNotFound(id))?;
        document.active = active;
        Ok(())
    }

    async fn put_chunks(&self, id: DocumentId, chunks: Vec<ChunkRecord>) -> Result<(), StoreError> {
        self.chunks.write().await.insert(id, chunks);
        Ok(())
    }

    async fn delete_document(&self, id: DocumentId) -> Result<(), StoreError> {
        self.chunks.write().await.remove(&id);
        self.documents
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::DocumentNotFound(id))
    }

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        let mut documents: Vec<Document> =
            self.documents.read().await.values().cloned().collect();
        documents.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(documents)
    }
}

/// Query history store held in process memory.
#[derive(Default)]
pub struct MemoryQueryStore {
    queries: RwLock<HashMap<QueryId, QueryRecord>>,
}

impl MemoryQueryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueryStore for MemoryQueryStore {
    async fn save_query(&self, record: QueryRecord) -> Result<(), StoreError> {
        self.queries.write().await.insert(record.id, record);
        Ok(())
    }

    async fn get_query(&self, id: QueryId) -> Result<QueryRecord, StoreError> {
        self.queries
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::QueryNotFound(id))
    }

    async fn set_rating(&self, id: QueryId, rating: Rating) -> Result<(), StoreError> {
        let mut queries = self.queries.write().await;
        let record = queries.get_mut(&id).ok_or(StoreError::QueryNotFound(id))?;
        record.rating = Some(rating);
        Ok(())
    }

    async fn list_gaps(&self) -> Result<Vec<QueryRecord>, StoreError> {
        let mut gaps: Vec<QueryRecord> = self
            .queries
            .read()
            .await
            .values()
            .filter(|record| record.rating == Some(Rating::Bad))
            .cloned()
            .collect();
        gaps.sort_by(|a, b| b.asked_at.cmp(&a.asked_at));
        Ok(gaps)
    }
}
