//! The pipeline facade: ingestion, answering, feedback, gap analysis.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::{
    chunker::Chunker,
    config::{Config, ConfigError},
    embedding::{BatchedEmbedder, EmbeddingClient, EmbeddingClientError},
    generation::LlmClient,
    index::{EmbeddedChunk, IndexError, VectorIndex},
    metrics::{MetricsSnapshot, PipelineMetrics},
    prompt::PromptAssembler,
    retriever::{Retriever, RetrieverSettings},
    store::{DocumentStore, QueryStore, StoreError},
    suggest::SuggestionGenerator,
    turn::{self, AnswerError, AnswerStream, TurnDeps},
    types::{
        ChunkRecord, Document, DocumentId, ExtractedDocument, QueryId, QueryRecord, Rating,
        chunk_id,
    },
};

/// External capabilities the service is built over.
pub struct Capabilities {
    /// Embedding provider.
    pub embedder: Arc<dyn EmbeddingClient>,
    /// Vector index backend.
    pub index: Arc<dyn VectorIndex>,
    /// Generation backend.
    pub llm: Arc<dyn LlmClient>,
    /// Document metadata store.
    pub documents: Arc<dyn DocumentStore>,
    /// Query history store.
    pub queries: Arc<dyn QueryStore>,
}

/// Errors raised while constructing the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The index backend failed during startup recovery.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// The metadata store failed during startup recovery.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by document ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A document with this name already exists or is currently ingesting.
    #[error("a document named {0:?} already exists")]
    Conflict(String),
    /// The extracted document contained no text to chunk.
    #[error("document contained no text")]
    EmptyDocument,
    /// Embedding the chunks failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Writing to the vector index failed.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Writing document metadata failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by document deletion.
#[derive(Debug, Error)]
pub enum DeleteError {
    /// The metadata store failed or the document does not exist.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Removing index entries failed.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Result of a successful ingestion.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// Identifier assigned to the document.
    pub document_id: DocumentId,
    /// Number of chunks indexed.
    pub chunk_count: usize,
    /// Number of images anchored in the document.
    pub image_count: usize,
}

/// Result of a successful deletion.
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    /// Number of index entries removed.
    pub chunks_deleted: usize,
    /// Number of distinct images that belonged to the document.
    pub images_deleted: usize,
}

/// The answer pipeline.
///
/// One instance serves concurrent ingestions and answer turns; answer
/// concurrency is capped by `max_concurrent_generations`, beyond which
/// [`RagService::answer`] returns [`AnswerError::Busy`] instead of queueing.
pub struct RagService {
    config: Config,
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    documents: Arc<dyn DocumentStore>,
    queries: Arc<dyn QueryStore>,
    metrics: Arc<PipelineMetrics>,
    turn_deps: Arc<TurnDeps>,
    generation_slots: Arc<Semaphore>,
    ingests_in_flight: Arc<Mutex<HashSet<String>>>,
}

impl RagService {
    /// Build the service and run startup recovery.
    ///
    /// Documents left inactive by an interrupted ingestion are swept from
    /// both the index and the store before the service accepts work.
    pub async fn new(config: Config, capabilities: Capabilities) -> Result<Self, ServiceError> {
        config.validate()?;
        if capabilities.embedder.dimension() != config.embedding_dimension {
            return Err(ServiceError::Config(ConfigError::OutOfRange {
                name: "embedding_dimension",
                requirement: "equal to the embedding provider's dimension",
                value: config.embedding_dimension.to_string(),
            }));
        }

        let embedder: Arc<dyn EmbeddingClient> = Arc::new(BatchedEmbedder::new(
            capabilities.embedder,
            config.embedding_batch_size,
        ));
        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap)?;
        let metrics = Arc::new(PipelineMetrics::new());

        let retriever = Retriever::new(
            embedder.clone(),
            capabilities.index.clone(),
            RetrieverSettings {
                overfetch: config.retrieve_overfetch,
                min_score: config.min_score,
                dedupe_epsilon: config.dedupe_epsilon,
            },
        );
        let assembler = PromptAssembler::new(
            config.system_prompt.clone(),
            config.context_window_tokens,
            config.answer_sampling.max_tokens,
        );
        let suggester = SuggestionGenerator::new(
            capabilities.llm.clone(),
            config.suggestion_sampling.clone(),
        );
        let turn_deps = Arc::new(TurnDeps {
            retriever,
            assembler,
            suggester,
            llm: capabilities.llm,
            queries: capabilities.queries.clone(),
            answer_sampling: config.answer_sampling.clone(),
            top_k: config.retrieve_top_k,
            metrics: metrics.clone(),
        });

        let service = Self {
            generation_slots: Arc::new(Semaphore::new(config.max_concurrent_generations)),
            config,
            chunker,
            embedder,
            index: capabilities.index,
            documents: capabilities.documents,
            queries: capabilities.queries,
            metrics,
            turn_deps,
            ingests_in_flight: Arc::new(Mutex::new(HashSet::new())),
        };
        service.sweep_orphans().await?;
        Ok(service)
    }

    /// Remove documents whose ingestion never reached the publish step.
    async fn sweep_orphans(&self) -> Result<(), ServiceError> {
        let mut swept = 0usize;
        for document in self.documents.list_documents().await? {
            if document.active {
                continue;
            }
            self.index.delete_by_document(document.id).await?;
            self.documents.delete_document(document.id).await?;
            swept += 1;
            tracing::warn!(
                document = %document.name,
                document_id = %document.id,
                "Swept half-ingested document at startup"
            );
        }
        if swept > 0 {
            tracing::info!(swept, "Startup recovery complete");
        }
        Ok(())
    }

    /// Ingest a pre-extracted document under the given name.
    ///
    /// The document becomes visible to retrieval only once every chunk is
    /// indexed and its metadata is stored; a failure at any step rolls back
    /// everything written so far.
    pub async fn ingest_document(
        &self,
        name: &str,
        extracted: ExtractedDocument,
    ) -> Result<IngestOutcome, IngestError> {
        let _slot = IngestSlot::claim(&self.ingests_in_flight, name)
            .ok_or_else(|| IngestError::Conflict(name.to_string()))?;
        if self.documents.find_by_name(name).await?.is_some() {
            return Err(IngestError::Conflict(name.to_string()));
        }

        let drafts = self.chunker.chunk(&extracted);
        if drafts.is_empty() {
            return Err(IngestError::EmptyDocument);
        }

        let document_id = Uuid::new_v4();
        let outcome = IngestOutcome {
            document_id,
            chunk_count: drafts.len(),
            image_count: extracted.images.len(),
        };
        let record = Document {
            id: document_id,
            name: name.to_string(),
            size_bytes: extracted.full_text().len() as u64,
            uploaded_at: OffsetDateTime::now_utc(),
            active: false,
            chunk_count: drafts.len(),
            image_count: extracted.images.len(),
        };
        self.documents.insert_document(record).await?;

        if let Err(error) = self.index_chunks(document_id, name, drafts).await {
            self.rollback_ingest(document_id, name).await;
            return Err(error);
        }

        self.metrics.record_ingest(outcome.chunk_count as u64);
        tracing::info!(
            document = name,
            document_id = %document_id,
            chunks = outcome.chunk_count,
            images = outcome.image_count,
            "Document ingested"
        );
        Ok(outcome)
    }

    /// Embed, index and publish the chunks of one document.
    async fn index_chunks(
        &self,
        document_id: DocumentId,
        name: &str,
        drafts: Vec<crate::chunker::ChunkDraft>,
    ) -> Result<(), IngestError> {
        let texts: Vec<String> = drafts.iter().map(|draft| draft.text.clone()).collect();
        let vectors = self.embedder.embed(texts).await?;

        let mut embedded = Vec::with_capacity(drafts.len());
        let mut records = Vec::with_capacity(drafts.len());
        for (draft, vector) in drafts.into_iter().zip(vectors) {
            let id = chunk_id(document_id, draft.ordinal);
            records.push(ChunkRecord {
                id: id.clone(),
                document_id,
                ordinal: draft.ordinal,
                text: draft.text.clone(),
                page: draft.page,
                images: draft.images.clone(),
                token_len: draft.token_len,
            });
            embedded.push(EmbeddedChunk {
                id,
                document_id,
                document: name.to_string(),
                ordinal: draft.ordinal,
                text: draft.text,
                page: draft.page,
                images: draft.images,
                token_len: draft.token_len,
                vector,
            });
        }

        self.index.upsert(document_id, embedded).await?;
        self.documents.put_chunks(document_id, records).await?;

        // Publish: metadata first, index last, so retrieval never sees a
        // document whose record is still missing.
        self.documents.set_active(document_id, true).await?;
        self.index.set_document_active(document_id, true).await?;
        Ok(())
    }

    /// Undo a failed ingestion. Rollback failures are logged, not returned;
    /// the startup sweep catches whatever is left behind.
    async fn rollback_ingest(&self, document_id: DocumentId, name: &str) {
        if let Err(error) = self.index.delete_by_document(document_id).await {
            tracing::warn!(document = name, error = %error, "Ingest rollback: index cleanup failed");
        }
        if let Err(error) = self.documents.delete_document(document_id).await {
            tracing::warn!(document = name, error = %error, "Ingest rollback: store cleanup failed");
        }
    }

    /// Delete a document and everything derived from it.
    ///
    /// The document is unpublished first, so retrieval stops seeing it before
    /// any data is removed. Existing answer turns keep their already-retrieved
    /// context.
    pub async fn delete_document(&self, id: DocumentId) -> Result<DeleteOutcome, DeleteError> {
        let document = self.documents.get_document(id).await?;
        self.documents.set_active(id, false).await?;
        self.index.set_document_active(id, false).await?;

        let chunks_deleted = self.index.delete_by_document(id).await?;
        self.documents.delete_document(id).await?;

        tracing::info!(
            document = %document.name,
            document_id = %id,
            chunks_deleted,
            "Document deleted"
        );
        Ok(DeleteOutcome {
            chunks_deleted,
            images_deleted: document.image_count,
        })
    }

    /// List ingested documents visible to retrieval, oldest first.
    pub async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .documents
            .list_documents()
            .await?
            .into_iter()
            .filter(|document| document.active)
            .collect())
    }

    /// Start an answer turn for a query.
    ///
    /// Returns the turn's event stream immediately; dropping the stream
    /// cancels the turn and frees its generation slot.
    pub fn answer(&self, query: &str) -> Result<AnswerStream, AnswerError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AnswerError::EmptyQuery);
        }
        let permit = self
            .generation_slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| AnswerError::Busy)?;
        Ok(turn::run_turn(
            self.turn_deps.clone(),
            permit,
            query.to_string(),
        ))
    }

    /// Record user feedback on a completed turn, overwriting any prior rating.
    pub async fn rate(&self, id: QueryId, rating: Rating) -> Result<(), StoreError> {
        self.queries.set_rating(id, rating).await?;
        tracing::info!(query_id = %id, rating = ?rating, "Feedback recorded");
        Ok(())
    }

    /// Fetch a persisted turn record.
    pub async fn get_query(&self, id: QueryId) -> Result<QueryRecord, StoreError> {
        self.queries.get_query(id).await
    }

    /// Queries rated bad, newest first. Each record carries the answer and
    /// sources exactly as they were delivered.
    pub async fn list_gaps(&self) -> Result<Vec<QueryRecord>, StoreError> {
        self.queries.list_gaps().await
    }

    /// Current pipeline counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The configuration the service was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Holds a document name in the in-flight set for the duration of an ingest.
struct IngestSlot<'a> {
    names: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> IngestSlot<'a> {
    fn claim(names: &'a Mutex<HashSet<String>>, name: &str) -> Option<Self> {
        let mut held = names.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !held.insert(name.to_string()) {
            return None;
        }
        Some(Self {
            names,
            name: name.to_string(),
        })
    }
}

impl Drop for IngestSlot<'_> {
    fn drop(&mut self) {
        let mut held = self
            .names
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SamplingConfig,
        embedding::HashEmbedder,
        generation::{LlmClientError, TokenStream},
        index::MemoryIndex,
        store::{MemoryDocumentStore, MemoryQueryStore},
        types::{ExtractedPage, ImageAnchor},
    };
    use async_trait::async_trait;

    struct NullLlm;

    #[async_trait]
    impl LlmClient for NullLlm {
        async fn generate_stream(
            &self,
            _prompt: &str,
            _sampling: &SamplingConfig,
        ) -> Result<TokenStream, LlmClientError> {
            Ok(Box::pin(futures_util::stream::empty()))
        }

        async fn generate(
            &self,
            _prompt: &str,
            _sampling: &SamplingConfig,
        ) -> Result<String, LlmClientError> {
            Ok(String::new())
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.embedding_dimension = 32;
        config.chunk_size = 40;
        config.chunk_overlap = 10;
        config
    }

    async fn service_with(documents: Arc<MemoryDocumentStore>) -> RagService {
        let capabilities = Capabilities {
            embedder: Arc::new(HashEmbedder::new(32)),
            index: Arc::new(MemoryIndex::new()),
            llm: Arc::new(NullLlm),
            documents,
            queries: Arc::new(MemoryQueryStore::new()),
        };
        RagService::new(test_config(), capabilities)
            .await
            .expect("service builds")
    }

    fn one_page(text: &str) -> ExtractedDocument {
        ExtractedDocument {
            pages: vec![ExtractedPage {
                number: 1,
                text: text.into(),
            }],
            images: Vec::new(),
        }
    }

    #[tokio::test]
    async fn empty_document_is_rejected() {
        let service = service_with(Arc::new(MemoryDocumentStore::new())).await;
        let error = service
            .ingest_document("empty.pdf", ExtractedDocument::default())
            .await
            .unwrap_err();
        assert!(matches!(error, IngestError::EmptyDocument));
    }

    #[tokio::test]
    async fn duplicate_name_conflicts() {
        let service = service_with(Arc::new(MemoryDocumentStore::new())).await;
        service
            .ingest_document("manual.pdf", one_page("restart the printer and retry"))
            .await
            .unwrap();
        let error = service
            .ingest_document("manual.pdf", one_page("different content entirely"))
            .await
            .unwrap_err();
        assert!(matches!(error, IngestError::Conflict(_)));
    }

    #[tokio::test]
    async fn startup_sweeps_inactive_documents() {
        let documents = Arc::new(MemoryDocumentStore::new());
        documents
            .insert_document(Document {
                id: Uuid::new_v4(),
                name: "stale.pdf".into(),
                size_bytes: 10,
                uploaded_at: OffsetDateTime::now_utc(),
                active: false,
                chunk_count: 3,
                image_count: 0,
            })
            .await
            .unwrap();

        let service = service_with(documents).await;
        assert!(service.list_documents().await.unwrap().is_empty());
        assert!(
            service
                .documents
                .find_by_name("stale.pdf")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn delete_reports_chunk_and_image_counts() {
        let service = service_with(Arc::new(MemoryDocumentStore::new())).await;
        let extracted = ExtractedDocument {
            pages: vec![ExtractedPage {
                number: 1,
                text: "a".repeat(100),
            }],
            images: vec![ImageAnchor {
                filename: "diagram.png".into(),
                offset: 5,
            }],
        };
        let outcome = service.ingest_document("manual.pdf", extracted).await.unwrap();
        assert!(outcome.chunk_count > 1);

        let deleted = service.delete_document(outcome.document_id).await.unwrap();
        assert_eq!(deleted.chunks_deleted, outcome.chunk_count);
        assert_eq!(deleted.images_deleted, 1);
        assert!(service.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_unknown_document_is_not_found() {
        let service = service_with(Arc::new(MemoryDocumentStore::new())).await;
        let error = service.delete_document(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            error,
            DeleteError::Store(StoreError::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn blank_query_is_rejected_without_taking_a_slot() {
        let service = service_with(Arc::new(MemoryDocumentStore::new())).await;
        let error = service.answer("   ").err().unwrap();
        assert!(matches!(error, AnswerError::EmptyQuery));
        assert_eq!(
            service.generation_slots.available_permits(),
            test_config().max_concurrent_generations
        );
    }
}
