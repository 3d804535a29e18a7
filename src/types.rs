//! Shared identifiers and domain records used across the pipeline.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier assigned to an ingested document.
pub type DocumentId = Uuid;

/// Unique identifier assigned to a chat turn's query record.
pub type QueryId = Uuid;

/// Identifier of a single chunk.
///
/// Chunk ids are `"{document_id}:{ordinal:05}"`, so lexicographic order equals
/// ordinal order within a document. Both index backends rely on this for the
/// deterministic ascending-id tie-break on equal scores.
pub type ChunkId = String;

/// Build the deterministic chunk id for a document ordinal.
pub fn chunk_id(document_id: DocumentId, ordinal: usize) -> ChunkId {
    format!("{document_id}:{ordinal:05}")
}

/// Metadata describing an ingested document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Identifier assigned at ingestion.
    pub id: DocumentId,
    /// Human-readable source name (typically the uploaded filename).
    pub name: String,
    /// Size of the extracted text in bytes.
    pub size_bytes: u64,
    /// When the document was ingested.
    pub uploaded_at: OffsetDateTime,
    /// Whether the document is visible to retrieval.
    pub active: bool,
    /// Number of chunks produced for the document.
    pub chunk_count: usize,
    /// Number of images anchored in the document.
    pub image_count: usize,
}

/// Chunk metadata persisted alongside the document record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Deterministic chunk identifier.
    pub id: ChunkId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Zero-based position of the chunk within the document.
    pub ordinal: usize,
    /// Chunk text content.
    pub text: String,
    /// Page containing the chunk's first character.
    pub page: u32,
    /// Image filenames anchored within (or preceding) this chunk, in order.
    pub images: Vec<String>,
    /// Token count of the chunk text.
    pub token_len: usize,
}

/// A (document, page) pair cited by a generated answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Source document name.
    pub document: String,
    /// Page number within the document.
    pub page: u32,
}

/// User verdict on a completed answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    /// The answer resolved the question.
    Good,
    /// The answer was unhelpful; the query counts as a knowledge gap.
    Bad,
}

/// Persisted record of one completed chat turn.
///
/// Records are written once when the turn finishes and are immutable except
/// for `rating`, which may be overwritten by later feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    /// Identifier of the turn.
    pub id: QueryId,
    /// When the query was asked.
    pub asked_at: OffsetDateTime,
    /// Original query text.
    pub query: String,
    /// Ids of the chunks used to assemble the prompt, in rank order.
    pub chunk_ids: Vec<ChunkId>,
    /// Full generated answer text.
    pub answer: String,
    /// Distinct cited (document, page) pairs in first-citation order.
    pub sources: Vec<SourceRef>,
    /// Images inherited from cited chunks, in first-citation order.
    pub images: Vec<String>,
    /// Follow-up questions offered with the answer.
    pub suggestions: Vec<String>,
    /// Latest user rating, if any.
    pub rating: Option<Rating>,
    /// Wall-clock duration of the turn in milliseconds.
    pub latency_ms: u64,
}

/// One page of pre-extracted document text.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    /// One-based page number.
    pub number: u32,
    /// Extracted text of the page.
    pub text: String,
}

/// An image extracted from the document, anchored at a character offset.
#[derive(Debug, Clone)]
pub struct ImageAnchor {
    /// Stored filename of the image.
    pub filename: String,
    /// Character offset of the anchor within the concatenated page text.
    pub offset: usize,
}

/// Pre-extracted document content handed to the ingestion pipeline.
///
/// Byte-level parsing happens upstream; the pipeline only sees ordered pages
/// and image anchors positioned in the concatenated text.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    /// Pages in reading order.
    pub pages: Vec<ExtractedPage>,
    /// Image anchors positioned in the concatenated page text.
    pub images: Vec<ImageAnchor>,
}

impl ExtractedDocument {
    /// Concatenated text of all pages in order.
    pub fn full_text(&self) -> String {
        self.pages.iter().map(|page| page.text.as_str()).collect()
    }
}
