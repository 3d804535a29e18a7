//! One answer turn: retrieve, assemble, stream, finalize, persist.
//!
//! A turn runs as a single event stream. Content events flow while the model
//! generates; once generation ends the turn is finalized into sources, images
//! and suggestions, persisted, and closed with a terminal summary event.
//! Dropping the stream mid-turn cancels the generation and discards the turn
//! without writing a query record.

use std::{pin::Pin, sync::Arc, time::Instant};

use async_stream::try_stream;
use futures_core::Stream;
use futures_util::StreamExt;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::OwnedSemaphorePermit;
use uuid::Uuid;

use crate::{
    config::SamplingConfig,
    generation::{LlmClient, LlmClientError},
    index::ScoredChunk,
    metrics::PipelineMetrics,
    prompt::PromptAssembler,
    retriever::{RetrieveError, Retriever},
    store::{QueryStore, StoreError},
    suggest::SuggestionGenerator,
    types::{QueryId, QueryRecord, SourceRef},
};

/// Errors that abort an answer turn.
#[derive(Debug, Error)]
pub enum AnswerError {
    /// The query was empty after trimming.
    #[error("query must not be empty")]
    EmptyQuery,
    /// Every generation slot is taken; retry later.
    #[error("all generation slots are busy")]
    Busy,
    /// Retrieval failed before generation started.
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
    /// The generation backend failed.
    #[error(transparent)]
    Llm(#[from] LlmClientError),
    /// The completed turn could not be persisted.
    #[error("failed to persist turn: {0}")]
    Store(#[from] StoreError),
}

impl AnswerError {
    /// Whether retrying the turn may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EmptyQuery => false,
            Self::Busy => true,
            Self::Retrieve(error) => error.is_retryable(),
            Self::Llm(error) => error.is_retryable(),
            Self::Store(_) => false,
        }
    }
}

/// Terminal summary carried by [`AnswerEvent::Done`].
#[derive(Debug, Clone)]
pub struct TurnSummary {
    /// Identifier of the persisted query record.
    pub query_id: QueryId,
    /// Number of chunks that backed the prompt.
    pub chunks_retrieved: usize,
    /// Wall-clock duration of the turn in milliseconds.
    pub latency_ms: u64,
}

/// Events emitted over the course of one answer turn, in order: zero or more
/// `Content` events, then `Sources`, `Images`, `Suggestions`, and `Done`.
#[derive(Debug, Clone)]
pub enum AnswerEvent {
    /// An incremental piece of the answer text.
    Content(String),
    /// Distinct cited (document, page) pairs in first-citation order.
    Sources(Vec<SourceRef>),
    /// Images inherited from cited chunks, in first-citation order.
    Images(Vec<String>),
    /// Follow-up questions, possibly empty.
    Suggestions(Vec<String>),
    /// The turn finished and was persisted.
    Done(TurnSummary),
}

/// The event stream of one answer turn.
pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<AnswerEvent, AnswerError>> + Send>>;

/// Everything a turn needs, bundled so the stream can own it.
pub(crate) struct TurnDeps {
    pub retriever: Retriever,
    pub assembler: PromptAssembler,
    pub suggester: SuggestionGenerator,
    pub llm: Arc<dyn LlmClient>,
    pub queries: Arc<dyn QueryStore>,
    pub answer_sampling: SamplingConfig,
    pub top_k: usize,
    pub metrics: Arc<PipelineMetrics>,
}

/// Records the turn outcome in metrics exactly once, treating a dropped
/// stream the same as a failed one.
struct TurnGuard {
    metrics: Arc<PipelineMetrics>,
    completed: bool,
}

impl TurnGuard {
    fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            metrics,
            completed: false,
        }
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.metrics.record_turn(self.completed);
    }
}

/// Run one answer turn. The semaphore permit is owned by the returned stream,
/// so dropping the stream releases the generation slot immediately.
pub(crate) fn run_turn(
    deps: Arc<TurnDeps>,
    permit: OwnedSemaphorePermit,
    query: String,
) -> AnswerStream {
    Box::pin(try_stream! {
        let _permit = permit;
        let started = Instant::now();
        let asked_at = OffsetDateTime::now_utc();
        let query_id = Uuid::new_v4();
        let mut guard = TurnGuard::new(deps.metrics.clone());

        tracing::info!(query_id = %query_id, "Turn started: retrieving context");
        let chunks = deps.retriever.retrieve(&query, deps.top_k).await?;
        let prompt = deps.assembler.assemble(&query, chunks);
        tracing::debug!(
            query_id = %query_id,
            chunks = prompt.chunks.len(),
            no_context = prompt.no_context,
            "Prompt assembled, generating"
        );

        let mut tokens = deps
            .llm
            .generate_stream(&prompt.text, &deps.answer_sampling)
            .await?;
        let mut answer = String::new();
        while let Some(token) = tokens.next().await {
            let token = token?;
            answer.push_str(&token);
            yield AnswerEvent::Content(token);
        }
        drop(tokens);

        tracing::debug!(query_id = %query_id, answer_len = answer.len(), "Finalizing turn");
        let cited = finalize_citations(&answer, &prompt.chunks);
        yield AnswerEvent::Sources(cited.sources.clone());
        yield AnswerEvent::Images(cited.images.clone());

        let suggestions = deps.suggester.suggest(&query, &answer).await;
        yield AnswerEvent::Suggestions(suggestions.clone());

        let latency_ms = started.elapsed().as_millis() as u64;
        let record = QueryRecord {
            id: query_id,
            asked_at,
            query,
            chunk_ids: prompt.chunks.iter().map(|chunk| chunk.id.clone()).collect(),
            answer,
            sources: cited.sources,
            images: cited.images,
            suggestions,
            rating: None,
            latency_ms,
        };
        deps.queries.save_query(record).await?;
        guard.complete();

        tracing::info!(query_id = %query_id, latency_ms, "Turn complete");
        yield AnswerEvent::Done(TurnSummary {
            query_id,
            chunks_retrieved: prompt.chunks.len(),
            latency_ms,
        });
    })
}

struct CitedRefs {
    sources: Vec<SourceRef>,
    images: Vec<String>,
}

/// Resolve bracketed citation groups like `[1]` or `[2, 3]` against the
/// prompt's chunk numbering.
///
/// A group is honored only if every segment parses as a number inside the
/// valid range; hallucinated or malformed groups are dropped without error.
/// Sources and images follow first-citation order, deduplicated.
fn finalize_citations(answer: &str, chunks: &[ScoredChunk]) -> CitedRefs {
    let mut sources: Vec<SourceRef> = Vec::new();
    let mut images: Vec<String> = Vec::new();

    for citation in citation_numbers(answer, chunks.len()) {
        let chunk = &chunks[citation - 1];
        let source = SourceRef {
            document: chunk.document.clone(),
            page: chunk.page,
        };
        if !sources.contains(&source) {
            sources.push(source);
        }
        for image in &chunk.images {
            if !images.contains(image) {
                images.push(image.clone());
            }
        }
    }

    CitedRefs { sources, images }
}

/// Citation numbers in order of appearance, groups with any invalid segment
/// skipped entirely.
fn citation_numbers(answer: &str, chunk_count: usize) -> Vec<usize> {
    let mut numbers = Vec::new();
    let mut rest = answer;
    while let Some(open) = rest.find('[') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find(']') else {
            break;
        };
        let inner = &rest[..close];
        rest = &rest[close + 1..];

        let parsed: Option<Vec<usize>> = inner
            .split(',')
            .map(|segment| {
                segment
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|n| (1..=chunk_count).contains(n))
            })
            .collect();
        if let Some(group) = parsed {
            numbers.extend(group);
        }
    }
    numbers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::chunk_id;

    fn chunk(ordinal: usize, document: &str, page: u32, images: Vec<&str>) -> ScoredChunk {
        let doc = Uuid::nil();
        ScoredChunk {
            id: chunk_id(doc, ordinal),
            document_id: doc,
            document: document.into(),
            ordinal,
            text: format!("chunk {ordinal}"),
            page,
            images: images.into_iter().map(String::from).collect(),
            token_len: 2,
            score: 0.9,
        }
    }

    #[test]
    fn resolves_single_and_grouped_citations() {
        let chunks = vec![
            chunk(0, "manual.pdf", 3, vec!["jam.png"]),
            chunk(1, "manual.pdf", 7, vec![]),
            chunk(2, "faq.pdf", 1, vec!["faq.png"]),
        ];
        let cited = finalize_citations("Open the tray [1], then reset [2, 3].", &chunks);
        assert_eq!(
            cited.sources,
            vec![
                SourceRef { document: "manual.pdf".into(), page: 3 },
                SourceRef { document: "manual.pdf".into(), page: 7 },
                SourceRef { document: "faq.pdf".into(), page: 1 },
            ]
        );
        assert_eq!(cited.images, vec!["jam.png", "faq.png"]);
    }

    #[test]
    fn out_of_range_citation_is_dropped() {
        let chunks = vec![chunk(0, "manual.pdf", 3, vec![])];
        let cited = finalize_citations("See [1] and also [9].", &chunks);
        assert_eq!(cited.sources.len(), 1);
        assert_eq!(cited.sources[0].page, 3);
    }

    #[test]
    fn group_with_any_invalid_segment_is_skipped_whole() {
        let chunks = vec![
            chunk(0, "manual.pdf", 3, vec![]),
            chunk(1, "manual.pdf", 7, vec![]),
        ];
        let cited = finalize_citations("Steps [1, note] then [2].", &chunks);
        assert_eq!(
            cited.sources,
            vec![SourceRef { document: "manual.pdf".into(), page: 7 }]
        );
    }

    #[test]
    fn repeated_citations_dedupe_in_first_appearance_order() {
        let chunks = vec![
            chunk(0, "manual.pdf", 3, vec!["a.png"]),
            chunk(1, "faq.pdf", 1, vec!["a.png", "b.png"]),
        ];
        let cited = finalize_citations("[2] then [1] then [2] again.", &chunks);
        assert_eq!(cited.sources[0].document, "faq.pdf");
        assert_eq!(cited.sources[1].document, "manual.pdf");
        assert_eq!(cited.sources.len(), 2);
        assert_eq!(cited.images, vec!["a.png", "b.png"]);
    }

    #[test]
    fn same_document_and_page_counts_once() {
        let chunks = vec![
            chunk(0, "manual.pdf", 3, vec![]),
            chunk(1, "manual.pdf", 3, vec![]),
        ];
        let cited = finalize_citations("[1][2]", &chunks);
        assert_eq!(cited.sources.len(), 1);
    }

    #[test]
    fn answer_without_citations_yields_nothing() {
        let chunks = vec![chunk(0, "manual.pdf", 3, vec!["a.png"])];
        let cited = finalize_citations("No direct solution was found.", &chunks);
        assert!(cited.sources.is_empty());
        assert!(cited.images.is_empty());
    }
}
