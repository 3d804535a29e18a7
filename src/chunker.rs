//! Sliding-window chunking with page attribution and image anchors.
//!
//! Chunks are exact character windows: every chunk except the last spans
//! exactly `chunk_size` characters, and consecutive chunks share exactly
//! `overlap` characters. Stripping the overlaps and concatenating the chunk
//! texts reconstructs the document verbatim, which keeps citation spans
//! stable across storage and retrieval. Windows advance over a scalar-value
//! view of the text, so multi-byte characters are never split.

use std::sync::Arc;

use tiktoken_rs::cl100k_base;

use crate::{
    config::ConfigError,
    types::{ExtractedDocument, ImageAnchor},
};

/// Shared token-counting closure used by the chunker and prompt assembler.
pub(crate) type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Build the shared token counter.
///
/// Prefers the `cl100k_base` BPE; when the encoding cannot be initialized the
/// counter falls back to whitespace tokenization so ingestion keeps flowing.
pub(crate) fn token_counter() -> TokenCounter {
    match cl100k_base() {
        Ok(encoding) => {
            let encoding = Arc::new(encoding);
            Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
        }
        Err(error) => {
            tracing::warn!(error = %error, "Tokenizer unavailable; falling back to whitespace counter");
            Arc::new(|segment: &str| {
                let tokens = segment.split_whitespace().count();
                if tokens == 0 && !segment.is_empty() {
                    1
                } else {
                    tokens
                }
            })
        }
    }
}

/// A chunk produced by the splitter, before embedding and id assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    /// Zero-based position of the chunk within the document.
    pub ordinal: usize,
    /// Chunk text content.
    pub text: String,
    /// Page containing the chunk's first character.
    pub page: u32,
    /// Image filenames attached to this chunk, in anchor order.
    pub images: Vec<String>,
    /// Token count of the chunk text.
    pub token_len: usize,
}

/// Splits extracted documents into overlapping, citation-addressable chunks.
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    counter: TokenCounter,
}

impl Chunker {
    /// Build a chunker for the given window size and overlap.
    ///
    /// The overlap must be strictly smaller than the chunk size; anything
    /// else is rejected here, at configuration time.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::OutOfRange {
                name: "chunk_size",
                requirement: "greater than zero",
                value: "0".into(),
            });
        }
        if overlap >= chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
            counter: token_counter(),
        })
    }

    /// Split a document into ordered chunks covering its entire text.
    ///
    /// A document shorter than the window yields exactly one chunk; an empty
    /// document yields none. Image anchors attach to every chunk whose span
    /// contains them; an anchor past the end of the text attaches to the last
    /// chunk.
    pub fn chunk(&self, document: &ExtractedDocument) -> Vec<ChunkDraft> {
        let text = document.full_text();
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let page_starts = page_start_offsets(document);
        let spans = window_spans(chars.len(), self.chunk_size, self.overlap);

        let mut drafts: Vec<ChunkDraft> = spans
            .iter()
            .enumerate()
            .map(|(ordinal, &(start, end))| {
                let text: String = chars[start..end].iter().collect();
                let token_len = self.counter.as_ref()(&text);
                ChunkDraft {
                    ordinal,
                    page: page_for_offset(&page_starts, start),
                    images: anchored_images(&document.images, start, end),
                    token_len,
                    text,
                }
            })
            .collect();

        attach_trailing_anchors(&mut drafts, &document.images, chars.len());
        drafts
    }
}

/// Compute the `(start, end)` character spans of the sliding window.
fn window_spans(len: usize, chunk_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let step = chunk_size - overlap;
    let mut spans = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(len);
        spans.push((start, end));
        if end == len {
            break;
        }
        start += step;
    }
    spans
}

/// Character offsets at which each page begins, paired with the page number.
fn page_start_offsets(document: &ExtractedDocument) -> Vec<(usize, u32)> {
    let mut starts = Vec::with_capacity(document.pages.len());
    let mut offset = 0;
    for page in &document.pages {
        starts.push((offset, page.number));
        offset += page.text.chars().count();
    }
    starts
}

/// Page containing the given character offset; defaults to page 1.
fn page_for_offset(page_starts: &[(usize, u32)], offset: usize) -> u32 {
    page_starts
        .iter()
        .take_while(|(start, _)| *start <= offset)
        .last()
        .map(|(_, number)| *number)
        .unwrap_or(1)
}

/// Images whose anchor offset falls inside `[start, end)`, deduplicated.
fn anchored_images(anchors: &[ImageAnchor], start: usize, end: usize) -> Vec<String> {
    let mut images = Vec::new();
    for anchor in anchors {
        if anchor.offset >= start && anchor.offset < end && !images.contains(&anchor.filename) {
            images.push(anchor.filename.clone());
        }
    }
    images
}

/// Attach anchors positioned past the end of the text to the final chunk.
fn attach_trailing_anchors(drafts: &mut [ChunkDraft], anchors: &[ImageAnchor], len: usize) {
    let Some(last) = drafts.last_mut() else {
        return;
    };
    for anchor in anchors {
        if anchor.offset >= len && !last.images.contains(&anchor.filename) {
            last.images.push(anchor.filename.clone());
        }
    }
}
