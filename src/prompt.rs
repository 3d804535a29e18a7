//! Grounded prompt assembly with stable citation numbering.
//!
//! Chunks are numbered 1..n in retrieval rank order; that numbering is the
//! authoritative citation map for the whole turn. When the assembled prompt
//! would not fit the generation context window, whole chunks are dropped from
//! the bottom of the ranking; chunk text is never truncated mid-span, since a
//! partial chunk would break the citation's meaning.

use crate::{
    chunker::{TokenCounter, token_counter},
    index::ScoredChunk,
};

const NO_CONTEXT_INSTRUCTIONS: &str = "No documentation matched this question. State on the \
first line of your answer that no direct solution was found in the documentation, then offer \
general guidance on where to look next. Do not invent citations.";

/// A prompt ready for generation, with the chunks that back its citations.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    /// Full prompt text handed to the generation capability.
    pub text: String,
    /// Chunks rendered into the context block, in citation order: the chunk
    /// cited as `[n]` is `chunks[n - 1]`.
    pub chunks: Vec<ScoredChunk>,
    /// Whether the failure-protocol (no retrieved context) path was taken.
    pub no_context: bool,
}

/// Renders ranked chunks into a numbered, token-budgeted context block.
pub struct PromptAssembler {
    system_prompt: String,
    prompt_budget: usize,
    counter: TokenCounter,
}

impl PromptAssembler {
    /// Build an assembler.
    ///
    /// `context_window_tokens` is the generation capability's window;
    /// `max_answer_tokens` is reserved for the answer, leaving the rest for
    /// the prompt.
    pub fn new(
        system_prompt: String,
        context_window_tokens: usize,
        max_answer_tokens: usize,
    ) -> Self {
        Self {
            system_prompt,
            prompt_budget: context_window_tokens.saturating_sub(max_answer_tokens).max(1),
            counter: token_counter(),
        }
    }

    /// Assemble the prompt for a query over ranked chunks.
    ///
    /// Deterministic: the same retrieval result always produces the same text
    /// and numbering. Lowest-ranked chunks are dropped first until the prompt
    /// fits the budget.
    pub fn assemble(&self, query: &str, mut chunks: Vec<ScoredChunk>) -> AssembledPrompt {
        loop {
            let text = self.render(query, &chunks);
            if chunks.is_empty() || self.counter.as_ref()(&text) <= self.prompt_budget {
                let no_context = chunks.is_empty();
                if no_context {
                    tracing::debug!("Assembling no-context prompt");
                }
                return AssembledPrompt {
                    text,
                    chunks,
                    no_context,
                };
            }
            if let Some(dropped) = chunks.pop() {
                tracing::debug!(
                    chunk = %dropped.id,
                    score = dropped.score,
                    "Dropped lowest-ranked chunk to fit context window"
                );
            }
        }
    }

    fn render(&self, query: &str, chunks: &[ScoredChunk]) -> String {
        let mut prompt = String::new();
        prompt.push_str(&self.system_prompt);
        prompt.push_str("\n\n");

        if chunks.is_empty() {
            prompt.push_str(NO_CONTEXT_INSTRUCTIONS);
            prompt.push_str("\n\n");
        } else {
            prompt.push_str("Context:\n");
            for (position, chunk) in chunks.iter().enumerate() {
                let citation = position + 1;
                prompt.push_str(&format!(
                    "CHUNK {citation} [Source: {}, Page: {}]\n",
                    chunk.document, chunk.page
                ));
                prompt.push_str(&format!("Text: {}\n", chunk.text));
                if !chunk.images.is_empty() {
                    prompt.push_str(&format!("Images: {}\n", chunk.images.join(", ")));
                }
                prompt.push('\n');
            }
        }

        prompt.push_str(&format!("User Query: {query}\n\nYour Response:"));
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::chunk_id;
    use uuid::Uuid;

    fn chunk(ordinal: usize, text: &str, images: Vec<String>) -> ScoredChunk {
        let doc = Uuid::nil();
        ScoredChunk {
            id: chunk_id(doc, ordinal),
            document_id: doc,
            document: "manual.pdf".into(),
            ordinal,
            text: text.to_string(),
            page: ordinal as u32 + 1,
            images,
            token_len: 0,
            score: 1.0 - ordinal as f32 / 10.0,
        }
    }

    fn assembler(budget: usize) -> PromptAssembler {
        // Reserve one answer token so the prompt budget equals `budget`.
        PromptAssembler::new("Answer from the context.".into(), budget + 1, 1)
    }

    #[test]
    fn numbers_chunks_in_rank_order() {
        let assembler = assembler(100_000);
        let prompt = assembler.assemble(
            "how do I print?",
            vec![
                chunk(0, "hold the power button", vec![]),
                chunk(1, "open the tray", vec!["tray.png".into()]),
            ],
        );

        assert!(prompt.text.contains("CHUNK 1 [Source: manual.pdf, Page: 1]"));
        assert!(prompt.text.contains("CHUNK 2 [Source: manual.pdf, Page: 2]"));
        assert!(prompt.text.contains("Images: tray.png"));
        assert!(!prompt.no_context);
        assert_eq!(prompt.chunks.len(), 2);
    }

    #[test]
    fn reassembly_is_deterministic() {
        let assembler = assembler(100_000);
        let chunks = vec![chunk(0, "alpha", vec![]), chunk(1, "beta", vec![])];
        let first = assembler.assemble("query", chunks.clone());
        let second = assembler.assemble("query", chunks);
        assert_eq!(first.text, second.text);
    }

    #[test]
    fn drops_lowest_ranked_chunks_to_fit_budget() {
        let long_text = "restart the print spooler and clear the queue ".repeat(10);
        let chunks = vec![
            chunk(0, &long_text, vec![]),
            chunk(1, &long_text, vec![]),
            chunk(2, &long_text, vec![]),
        ];

        // Budget sized to exactly fit the two highest-ranked chunks.
        let probe = assembler(100_000);
        let counter = token_counter();
        let two_chunk_prompt = probe.render("query", &chunks[..2]);
        let assembler = assembler(counter.as_ref()(&two_chunk_prompt));

        let prompt = assembler.assemble("query", chunks);
        assert_eq!(prompt.chunks.len(), 2);
        // Kept chunks are the highest ranked, never mid-text truncated.
        assert_eq!(prompt.chunks[0].ordinal, 0);
        assert_eq!(prompt.chunks[1].ordinal, 1);
        assert!(prompt.text.contains(&long_text));
    }

    #[test]
    fn empty_retrieval_renders_failure_protocol() {
        let assembler = assembler(100_000);
        let prompt = assembler.assemble("unanswerable", Vec::new());
        assert!(prompt.no_context);
        assert!(prompt.chunks.is_empty());
        assert!(prompt.text.contains("no direct solution was found"));
        assert!(!prompt.text.contains("CHUNK 1"));
    }
}
