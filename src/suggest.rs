//! Follow-up question suggestions generated after each answer.
//!
//! Suggestions are best-effort decoration: when the model misbehaves, the
//! turn ships with an empty list rather than failing.

use std::sync::Arc;

use crate::{
    config::SamplingConfig,
    generation::LlmClient,
};

const MAX_SUGGESTIONS: usize = 4;
const MIN_SUGGESTION_LEN: usize = 10;

/// Generates follow-up questions from the query and answer of a turn.
pub struct SuggestionGenerator {
    llm: Arc<dyn LlmClient>,
    sampling: SamplingConfig,
}

impl SuggestionGenerator {
    /// Build a generator using the given sampling parameters.
    pub fn new(llm: Arc<dyn LlmClient>, sampling: SamplingConfig) -> Self {
        Self { llm, sampling }
    }

    /// Propose up to four follow-up questions.
    ///
    /// Never fails: provider errors and unparseable output degrade to an
    /// empty list.
    pub async fn suggest(&self, query: &str, answer: &str) -> Vec<String> {
        let prompt = format!(
            "A user asked a support question and received an answer.\n\n\
             Question: {query}\n\nAnswer: {answer}\n\n\
             Propose {MAX_SUGGESTIONS} short follow-up questions the user might ask next. \
             Write one question per line with no numbering or commentary."
        );

        match self.llm.generate(&prompt, &self.sampling).await {
            Ok(text) => parse_suggestions(&text),
            Err(error) => {
                tracing::warn!(error = %error, "Suggestion generation failed, continuing without");
                Vec::new()
            }
        }
    }
}

/// Extract question lines from model output.
///
/// Models ignore the no-numbering instruction often enough that list markers
/// are stripped anyway; lines that do not read as a real question are dropped.
fn parse_suggestions(text: &str) -> Vec<String> {
    text.lines()
        .map(strip_list_prefix)
        .map(str::trim)
        .filter(|line| line.chars().count() > MIN_SUGGESTION_LEN && line.ends_with('?'))
        .map(str::to_string)
        .take(MAX_SUGGESTIONS)
        .collect()
}

/// Remove a leading `1.` / `1)` / `-` / `*` list marker, if present.
fn strip_list_prefix(line: &str) -> &str {
    let trimmed = line.trim_start();
    let after_digits = trimmed.trim_start_matches(|c: char| c.is_ascii_digit());
    if after_digits.len() < trimmed.len() {
        if let Some(rest) = after_digits.strip_prefix('.').or_else(|| after_digits.strip_prefix(')')) {
            return rest;
        }
        return trimmed;
    }
    trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{LlmClientError, TokenStream};
    use async_trait::async_trait;

    struct ScriptedLlm {
        reply: Result<String, ()>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate_stream(
            &self,
            _prompt: &str,
            _sampling: &SamplingConfig,
        ) -> Result<TokenStream, LlmClientError> {
            Err(LlmClientError::Request("unused in these tests".into()))
        }

        async fn generate(
            &self,
            _prompt: &str,
            _sampling: &SamplingConfig,
        ) -> Result<String, LlmClientError> {
            self.reply
                .clone()
                .map_err(|()| LlmClientError::Request("provider down".into()))
        }
    }

    fn generator(reply: Result<String, ()>) -> SuggestionGenerator {
        SuggestionGenerator::new(
            Arc::new(ScriptedLlm { reply }),
            SamplingConfig {
                temperature: 0.9,
                top_p: 1.0,
                max_tokens: 256,
            },
        )
    }

    #[tokio::test]
    async fn strips_numbering_and_bullets() {
        let reply = "1. How do I clear a paper jam?\n\
                     2) Where is the toner stored?\n\
                     - Can I print double sided?\n\
                     * Does the printer support A3 paper?";
        let suggestions = generator(Ok(reply.into())).suggest("q", "a").await;
        assert_eq!(
            suggestions,
            vec![
                "How do I clear a paper jam?",
                "Where is the toner stored?",
                "Can I print double sided?",
                "Does the printer support A3 paper?",
            ]
        );
    }

    #[tokio::test]
    async fn drops_non_questions_and_caps_at_four() {
        let reply = "Here are some ideas:\n\
                     How do I reset the router?\n\
                     Why?\n\
                     What does the amber light mean?\n\
                     Is the firmware up to date?\n\
                     Can I schedule restarts?\n\
                     Should I call support instead?";
        let suggestions = generator(Ok(reply.into())).suggest("q", "a").await;
        assert_eq!(suggestions.len(), 4);
        assert!(!suggestions.contains(&"Why?".to_string()));
        assert!(!suggestions.iter().any(|s| s.starts_with("Here are")));
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_empty() {
        let suggestions = generator(Err(())).suggest("q", "a").await;
        assert!(suggestions.is_empty());
    }
}
