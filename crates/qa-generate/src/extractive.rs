//! Model-free generator that answers with the best grounding document.

use std::time::Duration;

use qa_core::Result;

use crate::local::BlockingGenerator;

const FIRST_DOCUMENT: &str = "Document 1:";
const NO_DOCUMENT: &str = "I couldn't find an answer in the provided documents.";

/// Streams the text of the first context document, word by word.
///
/// Useful when no language model is available: the pipeline still streams
/// a grounded answer, just not a synthesized one.
#[derive(Debug, Default, Clone)]
pub struct ExtractiveGenerator {
    token_delay: Duration,
}

impl ExtractiveGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause between tokens, to mimic model pacing.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }
}

/// Text of the first document block in a prompt, if any.
fn first_document(prompt: &str) -> Option<&str> {
    let start = prompt.find(FIRST_DOCUMENT)? + FIRST_DOCUMENT.len();
    let rest = &prompt[start..];
    let end = ["\n---", "\n\n"]
        .iter()
        .filter_map(|marker| rest.find(marker))
        .min()
        .unwrap_or(rest.len());
    let text = rest[..end].trim();
    (!text.is_empty()).then_some(text)
}

impl BlockingGenerator for ExtractiveGenerator {
    fn generate_blocking(
        &self,
        prompt: &str,
        emit: &mut dyn FnMut(String) -> bool,
    ) -> Result<()> {
        let answer = first_document(prompt).unwrap_or(NO_DOCUMENT);

        for (i, word) in answer.split_whitespace().enumerate() {
            if !self.token_delay.is_zero() {
                std::thread::sleep(self.token_delay);
            }
            let token = if i == 0 {
                word.to_string()
            } else {
                format!(" {}", word)
            };
            if !emit(token) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(generator: &ExtractiveGenerator, prompt: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        generator
            .generate_blocking(prompt, &mut |t| {
                tokens.push(t);
                true
            })
            .unwrap();
        tokens
    }

    #[test]
    fn test_streams_first_document() {
        let prompt = "Intro\n\n--- CONTEXT DOCUMENTS ---\nDocument 1: Paris is the capital of France.\n---\nDocument 2: Berlin is in Germany.\n\n--- QUESTION ---\nq\n";
        let tokens = collect(&ExtractiveGenerator::new(), prompt);
        assert_eq!(tokens.concat(), "Paris is the capital of France.");
        assert_eq!(tokens[1], " is");
    }

    #[test]
    fn test_single_document_ends_at_blank_line() {
        let prompt = "Document 1: Only one.\n\n--- QUESTION ---\nq";
        assert_eq!(collect(&ExtractiveGenerator::new(), prompt).concat(), "Only one.");
    }

    #[test]
    fn test_no_document() {
        let tokens = collect(&ExtractiveGenerator::new(), "no context here");
        assert_eq!(tokens.concat(), NO_DOCUMENT);
    }

    #[test]
    fn test_stops_when_consumer_leaves() {
        let mut seen = 0;
        ExtractiveGenerator::new()
            .generate_blocking("Document 1: a b c d e", &mut |_| {
                seen += 1;
                seen < 2
            })
            .unwrap();
        assert_eq!(seen, 2);
    }
}
