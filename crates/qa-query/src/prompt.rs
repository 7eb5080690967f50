//! Grounded prompt assembly.

use qa_core::FusedResult;

const INSTRUCTIONS: &str = "You are a helpful AI assistant. Synthesize an answer to the following \
question based *only* on the provided documents. Do not use any outside knowledge.";

const DOCUMENT_SEPARATOR: &str = "\n---\n";

/// Build the generation prompt from the question and its grounding
/// documents, best first.
///
/// ```text
/// <instructions>
///
/// --- CONTEXT DOCUMENTS ---
/// Document 1: <text>
/// ---
/// Document 2: <text>
///
/// --- QUESTION ---
/// <question>
///
/// --- ANSWER ---
/// ```
pub fn build_prompt(question: &str, documents: &[FusedResult]) -> String {
    let context = documents
        .iter()
        .enumerate()
        .map(|(i, result)| format!("Document {}: {}", i + 1, result.document.text))
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR);

    format!(
        "{}\n\n--- CONTEXT DOCUMENTS ---\n{}\n\n--- QUESTION ---\n{}\n\n--- ANSWER ---\n",
        INSTRUCTIONS, context, question
    )
}
