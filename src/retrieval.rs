//! Query engine: similarity search followed by compact-and-refine synthesis.
//!
//! A query is embedded with the same embedder that built the index, the
//! `top_k` nearest chunks are selected, and the chat model writes an answer
//! grounded only in those chunks:
//!
//! 1. Chunk texts are packed, in rank order, into as few context blocks as
//!    fit `max_context_chars`.
//! 2. The first block is answered with a question-answering prompt.
//! 3. Each following block refines the running answer.
//!
//! When nothing is retrieved the configured no-result message is returned
//! and the model is not called.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::embed_query;
use crate::error::{BuddyError, Result};
use crate::index::VectorIndex;
use crate::models::{ChatMessage, RetrievalHit, RetrievalResult};
use crate::settings::Settings;

const QA_SYSTEM_PROMPT: &str = "You are an expert Q&A system that is trusted around the world. \
Always answer the query using the provided context information, and not prior knowledge. \
Never directly reference the given context in your answer.";

fn qa_prompt(context: &str, query: &str) -> String {
    format!(
        "Context information is below.
---------------------
{context}
---------------------
Given the context information and not prior knowledge, answer the query.
Query: {query}
Answer: "
    )
}

fn refine_prompt(query: &str, answer: &str, context: &str) -> String {
    format!(
        "The original query is as follows: {query}
We have provided an existing answer: {answer}
We have the opportunity to refine the existing answer (only if needed) with some more context below.
------------
{context}
------------
Given the new context, refine the original answer to better answer the query. \
If the context isn't useful, return the original answer.
Refined Answer: "
    )
}

pub struct RetrievalEngine {
    index: Arc<VectorIndex>,
    settings: Settings,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(index: Arc<VectorIndex>, settings: Settings, config: RetrievalConfig) -> Self {
        Self {
            index,
            settings,
            config,
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Rank chunks for `query` without synthesizing an answer.
    pub async fn search(&self, query: &str) -> Result<Vec<RetrievalHit>> {
        let vector = embed_query(self.settings.embedder.as_ref(), query).await?;
        Ok(self.index.search(&vector, self.config.top_k))
    }

    /// Retrieve the nearest chunks and synthesize an answer from them.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        let hits = self.search(query).await?;
        tracing::info!(
            query,
            hits = hits.len(),
            top_score = hits.first().map(|h| h.score),
            "retrieved chunks"
        );

        if hits.is_empty() {
            return Ok(RetrievalResult {
                hits,
                answer: self.config.no_result_message.clone(),
            });
        }

        let blocks = pack_context(&hits, self.config.max_context_chars);
        let mut answer: Option<String> = None;
        for block in &blocks {
            let prompt = match &answer {
                None => qa_prompt(block, query),
                Some(existing) => refine_prompt(query, existing, block),
            };
            let messages = [ChatMessage::system(QA_SYSTEM_PROMPT), ChatMessage::user(prompt)];
            let completion = self.settings.llm.complete(&messages, &[]).await?;
            match completion.content {
                Some(text) => answer = Some(text.trim().to_string()),
                None if answer.is_some() => {}
                None => {
                    return Err(BuddyError::provider(
                        self.settings.llm.name(),
                        "empty synthesis response",
                    ))
                }
            }
        }

        Ok(RetrievalResult {
            hits,
            answer: answer.unwrap_or_else(|| self.config.no_result_message.clone()),
        })
    }
}

/// Pack hit texts, in order, into blocks of at most `max_chars` bytes.
///
/// A single chunk longer than the budget gets a block of its own, cut on a
/// character boundary.
fn pack_context(hits: &[RetrievalHit], max_chars: usize) -> Vec<String> {
    const SEPARATOR: &str = "\n\n";
    let mut blocks = Vec::new();
    let mut current = String::new();

    for hit in hits {
        let text = hit.chunk.text.trim();
        if text.is_empty() {
            continue;
        }
        let text = truncate(text, max_chars);
        if !current.is_empty() && current.len() + SEPARATOR.len() + text.len() > max_chars {
            blocks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str(SEPARATOR);
        }
        current.push_str(text);
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn truncate(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn hit(text: &str) -> RetrievalHit {
        RetrievalHit {
            chunk: Chunk {
                id: "d:0".into(),
                document_id: "d".into(),
                chunk_index: 0,
                text: text.into(),
                hash: String::new(),
            },
            source_id: "d.md".into(),
            score: 1.0,
        }
    }

    #[test]
    fn test_pack_fits_in_one_block() {
        let blocks = pack_context(&[hit("Catan"), hit("Azul")], 100);
        assert_eq!(blocks, vec!["Catan\n\nAzul".to_string()]);
    }

    #[test]
    fn test_pack_splits_when_budget_exceeded() {
        let blocks = pack_context(&[hit("aaaaaaaa"), hit("bbbbbbbb")], 12);
        assert_eq!(blocks, vec!["aaaaaaaa".to_string(), "bbbbbbbb".to_string()]);
    }

    #[test]
    fn test_pack_truncates_oversized_chunk_on_char_boundary() {
        let blocks = pack_context(&[hit("ééééé")], 5);
        assert_eq!(blocks, vec!["éé".to_string()]);
    }

    #[test]
    fn test_prompts_keep_braces_from_inputs() {
        let prompt = qa_prompt("Règle {query} inchangée", "durée {answer} ?");
        assert!(prompt.contains("Règle {query} inchangée"));
        assert!(prompt.contains("Query: durée {answer} ?"));

        let prompt = refine_prompt("q {context}", "a {query}", "c {answer}");
        assert!(prompt.contains("query is as follows: q {context}\n"));
        assert!(prompt.contains("existing answer: a {query}\n"));
        assert!(prompt.contains("------------\nc {answer}\n------------"));
    }
}
