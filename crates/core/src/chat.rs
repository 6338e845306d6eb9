use chrono::Utc;
use tracing::warn;

use crate::chunk::build_chunks;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::models::{ChatAnswer, RetrievedChunk};
use crate::normalize::normalize_table;
use crate::prompt::assemble_prompt;
use crate::retrieve::Retriever;
use crate::tabular::TableData;
use crate::traits::{CompletionBackend, DocumentIndex, TransactionIndex};

/// Fixed user-facing reply when the completion call fails or returns an
/// unusable body. Degraded, not fatal.
pub const FALLBACK_ANSWER: &str =
    "Sorry, I wasn't able to generate an answer just now. Please try again in a moment.";

/// Canned follow-up prompts surfaced next to every chat reply.
pub const SUGGESTED_PROMPTS: [&str; 3] = ["Order status", "Inventory check", "Supplier contact"];

pub struct ChatOutcome {
    pub answer: ChatAnswer,
    pub context_note: Option<String>,
}

/// Retrieval-augmented question answering: embed/retrieve context, render
/// the prompt, call the completion API, wrap the reply with its sources.
pub struct ChatService<T, D, E, C> {
    retriever: Retriever<T, D, E>,
    completion: C,
}

impl<T, D, E, C> ChatService<T, D, E, C>
where
    T: TransactionIndex + Send + Sync,
    D: DocumentIndex + Send + Sync,
    E: Embedder + Send + Sync,
    C: CompletionBackend + Send + Sync,
{
    pub fn new(retriever: Retriever<T, D, E>, completion: C) -> Self {
        Self {
            retriever,
            completion,
        }
    }

    /// Answers one question. When `inline_table` is present it supplies the
    /// context instead of any store lookup; this synchronous path treats a
    /// malformed table as fatal, unlike batch ingestion.
    pub async fn answer(
        &self,
        message: &str,
        inline_table: Option<&TableData>,
    ) -> Result<ChatOutcome, IngestError> {
        let chunks = match inline_table {
            Some(table) => self.inline_context(table)?,
            None => match self.retriever.retrieve(message).await {
                Ok(chunks) => chunks,
                Err(error) => {
                    warn!(%error, "retrieval failed, answering without context");
                    Vec::new()
                }
            },
        };

        let prompt = assemble_prompt(&chunks, message);
        let response = match self.completion.complete(&prompt).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => {
                warn!("completion returned empty content, using fallback answer");
                FALLBACK_ANSWER.to_string()
            }
            Err(error) => {
                warn!(%error, "completion call failed, using fallback answer");
                FALLBACK_ANSWER.to_string()
            }
        };

        let context_note = if chunks.is_empty() {
            None
        } else {
            Some(format!("Analyzed {} matching transactions", chunks.len()))
        };

        Ok(ChatOutcome {
            answer: ChatAnswer {
                response,
                sources: chunks.into_iter().map(|chunk| chunk.metadata).collect(),
                generated_at: Utc::now(),
            },
            context_note,
        })
    }

    fn inline_context(&self, table: &TableData) -> Result<Vec<RetrievedChunk>, IngestError> {
        let normalized = normalize_table(table)?;

        Ok(build_chunks(&normalized.rows, None)
            .into_iter()
            .take(self.retriever.top_k())
            .map(|chunk| RetrievedChunk {
                text: chunk.text,
                metadata: chunk.metadata,
                score: None,
            })
            .collect())
    }
}
