use tracing::debug;

use crate::chunk::build_chunk;
use crate::config::RetrievalStrategy;
use crate::embeddings::Embedder;
use crate::error::BackendError;
use crate::models::RetrievedChunk;
use crate::normalize::NormalizedRow;
use crate::traits::{DocumentIndex, TransactionIndex};

/// Cosine similarity with the lenient edges the scan relies on: zero-norm
/// or mismatched-dimension vectors score 0.0 instead of erroring.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (left, right) in a.iter().zip(b.iter()) {
        dot += f64::from(*left) * f64::from(*right);
        norm_a += f64::from(*left) * f64::from(*left);
        norm_b += f64::from(*right) * f64::from(*right);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Top-K retrieval over one configured strategy. Same interface for all
/// three: query string in, ranked chunk list out.
pub struct Retriever<T, D, E> {
    strategy: RetrievalStrategy,
    transactions: T,
    documents: D,
    embedder: E,
    top_k: usize,
}

impl<T, D, E> Retriever<T, D, E>
where
    T: TransactionIndex + Send + Sync,
    D: DocumentIndex + Send + Sync,
    E: Embedder + Send + Sync,
{
    pub fn new(
        strategy: RetrievalStrategy,
        transactions: T,
        documents: D,
        embedder: E,
        top_k: usize,
    ) -> Self {
        Self {
            strategy,
            transactions,
            documents,
            embedder,
            top_k: top_k.max(1),
        }
    }

    pub fn strategy(&self) -> RetrievalStrategy {
        self.strategy
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, BackendError> {
        if query.trim().is_empty() {
            return Err(BackendError::Request("query is empty".to_string()));
        }

        match self.strategy {
            RetrievalStrategy::Keyword => self.retrieve_keyword(query).await,
            RetrievalStrategy::NativeVector => {
                let query_vector = self.embed_query(query).await?;
                self.documents.search_vector(&query_vector, self.top_k).await
            }
            RetrievalStrategy::CosineScan => self.retrieve_by_scan(query).await,
        }
    }

    async fn retrieve_keyword(&self, query: &str) -> Result<Vec<RetrievedChunk>, BackendError> {
        let records = self.transactions.search_keyword(query, self.top_k).await?;

        Ok(records
            .into_iter()
            .map(|record| {
                let chunk = build_chunk(
                    &NormalizedRow {
                        source_row: 0,
                        record,
                        preassigned_id: None,
                    },
                    None,
                );
                RetrievedChunk {
                    text: chunk.text,
                    metadata: chunk.metadata,
                    score: None,
                }
            })
            .collect())
    }

    /// Full client-side scan: O(n) per query, no index. Ties keep store
    /// order (the sort is stable).
    async fn retrieve_by_scan(&self, query: &str) -> Result<Vec<RetrievedChunk>, BackendError> {
        let query_vector = self.embed_query(query).await?;
        let documents = self.documents.scan_documents().await?;
        debug!(candidates = documents.len(), "cosine scan over full store");

        let mut scored: Vec<RetrievedChunk> = documents
            .into_iter()
            .map(|document| {
                let score = cosine_similarity(&query_vector, &document.vector);
                RetrievedChunk {
                    text: document.text,
                    metadata: document.metadata,
                    score: Some(score),
                }
            })
            .collect();

        scored.sort_by(|left, right| {
            right
                .score
                .unwrap_or(0.0)
                .total_cmp(&left.score.unwrap_or(0.0))
        });
        scored.truncate(self.top_k);

        Ok(scored)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, BackendError> {
        let mut vectors = self.embedder.embed_batch(&[query.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| BackendError::Request("embedder returned no vector".to_string()))
    }
}
