use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::BackendError;
use crate::models::{
    EmbeddingDocument, RetrievedChunk, TransactionFilter, TransactionRecord, VendorCount,
};

/// Relational store of canonical transactions: keyword retrieval, the
/// listing surfaces, and vendor analytics.
#[async_trait]
pub trait TransactionIndex {
    async fn upsert_transactions(
        &self,
        records: &[TransactionRecord],
    ) -> Result<usize, BackendError>;

    /// Case-insensitive substring match against vendor and facility-type
    /// columns. Row order, no ranking.
    async fn search_keyword(
        &self,
        term: &str,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, BackendError>;

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<TransactionRecord>, BackendError>;

    async fn find_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<TransactionRecord>, BackendError>;

    async fn vendor_counts(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<VendorCount>, BackendError>;

    async fn ping(&self) -> Result<(), BackendError>;
}

/// Document store owning the embedding documents. Upsert-only; no delete
/// and no transactional multi-document write.
#[async_trait]
pub trait DocumentIndex {
    async fn upsert_documents(&self, documents: &[EmbeddingDocument]) -> Result<(), BackendError>;

    async fn fetch_document(&self, id: &str) -> Result<Option<EmbeddingDocument>, BackendError>;

    async fn batch_documents(
        &self,
        batch_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<EmbeddingDocument>, BackendError>;

    /// Ranked top-K by the store's native distance operator.
    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, BackendError>;

    /// Every stored document, paged internally. Feeds the client-side
    /// cosine scan and the substring search.
    async fn scan_documents(&self) -> Result<Vec<EmbeddingDocument>, BackendError>;

    async fn search_text(
        &self,
        term: &str,
        limit: usize,
    ) -> Result<Vec<EmbeddingDocument>, BackendError>;

    async fn ping(&self) -> Result<(), BackendError>;
}

/// The hosted chat-completion API.
#[async_trait]
pub trait CompletionBackend {
    async fn complete(&self, prompt: &str) -> Result<String, BackendError>;

    async fn ping(&self) -> Result<(), BackendError>;
}
