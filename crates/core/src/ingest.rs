use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::build_chunks;
use crate::config::{EMBED_SUB_BATCH, UPSERT_SUB_BATCH};
use crate::embeddings::Embedder;
use crate::models::{
    BatchReport, BatchStatus, Chunk, EmbeddingDocument, FailureStage, RowFailure,
};
use crate::normalize::normalize_table;
use crate::tabular::TableData;
use crate::traits::{DocumentIndex, TransactionIndex};

#[derive(Debug, Clone, Copy)]
pub struct IngestionOptions {
    pub embed_sub_batch: usize,
    pub upsert_sub_batch: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            embed_sub_batch: EMBED_SUB_BATCH,
            upsert_sub_batch: UPSERT_SUB_BATCH,
        }
    }
}

/// Runs one batch through the whole pipeline: normalize, chunk, embed,
/// write. Embeddings are computed before the first store write, so a
/// document never exists without its vector.
///
/// Failures are terminal for their unit of work (one row, one embedding
/// sub-batch, one upsert sub-batch) and recorded in the report; nothing is
/// retried and nothing aborts the surrounding batch.
pub async fn run_batch<T, D, E>(
    table: &TableData,
    mut report: BatchReport,
    transactions: &T,
    documents: &D,
    embedder: &E,
    options: &IngestionOptions,
) -> BatchReport
where
    T: TransactionIndex + Send + Sync,
    D: DocumentIndex + Send + Sync,
    E: Embedder + Send + Sync,
{
    report.rows_received = table.row_count();

    let normalized = match normalize_table(table) {
        Ok(normalized) => normalized,
        Err(error) => {
            warn!(batch_id = %report.batch_id, %error, "batch rejected during normalization");
            report.warnings.push(format!("table rejected: {error}"));
            return finish(report);
        }
    };

    report.failures.extend(normalized.dropped.iter().cloned());
    info!(
        batch_id = %report.batch_id,
        valid_rows = normalized.rows.len(),
        dropped_rows = normalized.dropped.len(),
        "normalization complete"
    );

    let records: Vec<_> = normalized
        .rows
        .iter()
        .map(|row| row.record.clone())
        .collect();
    match transactions.upsert_transactions(&records).await {
        Ok(stored) if stored < records.len() => {
            report.warnings.push(format!(
                "relational store kept {stored} of {} rows",
                records.len()
            ));
        }
        Ok(_) => {}
        Err(error) => {
            warn!(batch_id = %report.batch_id, %error, "relational store write failed");
            report
                .warnings
                .push(format!("relational store unavailable: {error}"));
        }
    }

    let mut chunks = build_chunks(&normalized.rows, Some(report.batch_id.as_str()));
    for chunk in &mut chunks {
        if chunk.metadata.id.is_none() {
            chunk.metadata.id = Some(Uuid::new_v4().to_string());
        }
    }
    let source_rows: Vec<usize> = normalized.rows.iter().map(|row| row.source_row).collect();

    let embedded = embed_chunks(
        &chunks,
        &source_rows,
        embedder,
        options.embed_sub_batch.max(1),
        &mut report.failures,
    )
    .await;

    let mut stored = 0usize;
    for slice in embedded.chunks(options.upsert_sub_batch.max(1)) {
        let batch: Vec<EmbeddingDocument> =
            slice.iter().map(|(_, document)| document.clone()).collect();

        match documents.upsert_documents(&batch).await {
            Ok(()) => stored += batch.len(),
            Err(error) => {
                warn!(batch_id = %report.batch_id, %error, "document upsert sub-batch failed");
                for (source_row, document) in slice {
                    report.failures.push(RowFailure {
                        row_index: *source_row,
                        stage: FailureStage::Store,
                        reason: format!("upsert of {} failed: {error}", document.id),
                    });
                }
            }
        }
    }

    report.rows_stored = stored;
    info!(
        batch_id = %report.batch_id,
        rows_stored = stored,
        failures = report.failures.len(),
        "batch ingestion finished"
    );

    finish(report)
}

/// Embeds chunk texts in sub-batches. A failed sub-batch is recorded and
/// skipped; the remaining sub-batches still run.
async fn embed_chunks<E>(
    chunks: &[Chunk],
    source_rows: &[usize],
    embedder: &E,
    sub_batch: usize,
    failures: &mut Vec<RowFailure>,
) -> Vec<(usize, EmbeddingDocument)>
where
    E: Embedder + Send + Sync,
{
    let mut embedded = Vec::with_capacity(chunks.len());

    for (slice_index, slice) in chunks.chunks(sub_batch).enumerate() {
        let texts: Vec<String> = slice.iter().map(|chunk| chunk.text.clone()).collect();
        let offset = slice_index * sub_batch;

        match embedder.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == slice.len() => {
                for (position, (chunk, vector)) in slice.iter().zip(vectors).enumerate() {
                    let id = chunk
                        .metadata
                        .id
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string());
                    embedded.push((
                        source_rows[offset + position],
                        EmbeddingDocument {
                            id,
                            vector,
                            text: chunk.text.clone(),
                            metadata: chunk.metadata.clone(),
                        },
                    ));
                }
            }
            Ok(vectors) => {
                record_embed_failures(
                    slice,
                    source_rows,
                    offset,
                    format!(
                        "embedder returned {} vectors for {} texts",
                        vectors.len(),
                        slice.len()
                    ),
                    failures,
                );
            }
            Err(error) => {
                warn!(%error, "embedding sub-batch failed, skipping");
                record_embed_failures(
                    slice,
                    source_rows,
                    offset,
                    format!("embedding failed: {error}"),
                    failures,
                );
            }
        }
    }

    embedded
}

fn record_embed_failures(
    slice: &[Chunk],
    source_rows: &[usize],
    offset: usize,
    reason: String,
    failures: &mut Vec<RowFailure>,
) {
    for position in 0..slice.len() {
        failures.push(RowFailure {
            row_index: source_rows[offset + position],
            stage: FailureStage::Embedding,
            reason: reason.clone(),
        });
    }
}

fn finish(mut report: BatchReport) -> BatchReport {
    report.status = BatchStatus::Completed;
    report.completed_at = Some(Utc::now());
    report
}

#[cfg(test)]
mod tests {
    use super::{run_batch, IngestionOptions};
    use crate::embeddings::Embedder;
    use crate::error::BackendError;
    use crate::models::{
        BatchReport, EmbeddingDocument, FailureStage, RetrievedChunk, TransactionFilter,
        TransactionRecord, VendorCount,
    };
    use crate::tabular::TableData;
    use crate::traits::{DocumentIndex, TransactionIndex};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransactionIndex {
        records: Mutex<Vec<TransactionRecord>>,
    }

    #[async_trait]
    impl TransactionIndex for RecordingTransactionIndex {
        async fn upsert_transactions(
            &self,
            records: &[TransactionRecord],
        ) -> Result<usize, BackendError> {
            let mut kept = self.records.lock().unwrap();
            kept.extend(records.iter().cloned());
            Ok(records.len())
        }

        async fn search_keyword(
            &self,
            _term: &str,
            _limit: usize,
        ) -> Result<Vec<TransactionRecord>, BackendError> {
            Ok(Vec::new())
        }

        async fn list_transactions(
            &self,
            _filter: &TransactionFilter,
        ) -> Result<Vec<TransactionRecord>, BackendError> {
            Ok(Vec::new())
        }

        async fn find_transaction(
            &self,
            _transaction_id: &str,
        ) -> Result<Option<TransactionRecord>, BackendError> {
            Ok(None)
        }

        async fn vendor_counts(
            &self,
            _from: Option<NaiveDate>,
            _to: Option<NaiveDate>,
        ) -> Result<Vec<VendorCount>, BackendError> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryDocumentIndex {
        documents: Mutex<Vec<EmbeddingDocument>>,
        fail_upserts: bool,
    }

    #[async_trait]
    impl DocumentIndex for MemoryDocumentIndex {
        async fn upsert_documents(
            &self,
            documents: &[EmbeddingDocument],
        ) -> Result<(), BackendError> {
            if self.fail_upserts {
                return Err(BackendError::Request("store offline".to_string()));
            }
            let mut kept = self.documents.lock().unwrap();
            kept.extend(documents.iter().cloned());
            Ok(())
        }

        async fn fetch_document(
            &self,
            id: &str,
        ) -> Result<Option<EmbeddingDocument>, BackendError> {
            Ok(self
                .documents
                .lock()
                .unwrap()
                .iter()
                .find(|document| document.id == id)
                .cloned())
        }

        async fn batch_documents(
            &self,
            batch_id: &str,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<EmbeddingDocument>, BackendError> {
            Ok(self
                .documents
                .lock()
                .unwrap()
                .iter()
                .filter(|document| document.metadata.batch_id.as_deref() == Some(batch_id))
                .skip(offset)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn search_vector(
            &self,
            _query_vector: &[f32],
            _top_k: usize,
        ) -> Result<Vec<RetrievedChunk>, BackendError> {
            Ok(Vec::new())
        }

        async fn scan_documents(&self) -> Result<Vec<EmbeddingDocument>, BackendError> {
            Ok(self.documents.lock().unwrap().clone())
        }

        async fn search_text(
            &self,
            _term: &str,
            _limit: usize,
        ) -> Result<Vec<EmbeddingDocument>, BackendError> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    /// Fails any sub-batch whose text mentions the marker.
    struct FlakyEmbedder {
        marker: &'static str,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn dimensions(&self) -> usize {
            4
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
            if texts.iter().any(|text| text.contains(self.marker)) {
                return Err(BackendError::Request("model rejected input".to_string()));
            }
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3, 0.4]).collect())
        }
    }

    fn purchase_table(item_descs: &[&str]) -> TableData {
        TableData {
            headers: [
                "TransactionID",
                "FacilityID",
                "LoadDate",
                "Quantity",
                "PricePaid",
                "TotalSpend",
                "ItemDesc",
                "Vendor",
            ]
            .iter()
            .map(|h| h.to_string())
            .collect(),
            rows: item_descs
                .iter()
                .enumerate()
                .map(|(index, item_desc)| {
                    vec![
                        json!(format!("T-{}", index + 1)),
                        json!("F-1"),
                        json!("2024-03-01"),
                        json!(2),
                        json!(4.0),
                        json!(8.0),
                        json!(*item_desc),
                        json!("VendorA"),
                    ]
                })
                .collect(),
        }
    }

    fn report() -> BatchReport {
        BatchReport::enqueued(
            "batch-1".to_string(),
            "upload.csv".to_string(),
            "checksum".to_string(),
        )
    }

    #[tokio::test]
    async fn failed_embedding_row_does_not_block_the_rest() {
        let table = purchase_table(&["Aspirin", "FAILME gauze", "Saline"]);
        let transactions = RecordingTransactionIndex::default();
        let documents = MemoryDocumentIndex::default();
        let embedder = FlakyEmbedder { marker: "FAILME" };
        let options = IngestionOptions {
            embed_sub_batch: 1,
            upsert_sub_batch: 64,
        };

        let outcome = run_batch(&table, report(), &transactions, &documents, &embedder, &options)
            .await;

        assert_eq!(outcome.rows_received, 3);
        assert_eq!(outcome.rows_stored, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].row_index, 1);
        assert_eq!(outcome.failures[0].stage, FailureStage::Embedding);

        let stored = documents.scan_documents().await.unwrap();
        let ids: Vec<_> = stored
            .iter()
            .map(|document| document.metadata.record.transaction_id.as_str())
            .collect();
        assert_eq!(ids, ["T-1", "T-3"]);
    }

    #[tokio::test]
    async fn stored_metadata_round_trips_by_id() {
        let table = purchase_table(&["Aspirin"]);
        let transactions = RecordingTransactionIndex::default();
        let documents = MemoryDocumentIndex::default();
        let embedder = FlakyEmbedder { marker: "NEVER" };

        let outcome = run_batch(
            &table,
            report(),
            &transactions,
            &documents,
            &embedder,
            &IngestionOptions::default(),
        )
        .await;
        assert_eq!(outcome.rows_stored, 1);

        let stored = documents.scan_documents().await.unwrap();
        let written = &stored[0];
        let fetched = documents
            .fetch_document(&written.id)
            .await
            .unwrap()
            .expect("document should exist");

        assert_eq!(fetched.metadata, written.metadata);
        assert_eq!(fetched.metadata.batch_id.as_deref(), Some("batch-1"));
        assert_eq!(fetched.metadata.id.as_deref(), Some(written.id.as_str()));
        assert_eq!(fetched.vector.len(), 4);
    }

    #[tokio::test]
    async fn invalid_rows_are_reported_not_fatal() {
        let mut table = purchase_table(&["Aspirin", "Gauze"]);
        table.rows[1][3] = json!(0); // quantity

        let transactions = RecordingTransactionIndex::default();
        let documents = MemoryDocumentIndex::default();
        let embedder = FlakyEmbedder { marker: "NEVER" };

        let outcome = run_batch(
            &table,
            report(),
            &transactions,
            &documents,
            &embedder,
            &IngestionOptions::default(),
        )
        .await;

        assert_eq!(outcome.rows_received, 2);
        assert_eq!(outcome.rows_stored, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].stage, FailureStage::Validation);
    }

    #[tokio::test]
    async fn store_outage_is_recorded_per_row() {
        let table = purchase_table(&["Aspirin", "Gauze"]);
        let transactions = RecordingTransactionIndex::default();
        let documents = MemoryDocumentIndex {
            fail_upserts: true,
            ..Default::default()
        };
        let embedder = FlakyEmbedder { marker: "NEVER" };

        let outcome = run_batch(
            &table,
            report(),
            &transactions,
            &documents,
            &embedder,
            &IngestionOptions::default(),
        )
        .await;

        assert_eq!(outcome.rows_stored, 0);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome
            .failures
            .iter()
            .all(|failure| failure.stage == FailureStage::Store));
    }

    #[tokio::test]
    async fn batch_id_is_stamped_on_every_stored_document() {
        let table = purchase_table(&["Aspirin", "Gauze", "Saline"]);
        let transactions = RecordingTransactionIndex::default();
        let documents = MemoryDocumentIndex::default();
        let embedder = FlakyEmbedder { marker: "NEVER" };

        run_batch(
            &table,
            report(),
            &transactions,
            &documents,
            &embedder,
            &IngestionOptions::default(),
        )
        .await;

        let page = documents.batch_documents("batch-1", 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].metadata.record.transaction_id, "T-2");
    }
}
