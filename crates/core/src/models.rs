use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One purchasing event after header canonicalization and casting.
///
/// Only the fields the validation pass requires are non-optional; everything
/// else survives as `None` and is rendered leniently downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub facility_id: String,
    pub facility_type: Option<String>,
    pub region: Option<String>,
    pub bed_size: Option<String>,
    pub month: Option<i32>,
    pub year: Option<i32>,
    pub load_date: NaiveDate,
    pub vendor: Option<String>,
    pub vendor_id: Option<String>,
    pub manufacturer: Option<String>,
    pub catalog_number: Option<String>,
    pub item_desc: Option<String>,
    pub quantity: i64,
    pub price_paid: f64,
    pub total_spend: f64,
    pub unit_cost: Option<f64>,
}

/// Metadata carried by every chunk: the canonical record plus the generated
/// document id and the batch the row arrived in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub id: Option<String>,
    pub batch_id: Option<String>,
    #[serde(flatten)]
    pub record: TransactionRecord,
}

/// A (sentence, metadata) pair derived 1:1 from a transaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Document owned by the document store. The vector is computed before the
/// first write, so a stored document always carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingDocument {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// One ranked retrieval hit. `score` is `None` for keyword matches, which
/// carry no ranking beyond row order.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VendorCount {
    pub vendor: String,
    pub transactions: i64,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub year: Option<i32>,
    pub vendor: Option<String>,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Validation,
    Embedding,
    Store,
}

/// Per-row outcome recorded when a unit of work is dropped. Failures are
/// terminal for the row, never for the surrounding batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowFailure {
    pub row_index: usize,
    pub stage: FailureStage,
    pub reason: String,
}

/// Structured outcome of one background ingestion run, pollable by batch id.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub filename: String,
    pub checksum: String,
    pub status: BatchStatus,
    pub rows_received: usize,
    pub rows_stored: usize,
    pub failures: Vec<RowFailure>,
    pub warnings: Vec<String>,
    pub enqueued_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchReport {
    pub fn enqueued(batch_id: String, filename: String, checksum: String) -> Self {
        Self {
            batch_id,
            filename,
            checksum,
            status: BatchStatus::Running,
            rows_received: 0,
            rows_stored: 0,
            failures: Vec::new(),
            warnings: Vec::new(),
            enqueued_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// The answer envelope: completion text plus the metadata of every chunk
/// that contributed context, stamped at generation time.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub response: String,
    pub sources: Vec<ChunkMetadata>,
    pub generated_at: DateTime<Utc>,
}
