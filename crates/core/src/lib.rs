pub mod chat;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod prompt;
pub mod retrieve;
pub mod stores;
pub mod tabular;
pub mod traits;

pub use chat::{ChatOutcome, ChatService, FALLBACK_ANSWER, SUGGESTED_PROMPTS};
pub use chunk::{build_chunk, build_chunks, month_name};
pub use completion::ChatCompletionClient;
pub use config::{
    EmbeddingProvider, RetrievalStrategy, EMBED_SUB_BATCH, MAX_PAGE_LIMIT, MIN_YEAR,
    SCAN_PAGE_SIZE, UPSERT_SUB_BATCH,
};
pub use embeddings::{
    Embedder, EmbedderBackend, HashingEmbedder, RemoteEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{BackendError, IngestError};
pub use ingest::{run_batch, IngestionOptions};
pub use models::{
    BatchReport, BatchStatus, ChatAnswer, Chunk, ChunkMetadata, EmbeddingDocument, FailureStage,
    RetrievedChunk, RowFailure, TransactionFilter, TransactionRecord, VendorCount,
};
pub use normalize::{
    canonical_header, derive_unit_cost, normalize_table, NormalizedRow, NormalizedTable,
};
pub use prompt::{assemble_prompt, SYSTEM_INSTRUCTION};
pub use retrieve::{cosine_similarity, Retriever};
pub use stores::{QdrantDocumentStore, SqliteTransactionStore};
pub use tabular::{upload_checksum, TableData};
pub use traits::{CompletionBackend, DocumentIndex, TransactionIndex};
