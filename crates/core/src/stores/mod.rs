pub mod qdrant;
pub mod sqlite;

pub use qdrant::QdrantDocumentStore;
pub use sqlite::SqliteTransactionStore;
