use std::collections::HashMap;
use std::sync::Arc;

use supply_chat_core::{
    BatchReport, ChatCompletionClient, ChatService, EmbedderBackend, QdrantDocumentStore,
    SqliteTransactionStore,
};
use tokio::sync::RwLock;

pub type AppChatService =
    ChatService<SqliteTransactionStore, QdrantDocumentStore, EmbedderBackend, ChatCompletionClient>;

/// Every shared handle, constructed once at startup and injected into the
/// handlers. No lazy first-use construction anywhere.
pub struct AppContext {
    pub transactions: SqliteTransactionStore,
    pub documents: QdrantDocumentStore,
    pub embedder: EmbedderBackend,
    pub completion: ChatCompletionClient,
    pub chat: AppChatService,
    /// Outcome reports for every batch enqueued this process lifetime,
    /// pollable by batch id.
    pub reports: RwLock<HashMap<String, BatchReport>>,
    pub search_limit: usize,
}

pub type AppState = Arc<AppContext>;
