mod routes;
mod state;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use supply_chat_core::{
    ChatCompletionClient, ChatService, Embedder, EmbedderBackend, EmbeddingProvider,
    HashingEmbedder, QdrantDocumentStore, RemoteEmbedder, RetrievalStrategy, Retriever,
    SqliteTransactionStore, DEFAULT_EMBEDDING_DIMENSIONS,
};
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::state::AppContext;

#[derive(Parser)]
#[command(name = "supply-chat-api", version)]
struct Cli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "SUPPLY_CHAT_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// SQLite file backing the relational transaction store.
    #[arg(long, env = "SUPPLY_CHAT_DB", default_value = "supply_chat.db")]
    database_path: String,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection holding embedding documents.
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "supply_records")]
    qdrant_collection: String,

    /// Retrieval strategy: keyword, vector, or scan.
    #[arg(long, env = "RETRIEVAL_STRATEGY", default_value = "vector")]
    retrieval_strategy: RetrievalStrategy,

    /// Embedding backend: hashing or remote.
    #[arg(long, env = "EMBEDDING_PROVIDER", default_value = "hashing")]
    embedding_provider: EmbeddingProvider,

    /// Base URL of the OpenAI-compatible embeddings endpoint.
    #[arg(
        long,
        env = "EMBEDDING_API_URL",
        default_value = "https://api.openai.com/v1"
    )]
    embedding_api_url: String,

    /// API key for the remote embedder.
    #[arg(long, env = "EMBEDDING_API_KEY")]
    embedding_api_key: Option<String>,

    /// Embedding model identifier.
    #[arg(
        long,
        env = "EMBEDDING_MODEL",
        default_value = "text-embedding-3-small"
    )]
    embedding_model: String,

    /// Vector width; must match what the embedding model produces.
    #[arg(
        long,
        env = "EMBEDDING_DIMENSIONS",
        default_value_t = DEFAULT_EMBEDDING_DIMENSIONS
    )]
    embedding_dimensions: usize,

    /// Base URL of the chat-completions gateway.
    #[arg(
        long,
        env = "COMPLETION_API_URL",
        default_value = "https://openrouter.ai/api/v1"
    )]
    completion_api_url: String,

    /// API key for the completion gateway.
    #[arg(long, env = "COMPLETION_API_KEY")]
    completion_api_key: Option<String>,

    /// Completion model identifier.
    #[arg(
        long,
        env = "COMPLETION_MODEL",
        default_value = "meta-llama/llama-4-scout:free"
    )]
    completion_model: String,

    /// Token budget per completion.
    #[arg(long, env = "COMPLETION_MAX_TOKENS", default_value_t = 500)]
    completion_max_tokens: u32,

    /// Chunks retrieved as context per chat query.
    #[arg(long, default_value_t = 5)]
    top_k: usize,

    /// Maximum hits returned by the search surface.
    #[arg(long, default_value_t = 50)]
    search_limit: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let transactions = SqliteTransactionStore::connect(&cli.database_path)
        .await
        .with_context(|| format!("failed to open database at {}", cli.database_path))?;
    transactions
        .ensure_schema()
        .await
        .context("failed to create transactions schema")?;

    let embedder = match cli.embedding_provider {
        EmbeddingProvider::Hashing => EmbedderBackend::Hashing(HashingEmbedder {
            dimensions: cli.embedding_dimensions,
        }),
        EmbeddingProvider::Remote => EmbedderBackend::Remote(
            RemoteEmbedder::new(
                &cli.embedding_api_url,
                cli.embedding_api_key.clone(),
                cli.embedding_model.clone(),
                cli.embedding_dimensions,
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?,
        ),
    };

    let documents = QdrantDocumentStore::new(
        &cli.qdrant_url,
        &cli.qdrant_collection,
        embedder.dimensions(),
    )
    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    // a down document store should degrade /health, not prevent boot
    if let Err(error) = documents.ensure_collection().await {
        warn!(%error, "document store not reachable at startup");
    }

    let completion = ChatCompletionClient::new(
        &cli.completion_api_url,
        cli.completion_api_key.clone(),
        cli.completion_model.clone(),
        cli.completion_max_tokens,
    )
    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    let retriever = Retriever::new(
        cli.retrieval_strategy,
        transactions.clone(),
        documents.clone(),
        embedder.clone(),
        cli.top_k,
    );
    let chat = ChatService::new(retriever, completion.clone());

    let context = Arc::new(AppContext {
        transactions: transactions.clone(),
        documents,
        embedder,
        completion,
        chat,
        reports: RwLock::new(HashMap::new()),
        search_limit: cli.search_limit,
    });

    info!(
        version = app_version,
        strategy = %cli.retrieval_strategy,
        embedding = %cli.embedding_provider,
        started_at = %Utc::now().to_rfc3339(),
        "supply-chat-api boot"
    );

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, routes::router(context))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;

    transactions.close().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
    }
}
