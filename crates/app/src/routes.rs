use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use supply_chat_core::{
    run_batch, upload_checksum, BackendError, BatchReport, EmbeddingDocument, IngestError,
    IngestionOptions, TableData, TransactionFilter, TransactionRecord, VendorCount,
    MAX_PAGE_LIMIT, SUGGESTED_PROMPTS,
};
use supply_chat_core::{DocumentIndex, TransactionIndex};
use supply_chat_core::CompletionBackend;
use tracing::{error, info};
use uuid::Uuid;

use crate::state::AppState;

const UPLOAD_BODY_LIMIT: usize = 32 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/v1/uploads", post(upload_file))
        .route("/api/v1/uploads/parsed", post(upload_parsed))
        .route("/api/v1/batches/{batch_id}", get(batch_report))
        .route("/api/v1/batches/{batch_id}/records", get(batch_records))
        .route("/api/v1/chat", post(chat))
        .route("/api/v1/search", get(search))
        .route("/api/v1/transactions", get(list_transactions))
        .route("/api/v1/transactions/analytics", get(transaction_analytics))
        .route("/api/v1/transactions/{transaction_id}", get(get_transaction))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn not_found(message: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn backend_error(error: BackendError) -> ApiError {
    error!(%error, "backend call failed");
    let status = match error {
        BackendError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(ErrorBody {
            message: error.to_string(),
        }),
    )
}

fn ingest_error(error: IngestError) -> ApiError {
    bad_request(error.to_string())
}

#[derive(Serialize)]
struct RootBanner {
    message: String,
}

async fn root() -> Json<RootBanner> {
    Json(RootBanner {
        message: format!("supply-chat-api v{}", env!("CARGO_PKG_VERSION")),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    dependencies: DependencyHealth,
}

#[derive(Serialize)]
struct DependencyHealth {
    relational_store: &'static str,
    document_store: &'static str,
    completion_api: &'static str,
}

fn up_or_down(healthy: bool) -> &'static str {
    if healthy {
        "up"
    } else {
        "down"
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (relational, document, completion) = tokio::join!(
        state.transactions.ping(),
        state.documents.ping(),
        state.completion.ping(),
    );

    let all_up = relational.is_ok() && document.is_ok() && completion.is_ok();
    Json(HealthResponse {
        status: if all_up { "healthy" } else { "degraded" },
        dependencies: DependencyHealth {
            relational_store: up_or_down(relational.is_ok()),
            document_store: up_or_down(document.is_ok()),
            completion_api: up_or_down(completion.is_ok()),
        },
    })
}

#[derive(Serialize)]
struct UploadAck {
    status: &'static str,
    batch_id: String,
    rows_loaded: usize,
    filename: String,
}

async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadAck>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| bad_request(format!("malformed multipart body: {error}")))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|error| bad_request(format!("failed to read upload: {error}")))?;

        let table = TableData::from_upload(&filename, &bytes).map_err(ingest_error)?;
        let checksum = upload_checksum(&bytes);
        return Ok(enqueue_batch(&state, table, filename, checksum).await);
    }

    Err(bad_request("upload must include a file field"))
}

#[derive(Deserialize)]
struct ParsedUpload {
    headers: Vec<String>,
    rows: Vec<Vec<Value>>,
    filename: Option<String>,
}

async fn upload_parsed(
    State(state): State<AppState>,
    Json(payload): Json<ParsedUpload>,
) -> Result<(StatusCode, Json<UploadAck>), ApiError> {
    let serialized = serde_json::to_vec(&payload.rows).unwrap_or_default();
    let checksum = upload_checksum(&serialized);
    let filename = payload
        .filename
        .unwrap_or_else(|| "parsed-payload".to_string());

    let table = TableData::from_parsed(payload.headers, payload.rows).map_err(ingest_error)?;
    Ok(enqueue_batch(&state, table, filename, checksum).await)
}

/// Registers the batch, detaches the pipeline task, and acknowledges
/// immediately. `rows_loaded` stays 0 on this path; the real counts are on
/// the batch report surface.
async fn enqueue_batch(
    state: &AppState,
    table: TableData,
    filename: String,
    checksum: String,
) -> (StatusCode, Json<UploadAck>) {
    let batch_id = Uuid::new_v4().to_string();
    let report = BatchReport::enqueued(batch_id.clone(), filename.clone(), checksum);

    state
        .reports
        .write()
        .await
        .insert(batch_id.clone(), report.clone());

    info!(batch_id = %batch_id, filename = %filename, rows = table.row_count(), "batch enqueued");

    let task_state = state.clone();
    tokio::spawn(async move {
        let outcome = run_batch(
            &table,
            report,
            &task_state.transactions,
            &task_state.documents,
            &task_state.embedder,
            &IngestionOptions::default(),
        )
        .await;

        task_state
            .reports
            .write()
            .await
            .insert(outcome.batch_id.clone(), outcome);
    });

    (
        StatusCode::ACCEPTED,
        Json(UploadAck {
            status: "enqueued",
            batch_id,
            rows_loaded: 0,
            filename,
        }),
    )
}

async fn batch_report(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchReport>, ApiError> {
    state
        .reports
        .read()
        .await
        .get(&batch_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found(format!("unknown batch {batch_id}")))
}

#[derive(Deserialize)]
struct RecordsQuery {
    offset: Option<usize>,
    limit: Option<usize>,
}

async fn batch_records(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    Query(page): Query<RecordsQuery>,
) -> Result<Json<Vec<EmbeddingDocument>>, ApiError> {
    let offset = page.offset.unwrap_or(0);
    let limit = page.limit.unwrap_or(100);
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(bad_request(format!(
            "limit must be between 1 and {MAX_PAGE_LIMIT}"
        )));
    }

    let documents = state
        .documents
        .batch_documents(&batch_id, offset, limit)
        .await
        .map_err(backend_error)?;

    Ok(Json(documents))
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    session_id: Option<String>,
    csv_data: Option<CsvData>,
}

#[derive(Deserialize)]
struct CsvData {
    headers: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    suggestions: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
    session_id: String,
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    // inline csv context replaces any store lookup; this path is
    // synchronous, so a malformed table is fatal
    let inline_table = request
        .csv_data
        .map(|csv| TableData::from_parsed(csv.headers, csv.rows))
        .transpose()
        .map_err(ingest_error)?;

    let outcome = state
        .chat
        .answer(&request.message, inline_table.as_ref())
        .await
        .map_err(ingest_error)?;

    Ok(Json(ChatResponse {
        response: outcome.answer.response,
        suggestions: SUGGESTED_PROMPTS.to_vec(),
        context: outcome.context_note,
        session_id: request
            .session_id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
    }))
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<EmbeddingDocument>>, ApiError> {
    if params.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let documents = state
        .documents
        .search_text(&params.query, state.search_limit)
        .await
        .map_err(backend_error)?;

    Ok(Json(documents))
}

#[derive(Deserialize)]
struct TransactionsQuery {
    offset: Option<i64>,
    limit: Option<i64>,
    year: Option<i32>,
    vendor: Option<String>,
}

async fn list_transactions(
    State(state): State<AppState>,
    Query(params): Query<TransactionsQuery>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    let limit = params.limit.unwrap_or(100);
    if limit < 1 || limit > MAX_PAGE_LIMIT as i64 {
        return Err(bad_request(format!(
            "limit must be between 1 and {MAX_PAGE_LIMIT}"
        )));
    }

    let filter = TransactionFilter {
        year: params.year,
        vendor: params.vendor,
        offset: params.offset.unwrap_or(0).max(0),
        limit,
    };

    let records = state
        .transactions
        .list_transactions(&filter)
        .await
        .map_err(backend_error)?;

    Ok(Json(records))
}

#[derive(Deserialize)]
struct AnalyticsQuery {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

async fn transaction_analytics(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<Vec<VendorCount>>, ApiError> {
    let counts = state
        .transactions
        .vendor_counts(params.start_date, params.end_date)
        .await
        .map_err(backend_error)?;

    Ok(Json(counts))
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionRecord>, ApiError> {
    state
        .transactions
        .find_transaction(&transaction_id)
        .await
        .map_err(backend_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("transaction {transaction_id} not found")))
}
