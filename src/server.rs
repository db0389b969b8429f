//! HTTP server for retrieval-augmented chat and document ingestion.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/rag/chat` | Tenant-scoped RAG answer as plain text |
//! | `GET`  | `/rag/chat/stream` | Same, as Server-Sent Events |
//! | `GET`  | `/rag/models` | Structured [`ModelCatalog`] decoded from a RAG answer |
//! | `POST` | `/rag/documents` | Ingest a document under a tenant scope |
//! | `GET`  | `/rag/documents/id` | Compute the document id without ingesting |
//! | `GET`  | `/rag/search` | Tenant-filtered retrieval, no model call |
//! | `GET`  | `/chat/content` | Plain completion text |
//! | `GET`  | `/chat/stream` | Plain completion as Server-Sent Events |
//! | `GET`  | `/chat/response` | Full chat response JSON |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Tenant scope is passed as `userId` / `conversationId` query parameters
//! (or JSON fields for `POST /rag/documents`). Requests without a scope are
//! served unrestricted.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `chat_disabled` (400),
//! `embeddings_disabled` (400), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use rag_advisor_core::chat::{ChatResponse, ContentStream};
use rag_advisor_core::filter;
use rag_advisor_core::ingest::IngestOutcome;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::extract::ExtractError;
use crate::ingest::IngestError;
use crate::models::{
    DocIdParams, DocIdResponse, IngestRequest, MessageParams, ModelCatalog, RagChatParams,
    SearchParams, SearchResponse, DEFAULT_CHAT_MESSAGE, DEFAULT_MODELS_MESSAGE,
};
use crate::search::{search_documents, SearchError, SearchOptions};
use crate::service::RagService;
use crate::source::SourceError;

type AppState = Arc<RagService>;

/// Starts the HTTP server.
///
/// Builds the service from `config`, ingests the `[ingest].startup`
/// locators, then binds to `[server].bind` and serves until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(RagService::from_config(config).await?);

    if !config.ingest.startup.is_empty() {
        let ingested = service.ingest_startup().await;
        tracing::info!(
            ingested,
            configured = config.ingest.startup.len(),
            "startup ingestion finished"
        );
    }

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "RAG server listening");
    println!("RAG server listening on http://{}", bind_addr);

    axum::serve(listener, router(service)).await?;
    Ok(())
}

/// The full route table over a shared service.
pub fn router(service: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/rag/chat", get(handle_rag_chat))
        .route("/rag/chat/stream", get(handle_rag_chat_stream))
        .route("/rag/models", get(handle_rag_models))
        .route("/rag/documents", post(handle_ingest))
        .route("/rag/documents/id", get(handle_doc_id))
        .route("/rag/search", get(handle_search))
        .route("/chat/content", get(handle_chat_content))
        .route("/chat/stream", get(handle_chat_stream))
        .route("/chat/response", get(handle_chat_response))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(service)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn forbidden(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::FORBIDDEN,
        code: "forbidden".to_string(),
        message: message.into(),
    }
}

fn chat_disabled() -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "chat_disabled".to_string(),
        message: "chat provider is disabled; set [chat] provider in config".to_string(),
    }
}

fn embeddings_disabled() -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "embeddings_disabled".to_string(),
        message: "embeddings are disabled; set [embedding] provider in config".to_string(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "request failed");
        internal(format!("{:#}", err))
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match &err {
            IngestError::SourceNotFound(_) => not_found(err.to_string()),
            IngestError::Source(SourceError::Forbidden(_)) => forbidden(err.to_string()),
            IngestError::Source(SourceError::Unsupported(_))
            | IngestError::Extract(ExtractError::UnsupportedContentType(_)) => {
                bad_request(err.to_string())
            }
            IngestError::Search(SearchError::Filter(_)) => bad_request(err.to_string()),
            _ => internal(err.to_string()),
        }
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Filter(e) => bad_request(format!("invalid filter expression: {}", e)),
            SearchError::Store(e) => internal(e.to_string()),
        }
    }
}

fn require_query(query: &str) -> Result<(), AppError> {
    if query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    Ok(())
}

fn require_chat(service: &RagService) -> Result<(), AppError> {
    if !service.chat_enabled() {
        return Err(chat_disabled());
    }
    Ok(())
}

fn require_embeddings(service: &RagService) -> Result<(), AppError> {
    if !service.embeddings_enabled() {
        return Err(embeddings_disabled());
    }
    Ok(())
}

/// Reject a malformed filter up front so it surfaces as a 400.
fn validate_filter(raw: Option<&str>) -> Result<(), AppError> {
    match raw.filter(|f| !f.trim().is_empty()) {
        Some(text) => filter::parse(text)
            .map(|_| ())
            .map_err(|e| bad_request(format!("invalid filter expression: {}", e))),
        None => Ok(()),
    }
}

fn sse(stream: ContentStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = stream.map(|item| {
        Ok(match item {
            Ok(text) => Event::default().data(text),
            Err(e) => {
                tracing::error!(error = %e, "stream failed");
                Event::default().event("error").data(e.to_string())
            }
        })
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /rag ============

async fn handle_rag_chat(
    State(service): State<AppState>,
    Query(params): Query<RagChatParams>,
) -> Result<String, AppError> {
    require_query(&params.query)?;
    require_chat(&service)?;
    require_embeddings(&service)?;
    validate_filter(params.filter.as_deref())?;

    let answer = service
        .ask(&params.query, &params.scope(), params.filter.as_deref())
        .await?;
    Ok(answer.content().to_string())
}

async fn handle_rag_chat_stream(
    State(service): State<AppState>,
    Query(params): Query<RagChatParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    require_query(&params.query)?;
    require_chat(&service)?;
    require_embeddings(&service)?;
    validate_filter(params.filter.as_deref())?;

    let stream = service
        .ask_stream(&params.query, &params.scope(), params.filter.as_deref())
        .await?;
    Ok(sse(stream))
}

async fn handle_rag_models(
    State(service): State<AppState>,
    Query(params): Query<MessageParams>,
) -> Result<Json<ModelCatalog>, AppError> {
    require_chat(&service)?;
    require_embeddings(&service)?;
    let message = params.message.as_deref().unwrap_or(DEFAULT_MODELS_MESSAGE);
    Ok(Json(service.models(message).await?))
}

async fn handle_ingest(
    State(service): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestOutcome>, AppError> {
    if request.url.trim().is_empty() {
        return Err(bad_request("url must not be empty"));
    }
    require_embeddings(&service)?;
    let outcome = service.documents().save(&request.url, &request.scope()).await?;
    Ok(Json(outcome))
}

async fn handle_doc_id(
    State(service): State<AppState>,
    Query(params): Query<DocIdParams>,
) -> Result<Json<DocIdResponse>, AppError> {
    if params.url.trim().is_empty() {
        return Err(bad_request("url must not be empty"));
    }
    let doc_id = service
        .documents()
        .generate_doc_id(&params.url, &params.scope())
        .await?;
    Ok(Json(DocIdResponse {
        doc_id: doc_id.into_string(),
    }))
}

async fn handle_search(
    State(service): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    require_query(&params.query)?;
    require_embeddings(&service)?;

    let retrieval = &service.config().retrieval;
    let options = SearchOptions {
        top_k: params.top_k.unwrap_or(retrieval.top_k),
        similarity_threshold: retrieval.similarity_threshold,
        raw_filter: params.filter.as_deref(),
    };
    let results =
        search_documents(service.store().as_ref(), &params.query, &params.scope(), options).await?;
    Ok(Json(SearchResponse { results }))
}

// ============ /chat ============

fn chat_message(params: &MessageParams) -> &str {
    params
        .message
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(DEFAULT_CHAT_MESSAGE)
}

async fn handle_chat_content(
    State(service): State<AppState>,
    Query(params): Query<MessageParams>,
) -> Result<String, AppError> {
    require_chat(&service)?;
    let answer = service.complete(chat_message(&params)).await?;
    Ok(answer.content().to_string())
}

async fn handle_chat_stream(
    State(service): State<AppState>,
    Query(params): Query<MessageParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    require_chat(&service)?;
    let stream = service.complete_stream(chat_message(&params)).await?;
    Ok(sse(stream))
}

async fn handle_chat_response(
    State(service): State<AppState>,
    Query(params): Query<MessageParams>,
) -> Result<Json<ChatResponse>, AppError> {
    require_chat(&service)?;
    let answer = service.complete(chat_message(&params)).await?;
    Ok(Json(answer.into_chat_response()))
}
