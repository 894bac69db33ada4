//! HTTP API: document upload and search endpoints in front of the
//! knowledge-base service.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Db;
use crate::domain::{Document, RawDocument};
use crate::error::{KbragError, Result};
use crate::kb::KnowledgeBaseService;
use crate::vectordb::ChunkHit;

/// HTTP server wrapper around the knowledge-base service.
pub struct HttpServer {
    state: AppState,
    allowed_origins: Vec<String>,
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    service: Arc<KnowledgeBaseService>,
    db: Arc<Db>,
    default_k: usize,
}

impl HttpServer {
    pub fn new(service: Arc<KnowledgeBaseService>, db: Arc<Db>, config: &Config) -> Self {
        Self {
            state: AppState {
                service,
                db,
                default_k: config.search.default_k,
            },
            allowed_origins: config.http_server.allowed_origins.clone(),
        }
    }

    /// Run the HTTP server
    pub async fn run(&self, port: u16) -> Result<()> {
        let app = self.create_router();

        let addr = format!("127.0.0.1:{}", port);
        log::info!("Starting HTTP server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            KbragError::Config(format!("Failed to bind to {}: {}", addr, e))
        })?;

        axum::serve(listener, app).await.map_err(|e| {
            KbragError::Storage(std::io::Error::other(format!("HTTP server error: {}", e)))
        })?;

        Ok(())
    }

    /// Create the axum router
    fn create_router(&self) -> Router {
        // CORS mirrors the configured origin list; unrestricted when the
        // list is empty (local dev).
        let cors = if self.allowed_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/health", get(handle_health))
            .route("/ready", get(handle_ready))
            .route(
                "/v1/users/:username/kbs/:kb_name/documents",
                post(handle_add_document),
            )
            .route("/v1/users/:username/kbs/:kb_name/search", get(handle_search))
            .route(
                "/v1/users/:username/kbs/:kb_name/keyword-search",
                get(handle_keyword_search),
            )
            .route(
                "/v1/users/:username/kbs/:kb_name/chunk-count",
                get(handle_chunk_count),
            )
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors),
            )
            .with_state(self.state.clone())
    }
}

/// Error wrapper carrying the service error into an HTTP response.
struct ApiError(KbragError);

impl From<KbragError> for ApiError {
    fn from(e: KbragError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            KbragError::NotFound(_) => StatusCode::NOT_FOUND,
            KbragError::Validation(_) => StatusCode::BAD_REQUEST,
            KbragError::Conflict(_) => StatusCode::CONFLICT,
            KbragError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "kbrag",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

/// Readiness: the vector database must answer a trivial query.
async fn handle_ready(State(state): State<AppState>) -> ApiResult<Response> {
    state
        .db
        .with_connection(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(KbragError::Database)
        })
        .await?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "status": "ready" }))).into_response())
}

#[derive(Deserialize)]
struct AddDocumentParams {
    doc_name: String,
    #[serde(default = "default_source")]
    source: String,
}

fn default_source() -> String {
    "upload".to_string()
}

async fn handle_add_document(
    State(state): State<AppState>,
    Path((username, kb_name)): Path<(String, String)>,
    Query(params): Query<AddDocumentParams>,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<Document>)> {
    if body.is_empty() {
        return Err(KbragError::Validation("Document body is empty".to_string()).into());
    }
    let raw = RawDocument::new(params.doc_name, params.source, body.to_vec());
    let document = state
        .service
        .add_document(raw, &username, &kb_name)
        .await?;
    Ok((StatusCode::CREATED, Json(document)))
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    k: Option<usize>,
}

#[derive(Serialize)]
struct ScoredChunk {
    #[serde(flatten)]
    chunk: ChunkHit,
    /// Cosine similarity in [-1, 1]; results are ordered descending
    score: f32,
}

async fn handle_search(
    State(state): State<AppState>,
    Path((_username, kb_name)): Path<(String, String)>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<ScoredChunk>>> {
    let k = params.k.unwrap_or(state.default_k);
    let hits = state
        .service
        .similarity_search_with_score(&params.q, &kb_name, k)
        .await?;
    let hits = hits
        .into_iter()
        .map(|(chunk, score)| ScoredChunk { chunk, score })
        .collect();
    Ok(Json(hits))
}

async fn handle_keyword_search(
    State(state): State<AppState>,
    Path((username, kb_name)): Path<(String, String)>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<crate::bm25::Bm25Hit>>> {
    let k = params.k.unwrap_or(state.default_k);
    let hits = state
        .service
        .keyword_search(&username, &kb_name, &params.q, k)
        .await?;
    Ok(Json(hits))
}

async fn handle_chunk_count(
    State(state): State<AppState>,
    Path((_username, kb_name)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let count = state.service.kb_chunk_count(&kb_name).await?;
    Ok(Json(serde_json::json!({
        "kb_name": kb_name,
        "chunk_count": count
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                KbragError::NotFound("x".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                KbragError::Validation("x".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                KbragError::Conflict("x".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                KbragError::Parse("x".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                KbragError::ExternalService("x".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_scored_chunk_flattens_fields() {
        let scored = ScoredChunk {
            chunk: ChunkHit {
                chunk_id: "abc".to_string(),
                filename: "paper.pdf".to_string(),
                chunk_number: 1,
                chunk_text: "text".to_string(),
            },
            score: 0.87,
        };
        let json = serde_json::to_value(&scored).unwrap();
        assert_eq!(json["filename"], "paper.pdf");
        assert_eq!(json["chunk_number"], 1);
        assert!(json["score"].as_f64().unwrap() > 0.8);
    }
}
