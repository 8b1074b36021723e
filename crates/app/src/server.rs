use anyhow::Context;
use axum::{
    extract::{
        multipart::MultipartError, rejection::QueryRejection, DefaultBodyLimit, Multipart, Query,
        State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use docsearch_core::{IngestError, IngestionService, QueryError, QueryService, UploadedFile};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::error;

const INDEX_HTML: &str = include_str!("../static/index.html");
const SCRIPT_JS: &str = include_str!("../static/script.js");
const UPLOAD_FIELD: &str = "file";
const FALLBACK_FILENAME: &str = "upload";

pub struct AppState {
    pub ingestion: IngestionService,
    pub query: QueryService,
}

impl AppState {
    pub fn new(ingestion: IngestionService, query: QueryService) -> Self {
        Self { ingestion, query }
    }
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub cors_origins: Vec<HeaderValue>,
    pub max_upload_bytes: usize,
}

impl HttpSettings {
    pub fn new(cors_origins: &[String], max_upload_bytes: usize) -> anyhow::Result<Self> {
        let cors_origins = cors_origins
            .iter()
            .map(|origin| origin.trim())
            .filter(|origin| !origin.is_empty())
            .map(|origin| {
                HeaderValue::from_str(origin).with_context(|| format!("invalid CORS origin {origin:?}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            cors_origins,
            max_upload_bytes,
        })
    }
}

pub fn build_router(state: Arc<AppState>, settings: &HttpSettings) -> Router {
    // Credentialed CORS forbids wildcards, so methods and headers echo the preflight.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(settings.cors_origins.clone()))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Router::new()
        .route("/", get(index))
        .route("/static/script.js", get(script))
        .route("/ingest", post(ingest))
        .route("/query", get(query))
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        SCRIPT_JS,
    )
}

async fn ingest(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let upload = read_upload(&mut multipart).await?;
    let filename = upload.filename.clone();

    let receipt = state
        .ingestion
        .ingest(upload)
        .await
        .map_err(|source| ApiError::Ingest { filename, source })?;

    Ok(Json(json!({
        "message": "Document ingested successfully",
        "doc_id": receipt.doc_id,
    })))
}

async fn read_upload(multipart: &mut Multipart) -> Result<UploadedFile, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(ApiError::Multipart)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or(FALLBACK_FILENAME)
            .to_string();
        let bytes = field.bytes().await.map_err(ApiError::Multipart)?;
        return Ok(UploadedFile::new(filename, bytes.to_vec()));
    }

    Err(ApiError::MissingUpload)
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    query: String,
    top_k: Option<usize>,
}

async fn query(
    State(state): State<Arc<AppState>>,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(params) = params.map_err(ApiError::QueryParams)?;
    let top_k = params.top_k.unwrap_or_else(|| state.query.default_top_k());
    let results = state
        .query
        .query(&params.query, top_k)
        .await
        .map_err(ApiError::Query)?;

    if results.is_empty() {
        return Ok(Json(json!({ "message": "No results found for the query" })));
    }

    Ok(Json(json!({ "query_results": results })))
}

#[derive(Debug)]
enum ApiError {
    MissingUpload,
    Multipart(MultipartError),
    Ingest { filename: String, source: IngestError },
    QueryParams(QueryRejection),
    Query(QueryError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::MissingUpload => {
                error!("ingest request without a `file` field");
                (
                    StatusCode::BAD_REQUEST,
                    json!({
                        "message": "Failed to process file",
                        "error": "multipart field `file` is required",
                    }),
                )
            }
            ApiError::Multipart(source) => {
                error!(error = %source, "unreadable multipart upload");
                (
                    source.status(),
                    json!({
                        "message": "Failed to process file",
                        "error": source.body_text(),
                    }),
                )
            }
            ApiError::Ingest { filename, source } => {
                error!(filename = %filename, error = %source, "error processing file");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "message": "Failed to process file",
                        "error": source.to_string(),
                    }),
                )
            }
            ApiError::QueryParams(rejection) => {
                error!(error = %rejection.body_text(), "invalid query parameters");
                (
                    StatusCode::BAD_REQUEST,
                    json!({
                        "message": "Query failed",
                        "error": rejection.body_text(),
                    }),
                )
            }
            ApiError::Query(QueryError::InvalidTopK) => {
                error!(error = %QueryError::InvalidTopK, "invalid query parameters");
                (
                    StatusCode::BAD_REQUEST,
                    json!({
                        "message": "Query failed",
                        "error": QueryError::InvalidTopK.to_string(),
                    }),
                )
            }
            ApiError::Query(source) => {
                error!(error = %source, "error querying documents");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "message": "Query failed" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
