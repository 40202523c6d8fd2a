//! HTTP surface
//!
//! `POST /upload` ingests a multipart file, `POST /query` answers a question and
//! `GET /health` reports readiness. The pipeline is built in the background after
//! the listener binds; until then requests fail with "RAG system not initialized".
//! If building it fails, requests and `/health` report the startup error instead.


use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::rag::RagPipeline;
use crate::{RagError, Result};

/// Multipart field that carries the uploaded document
pub const UPLOAD_FIELD: &str = "file";

const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Shared handler state; the pipeline or the startup error is set exactly once
#[derive(Clone, Default)]
pub struct AppState {
    pipeline: Arc<OnceCell<Arc<RagPipeline>>>,
    startup_error: Arc<OnceCell<String>>,
    upload_dir: Option<PathBuf>,
}

impl AppState {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// State that is ready immediately
    #[inline]
    pub fn with_pipeline(pipeline: Arc<RagPipeline>) -> Self {
        let state = Self::new();
        state.initialize(pipeline);
        state
    }

    /// Stage uploads in `dir` instead of the system temp directory
    #[inline]
    pub fn with_upload_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.upload_dir = dir;
        self
    }

    /// Publish the pipeline. Later calls are ignored.
    #[inline]
    pub fn initialize(&self, pipeline: Arc<RagPipeline>) {
        if self.pipeline.set(pipeline).is_err() {
            warn!("RAG pipeline was already initialized");
        }
    }

    /// Record that startup could not build the pipeline
    #[inline]
    pub fn fail(&self, reason: String) {
        if self.startup_error.set(reason).is_err() {
            warn!("RAG startup failure was already recorded");
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.pipeline.initialized()
    }

    #[inline]
    pub fn startup_error(&self) -> Option<&str> {
        self.startup_error.get().map(String::as_str)
    }

    fn pipeline(&self) -> Result<Arc<RagPipeline>> {
        if let Some(pipeline) = self.pipeline.get() {
            return Ok(Arc::clone(pipeline));
        }
        match self.startup_error() {
            Some(reason) => Err(RagError::InitializationFailed(reason.to_string())),
            None => Err(RagError::NotInitialized),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub response: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub initialized: bool,
    pub chunks: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Every request failure is reported as 500 with a `detail` message
#[derive(Debug)]
pub struct ApiError(RagError);

impl From<RagError> for ApiError {
    #[inline]
    fn from(error: RagError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Request failed: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                detail: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[inline]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/upload", post(upload_document))
        .route("/query", post(query_documents))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr`, start building the pipeline in the background and serve until Ctrl-C
#[inline]
pub async fn serve(config: Config, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("RAG service listening on {}", listener.local_addr()?);

    let state = AppState::new().with_upload_dir(config.server.upload_dir.clone());
    tokio::spawn(initialize(config, state.clone()));

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("RAG service stopped");
    Ok(())
}

/// Build the pipeline, load `data_dir` best-effort, then publish it to `state`.
/// A pipeline that cannot be built is recorded as a startup failure.
#[inline]
pub async fn initialize(config: Config, state: AppState) {
    let pipeline = match RagPipeline::from_config(&config).await {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            error!("Failed to initialize RAG system: {}", e);
            state.fail(e.to_string());
            return;
        }
    };

    if config.data_dir.is_dir() {
        let report = pipeline.ingest_directory(&config.data_dir).await;
        info!(
            "Loaded {} document chunks from {}",
            report.chunks_added,
            config.data_dir.display()
        );
        for (path, reason) in &report.failures {
            warn!("Error loading {}: {}", path.display(), reason);
        }
    } else {
        info!(
            "Data directory {} not found, starting with the persisted store only",
            config.data_dir.display()
        );
    }

    state.initialize(pipeline);
    info!("RAG system initialized");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received interrupt signal, shutting down");
}

async fn upload_document(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> std::result::Result<Json<MessageResponse>, ApiError> {
    let pipeline = state.pipeline()?;
    let mut multipart =
        multipart.map_err(|rejection| RagError::InvalidRequest(rejection.body_text()))?;
    let (filename, temp_file) =
        receive_upload(&mut multipart, state.upload_dir.as_deref()).await?;

    let added = pipeline.ingest_file(temp_file.path(), &filename).await?;
    debug!("Upload '{}' added {} chunks", filename, added);

    // temp_file is deleted on drop
    Ok(Json(MessageResponse {
        message: format!("Successfully processed {}", filename),
    }))
}

/// Stream the `file` field into a temporary file, in `upload_dir` when given
async fn receive_upload(
    multipart: &mut Multipart,
    upload_dir: Option<&Path>,
) -> Result<(String, NamedTempFile)> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| RagError::Ingestion(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!("Ignoring multipart field {:?}", field.name());
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| RagError::Ingestion("Uploaded file has no filename".to_string()))?;

        let mut temp_file = match upload_dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        while let Some(bytes) = field
            .chunk()
            .await
            .map_err(|e| RagError::Ingestion(format!("Failed to read upload: {}", e)))?
        {
            temp_file.write_all(&bytes)?;
        }
        temp_file.flush()?;

        return Ok((filename, temp_file));
    }

    Err(RagError::Ingestion(format!(
        "Missing multipart field '{}'",
        UPLOAD_FIELD
    )))
}

async fn query_documents(
    State(state): State<AppState>,
    params: std::result::Result<Query<QueryParams>, QueryRejection>,
) -> std::result::Result<Json<QueryResponse>, ApiError> {
    let pipeline = state.pipeline()?;
    let Query(params) =
        params.map_err(|rejection| RagError::InvalidRequest(rejection.body_text()))?;
    let response = pipeline.query(&params.query).await?;
    Ok(Json(QueryResponse { response }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let Ok(pipeline) = state.pipeline() else {
        let error = state.startup_error().map(str::to_string);
        let status = if error.is_some() { "failed" } else { "initializing" };
        return Json(HealthResponse {
            status: status.to_string(),
            initialized: false,
            chunks: None,
            error,
        });
    };

    let chunks = match pipeline.store().count().await {
        Ok(count) => Some(count),
        Err(e) => {
            warn!("Failed to count chunks: {}", e);
            None
        }
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        initialized: true,
        chunks,
        error: None,
    })
}
