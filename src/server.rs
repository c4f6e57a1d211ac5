// src/server.rs

use std::error::Error;
use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::analyzer::DocumentAnalyzer;
use crate::config::ServerSection;
use crate::document::LogisticsDocumentResult;

#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<DocumentAnalyzer>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeTextRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default, rename = "fileName")]
    pub file_name: Option<String>,
}

struct Upload {
    bytes: Vec<u8>,
    file_name: Option<String>,
}

pub fn create_router(state: AppState, max_upload_mb: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/document/analyze", post(analyze_text))
        .route("/api/document/analyze-pdf", post(analyze_pdf))
        .route("/api/document/analyze-image", post(analyze_image))
        .layer(DefaultBodyLimit::max(max_upload_mb.saturating_mul(1024 * 1024)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C, then wait for pending sink appends.
pub async fn serve(analyzer: Arc<DocumentAnalyzer>, cfg: &ServerSection) -> Result<(), Box<dyn Error>> {
    let listener = tokio::net::TcpListener::bind((cfg.host.as_str(), cfg.port)).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    let app = create_router(
        AppState {
            analyzer: Arc::clone(&analyzer),
        },
        cfg.max_upload_mb,
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, draining pending appends");
    analyzer.persistence().drain().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn analyze_text(
    State(state): State<AppState>,
    body: Result<Json<AnalyzeTextRequest>, JsonRejection>,
) -> Json<LogisticsDocumentResult> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(e) => {
            warn!(error = %e, "Rejected JSON body");
            return Json(LogisticsDocumentResult::empty());
        }
    };
    Json(
        state
            .analyzer
            .analyze_text(&request.text, request.file_name.as_deref())
            .await,
    )
}

async fn analyze_pdf(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Json<LogisticsDocumentResult> {
    let Some(upload) = read_upload(multipart).await else {
        return Json(LogisticsDocumentResult::empty());
    };
    Json(
        state
            .analyzer
            .analyze_pdf(upload.bytes, upload.file_name.as_deref())
            .await,
    )
}

async fn analyze_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Json<LogisticsDocumentResult> {
    let Some(upload) = read_upload(multipart).await else {
        return Json(LogisticsDocumentResult::empty());
    };
    let extension = upload
        .file_name
        .as_deref()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "png".to_string());
    Json(
        state
            .analyzer
            .analyze_image(upload.bytes, &extension, upload.file_name.as_deref())
            .await,
    )
}

/// The `file` part, named by the `fileName` part or else by the upload's own
/// file name. `None` when the body is unreadable or has no file.
async fn read_upload(multipart: Result<Multipart, MultipartRejection>) -> Option<Upload> {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "Rejected multipart body");
            return None;
        }
    };

    let mut bytes = None;
    let mut file_name = None;
    let mut original_name = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Malformed multipart body");
                return None;
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                original_name = field.file_name().map(str::to_string);
                match field.bytes().await {
                    Ok(data) => bytes = Some(data.to_vec()),
                    Err(e) => {
                        warn!(error = %e, "Failed to read uploaded file");
                        return None;
                    }
                }
            }
            "fileName" => {
                file_name = field.text().await.ok().filter(|n| !n.trim().is_empty());
            }
            _ => {}
        }
    }

    let Some(bytes) = bytes else {
        warn!("Upload without a file part");
        return None;
    };
    Some(Upload {
        bytes,
        file_name: file_name.or(original_name),
    })
}
