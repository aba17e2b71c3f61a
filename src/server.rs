//! HTTP front-end: multipart PDF upload → JSON line items.
//!
//! Routes:
//! - `GET /health`: liveness probe
//! - `GET /`: service banner
//! - `POST /extract-invoice`: multipart form with a `file` field
//!
//! The handler does input acquisition and response shaping only; the work is
//! [`InvoiceExtractor::extract`]. One extractor is shared by every request.

use crate::error::InvoiceError;
use crate::extract::InvoiceExtractor;
use crate::output::InvoiceResponse;
use crate::pipeline::input::validate_pdf_name;
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub const HEALTH_PATH: &str = "/health";
pub const EXTRACT_PATH: &str = "/extract-invoice";
/// Multipart field carrying the PDF.
pub const UPLOAD_FIELD: &str = "file";
/// Default request body limit: 25 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 25 * 1024 * 1024;

const SERVICE_NAME: &str = "Invoice Extraction API";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address `{address}`: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("axum server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone)]
struct AppState {
    extractor: Arc<InvoiceExtractor>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct RootResponse {
    message: &'static str,
    version: &'static str,
}

/// Error body: `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }
}

impl From<InvoiceError> for ApiError {
    fn from(error: InvoiceError) -> Self {
        if error.is_input_rejection() {
            ApiError::bad_request(error.to_string())
        } else {
            tracing::error!(%error, "extraction failed");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Processing error: {error}"),
            )
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        ApiError::new(error.status(), error.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

/// Build the application router.
pub fn build_router(extractor: Arc<InvoiceExtractor>, body_limit: usize) -> Router {
    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
        tracing::info_span!(
            "http.request",
            method = %request.method(),
            path = %request.uri().path()
        )
    });

    Router::new()
        .route(HEALTH_PATH, get(health))
        .route("/", get(root))
        .route(EXTRACT_PATH, post(extract_invoice))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(trace_layer)
        .with_state(AppState { extractor })
}

/// Bind `listen` and serve until Ctrl+C or SIGTERM.
pub async fn serve(
    listen: &str,
    extractor: Arc<InvoiceExtractor>,
    body_limit: usize,
) -> Result<(), ServerError> {
    let addr: SocketAddr = listen
        .trim()
        .parse()
        .map_err(|source| ServerError::InvalidListenAddr {
            address: listen.to_string(),
            source,
        })?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: addr.to_string(),
            source,
        })?;
    let local_addr = listener.local_addr().unwrap_or(addr);
    tracing::info!(%local_addr, "invoice extraction server listening");

    axum::serve(listener, build_router(extractor, body_limit))
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .map_err(|source| ServerError::Serve { source })?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        message: "Invoice Extraction API is running",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn root() -> impl IntoResponse {
    Json(RootResponse {
        message: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn extract_invoice(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<InvoiceResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        // Reject by name before buffering the body.
        validate_pdf_name(&filename)?;
        let bytes = field.bytes().await?;
        upload = Some((filename, bytes));
        break;
    }

    let Some((filename, bytes)) = upload else {
        return Err(ApiError::bad_request(format!(
            "Missing multipart field '{UPLOAD_FIELD}'"
        )));
    };

    tracing::info!(%filename, size = bytes.len(), "invoice upload received");
    let output = state.extractor.extract(&bytes, &filename).await?;
    Ok(Json(output.into_response()))
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to capture Ctrl+C signal");
            std::future::pending::<()>().await;
        }
        "ctrl-c"
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to capture SIGTERM");
                std::future::pending::<()>().await;
            }
        }
        "sigterm"
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<&str>();

    let event = tokio::select! {
        event = ctrl_c => event,
        event = sigterm => event,
    };
    tracing::info!(event, "shutdown signal received; draining connections");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_rejection_maps_to_400_with_reason() {
        let api = ApiError::from(InvoiceError::InputRejected {
            reason: "Only PDF files are supported".into(),
        });
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.detail, "Only PDF files are supported");
    }

    #[test]
    fn processing_failures_map_to_500() {
        let api = ApiError::from(InvoiceError::DocumentRead {
            detail: "bad xref".into(),
        });
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            api.detail,
            "Processing error: Could not read PDF document: bad xref"
        );
    }
}
