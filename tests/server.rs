//! HTTP API tests: drive the axum router in-process with `oneshot`.

#![cfg(feature = "server")]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use edgequake_invoice::{
    server::{build_router, DEFAULT_BODY_LIMIT},
    DocumentReader, ExtractionConfig, ExtractionModel, InvoiceError, InvoiceExtractor, ModelError,
    ModelReply, ModelRequest, PageContent, RenderSettings,
};
use http_body_util::BodyExt;
use image::{DynamicImage, RgbaImage};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "X-INVOICE-TEST-BOUNDARY";

struct OnePageReader;

impl DocumentReader for OnePageReader {
    fn page_texts(&self, _pdf: &[u8], _password: Option<&str>) -> Result<Vec<String>, InvoiceError> {
        Ok(vec!["Paracetamol 3004 12%".into()])
    }

    fn read_pages(&self, pdf: &[u8], _settings: &RenderSettings) -> Result<Vec<PageContent>, InvoiceError> {
        if !pdf.starts_with(b"%PDF") {
            return Err(InvoiceError::DocumentRead {
                detail: "not a PDF".into(),
            });
        }
        Ok(vec![PageContent {
            page_number: 1,
            text: "Paracetamol 3004 12%".into(),
            image: DynamicImage::ImageRgba8(RgbaImage::new(8, 8)),
        }])
    }
}

struct FixedModel;

#[async_trait]
impl ExtractionModel for FixedModel {
    async fn extract(&self, _request: ModelRequest<'_>) -> Result<ModelReply, ModelError> {
        Ok(ModelReply::text(
            r#"[{"Section 2_Transaction sort": 1, "Section 2_Transaction qty": "10", "Section 2_Transaction rate": "2.5"}]"#,
        ))
    }
}

fn app() -> axum::Router {
    let extractor = InvoiceExtractor::with_parts(
        Arc::new(OnePageReader),
        Arc::new(FixedModel),
        ExtractionConfig::default(),
    );
    build_router(Arc::new(extractor), DEFAULT_BODY_LIMIT)
}

fn multipart_request(field: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/pdf\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/extract-invoice")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request builder should not fail")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("response body must be readable")
        .to_bytes();
    serde_json::from_slice(bytes.as_ref()).expect("response must be valid JSON")
}

#[tokio::test]
async fn health_returns_healthy_json() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request builder should not fail"),
        )
        .await
        .expect("health handler should respond");

    assert_eq!(response.status(), StatusCode::OK);
    let value = json_body(response).await;
    assert_eq!(value["status"], json!("healthy"));
    assert!(value["message"].is_string());
    assert!(value["timestamp"].as_str().is_some_and(|t| !t.is_empty()));
}

#[tokio::test]
async fn root_reports_version() {
    let response = app()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let value = json_body(response).await;
    assert_eq!(value["version"], json!(env!("CARGO_PKG_VERSION")));
}

#[tokio::test]
async fn non_pdf_upload_is_rejected_with_400() {
    let response = app()
        .oneshot(multipart_request("file", "invoice.png", b"\x89PNG"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({"detail": "Only PDF files are supported"})
    );
}

#[tokio::test]
async fn missing_file_field_is_rejected_with_400() {
    let response = app()
        .oneshot(multipart_request("attachment", "invoice.pdf", b"%PDF-1.4"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let value = json_body(response).await;
    assert!(value["detail"].as_str().unwrap().contains("file"));
}

#[tokio::test]
async fn pdf_upload_returns_line_items() {
    let response = app()
        .oneshot(multipart_request("file", "Invoice-42.PDF", b"%PDF-1.4 body"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let value = json_body(response).await;
    assert_eq!(value["success"], json!(true));
    assert_eq!(value["total_items"], json!(1));
    assert_eq!(value["pages_processed"], json!(1));
    assert_eq!(
        value["message"],
        json!("Successfully extracted 1 invoice items from 1 pages")
    );

    let item = &value["data"][0];
    assert_eq!(item["title"], json!("Invoice-42.PDF"));
    assert_eq!(item["type"], json!("Tax Invoice"));
    assert_eq!(item["status"], json!("reviewing"));
    assert_eq!(item["section_2_transaction_qty"], json!(10));
    assert_eq!(item["section_2_transaction_rate"], json!(2.5));
    assert_eq!(item["section_2_transaction_hsn"], json!("3004"));
    assert_eq!(item["section_2_transaction_gst"], json!(12.0));
    assert_eq!(item["page_number"], json!(1));
}

#[tokio::test]
async fn unreadable_pdf_is_a_500_processing_error() {
    let response = app()
        .oneshot(multipart_request("file", "broken.pdf", b"garbage"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let value = json_body(response).await;
    assert!(value["detail"]
        .as_str()
        .unwrap()
        .starts_with("Processing error: "));
}

#[tokio::test]
async fn cors_allows_any_origin() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "http://localhost:8501")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}
