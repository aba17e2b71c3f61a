//! Input resolution: a local path or HTTP/HTTPS URL → PDF bytes + filename.
//!
//! The filename matters beyond display: it gates the `.pdf` check and becomes
//! the default `title` of every line item.

use crate::error::InvoiceError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Message returned for uploads that are not PDFs.
pub const ONLY_PDF_MESSAGE: &str = "Only PDF files are supported";

const FALLBACK_URL_FILENAME: &str = "downloaded.pdf";

/// PDF bytes and the name they arrived under.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub bytes: Vec<u8>,
    pub filename: String,
}

/// Accept only names ending in `.pdf`, case-insensitively.
pub fn validate_pdf_name(filename: &str) -> Result<(), InvoiceError> {
    if filename.to_ascii_lowercase().ends_with(".pdf") {
        Ok(())
    } else {
        Err(InvoiceError::InputRejected {
            reason: ONLY_PDF_MESSAGE.to_string(),
        })
    }
}

/// Check if the input string looks like an HTTP(S) URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a CLI argument to PDF bytes.
///
/// The name is checked before any bytes are read or downloaded.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, InvoiceError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else if input.contains("://") || input.trim().is_empty() {
        Err(InvoiceError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        read_local(Path::new(input)).await
    }
}

async fn read_local(path: &Path) -> Result<ResolvedInput, InvoiceError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| InvoiceError::InvalidInput {
            input: path.display().to_string(),
        })?;
    validate_pdf_name(&filename)?;

    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => InvoiceError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => InvoiceError::FileNotFound {
            path: PathBuf::from(path),
        },
    })?;

    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(ResolvedInput { bytes, filename })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, InvoiceError> {
    let filename = filename_from_url(url);
    validate_pdf_name(&filename)?;

    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| InvoiceError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_send_err = |e: reqwest::Error| {
        if e.is_timeout() {
            InvoiceError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            InvoiceError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_send_err)?;

    if !response.status().is_success() {
        return Err(InvoiceError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_send_err)?.to_vec();
    info!("Downloaded {} bytes as {}", bytes.len(), filename);

    Ok(ResolvedInput { bytes, filename })
}

/// Last path segment of the URL if it looks like a file name.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| FALLBACK_URL_FILENAME.to_string())
}
