//! Error types for the edgequake-invoice library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`InvoiceError`]: **Fatal**: the extraction cannot proceed at all
//!   (wrong file type, unreadable PDF, provider not configured, model call
//!   failed under [`crate::config::UpstreamPolicy::Abort`]). Returned as
//!   `Err(InvoiceError)` from the top-level `extract*` functions.
//!
//! * [`PageIssue`]: **Non-fatal**: a single page degraded (the model reply
//!   held no decodable JSON, or the model call failed under
//!   [`crate::config::UpstreamPolicy::Placeholder`]). The page still
//!   contributes one placeholder line item; the issue is kept in
//!   [`crate::output::PageReport`] for callers that want to tell degraded
//!   pages apart.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-invoice library.
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The upload is not something we process (e.g. not a `.pdf` name).
    #[error("{reason}")]
    InputRejected { reason: String },

    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The PDF could not be opened or paged.
    #[error("Could not read PDF document: {detail}")]
    DocumentRead { detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium on the library search path."
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The extraction model call failed and the policy is to abort.
    #[error("Extraction model error on page {page}: {detail}")]
    Upstream { page: usize, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InvoiceError {
    /// `true` for errors caused by what the caller sent rather than by
    /// processing. Front-ends map these to a 4xx-style rejection.
    pub fn is_input_rejection(&self) -> bool {
        matches!(
            self,
            InvoiceError::InputRejected { .. } | InvoiceError::InvalidInput { .. }
        )
    }
}

/// A non-fatal problem with a single page.
///
/// The page is still represented in the output by a placeholder line item.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum PageIssue {
    /// The model reply contained no decodable JSON array or object.
    #[error("Page {page}: could not parse model output: {detail}")]
    ParseFailure { page: usize, detail: String },

    /// The model call failed after retries.
    #[error("Page {page}: extraction model failed after {retries} retries: {detail}")]
    ModelFailed {
        page: usize,
        retries: u32,
        detail: String,
    },
}

impl PageIssue {
    /// 1-indexed page the issue belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageIssue::ParseFailure { page, .. } | PageIssue::ModelFailed { page, .. } => *page,
        }
    }
}
