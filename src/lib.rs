//! # edgequake-invoice
//!
//! Extract invoice line items from PDF invoices using Vision Language Models.
//!
//! Each page is rendered to a PNG and read by a multimodal model, which answers
//! with loosely-structured JSON. The crate digs that JSON out of the reply,
//! maps it onto a fixed [`InvoiceLineItem`] schema with explicit per-field
//! coercion, and fills missing HSN / GST values from tax codes found in the
//! PDF's own text layer.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Read       page text + page rasters via pdfium (spawn_blocking)
//!  ├─ 3. Scan       HSN-like codes paired with nearby GST percentages
//!  ├─ 4. Encode     PNG → base64
//!  ├─ 5. Model      one call per page, in page order
//!  ├─ 6. Parse      first `[` … last `]` (or `{` … `}`) → JSON
//!  └─ 7. Normalize  schema mapping, defaults, HSN / GST backfill
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_invoice::{ExtractionConfig, InvoiceExtractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let extractor = InvoiceExtractor::from_config(ExtractionConfig::default())?;
//!     let output = extractor.extract_file("invoice.pdf").await?;
//!     println!("{}", output.summary_message());
//!     println!("{}", serde_json::to_string_pretty(&output.items)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | axum HTTP API ([`server`]) |
//! | `cli`    | on      | The `invoice2json` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Library-only use:
//! ```toml
//! edgequake-invoice = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{BackfillStrategy, ExtractionConfig, ExtractionConfigBuilder, UpstreamPolicy};
pub use error::{InvoiceError, PageIssue};
pub use extract::{resolve_provider, scan_tax_codes, write_items_json, InvoiceExtractor};
pub use output::{
    ExtractionOutput, ExtractionStats, InvoiceLineItem, InvoiceResponse, PageExtraction,
    PageReport,
};
pub use pipeline::encode::PageImage;
pub use pipeline::input;
pub use pipeline::llm::{ExtractionModel, LlmExtractionModel, ModelError, ModelReply, ModelRequest};
pub use pipeline::reader::{DocumentReader, PageContent, PdfiumReader, RenderSettings};
pub use pipeline::taxcodes::TaxCodeEntry;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::PageStream;
